//! Fakes and fixtures shared by the integration tests.
//!
//! Every provider is replaced by a scripted stand-in so the tests exercise
//! the real gateway, orchestrator, normalization and stores without network
//! access.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use labtrack_ingest::store::AccountStore;
use labtrack_ingest::{
    Account, BiomarkerCandidate, BiomarkerExtractor, DocumentAnalyzer, ExtractionInput, ExtractionOutput,
    IngestError, MemoryObjectStore, MemoryStore, PdfDecryptor, ProcessRequest, ProcessingObserver,
    ProcessingTrigger, ReportStatus, Stores, Upload,
};
use lopdf::{dictionary, Document, Object, Stream};
use std::sync::{Arc, Mutex};

pub const OWNER: &str = "user-1";
pub const PASSWORD: &str = "0102";

/// Long enough to pass the readability threshold.
pub const ANALYSIS_TEXT: &str = "LABORATOIRE BIOGROUP\n\n| Analyse | Résultat | Unité | Référence |\n\
|---|---|---|---|\n| Hémoglobine | 13,5 | g/dL | 13,0 - 17,0 |\n| Glycémie | 1,80 | g/L | 0,70 - 1,10 |";

/// A one-page PDF built with lopdf.
pub fn plain_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content = Stream::new(dictionary! {}, b"BT /F1 12 Tf 72 720 Td (Bilan) Tj ET".to_vec());
    let content_id = doc.add_object(content);
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut out = Vec::new();
    doc.save_to(&mut out).expect("serialize test pdf");
    out
}

pub fn upload(file_name: &str) -> Upload {
    Upload {
        file_name: file_name.to_string(),
        bytes: plain_pdf(),
        password: None,
    }
}

/// Stores over shared in-memory backends, with handles for inspection.
pub struct Backends {
    pub stores: Stores,
    pub rows: Arc<MemoryStore>,
    pub objects: Arc<MemoryObjectStore>,
}

pub fn backends() -> Backends {
    let rows = Arc::new(MemoryStore::new());
    let objects = Arc::new(MemoryObjectStore::new());
    let stores = Stores {
        objects: objects.clone(),
        reports: rows.clone(),
        results: rows.clone(),
        accounts: rows.clone(),
    };
    Backends {
        stores,
        rows,
        objects,
    }
}

pub fn candidate(name: &str, value: f64, min: Option<f64>, max: Option<f64>) -> BiomarkerCandidate {
    BiomarkerCandidate {
        name: name.to_string(),
        value,
        unit: None,
        reference_range_text: None,
        reference_min: min,
        reference_max: max,
        test_date: None,
    }
}

/// Three biomarkers from Biogroup, dated 12 March 2024.
pub fn biogroup_output() -> ExtractionOutput {
    ExtractionOutput {
        biomarkers: vec![
            candidate("Hémoglobine", 13.5, Some(13.0), Some(17.0)),
            candidate("Glycémie", 1.8, Some(0.7), Some(1.1)),
            candidate("LDL", 1.7, None, Some(1.6)),
        ],
        lab_name: Some("Biogroup".into()),
        report_date: NaiveDate::from_ymd_opt(2024, 3, 12),
        raw_response: r#"{"biomarkers":[]}"#.into(),
    }
}

// ── Analyzer ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug)]
pub enum AnalyzerScript {
    Text,
    Protected,
    Unreadable,
    TimedOut,
}

pub struct FakeAnalyzer {
    script: AnalyzerScript,
}

impl FakeAnalyzer {
    pub fn new(script: AnalyzerScript) -> Arc<Self> {
        Arc::new(Self { script })
    }
}

#[async_trait]
impl DocumentAnalyzer for FakeAnalyzer {
    async fn analyze(&self, _pdf: &[u8], _password: Option<&str>) -> Result<String, IngestError> {
        match self.script {
            AnalyzerScript::Text => Ok(ANALYSIS_TEXT.to_string()),
            AnalyzerScript::Protected => Err(IngestError::PasswordRequired),
            AnalyzerScript::Unreadable => Err(IngestError::UnreadableDocument { chars: 12, min: 50 }),
            AnalyzerScript::TimedOut => Err(IngestError::AnalysisTimeout { attempts: 30 }),
        }
    }
}

// ── Extractor ────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub enum ExtractorScript {
    Reply(ExtractionOutput),
    Nothing,
    Malformed,
}

/// Replays a scripted answer and records what kind of input it was given.
pub struct FakeExtractor {
    script: ExtractorScript,
    pub inputs: Mutex<Vec<String>>,
}

impl FakeExtractor {
    pub fn new(script: ExtractorScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl BiomarkerExtractor for FakeExtractor {
    async fn extract(&self, input: ExtractionInput<'_>) -> Result<ExtractionOutput, IngestError> {
        let kind = match input {
            ExtractionInput::Text(text) => format!("text:{}", text.len()),
            ExtractionInput::Document(bytes) => format!("document:{}", bytes.len()),
        };
        self.inputs.lock().unwrap().push(kind);
        match &self.script {
            ExtractorScript::Reply(output) => Ok(output.clone()),
            ExtractorScript::Nothing => Err(IngestError::NoDataExtracted),
            ExtractorScript::Malformed => {
                Err(IngestError::ExtractionFormat("expected value at line 1".into()))
            }
        }
    }
}

// ── Decryptor ────────────────────────────────────────────────────────────

/// Accepts [`PASSWORD`] and returns a fresh plain PDF.
pub struct FakeDecryptor;

#[async_trait]
impl PdfDecryptor for FakeDecryptor {
    async fn decrypt(&self, _bytes: &[u8], password: &str) -> Result<Vec<u8>, IngestError> {
        if password == PASSWORD {
            Ok(plain_pdf())
        } else {
            Err(IngestError::Decryption("invalid password".into()))
        }
    }
}

// ── Observer and trigger ─────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingObserver {
    pub transitions: Mutex<Vec<(ReportStatus, ReportStatus)>>,
    pub failures: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn transitions(&self) -> Vec<(ReportStatus, ReportStatus)> {
        self.transitions.lock().unwrap().clone()
    }
}

impl ProcessingObserver for RecordingObserver {
    fn on_transition(&self, _report_id: &str, from: ReportStatus, to: ReportStatus) {
        self.transitions.lock().unwrap().push((from, to));
    }

    fn on_failed(&self, _report_id: &str, error: &str) {
        self.failures.lock().unwrap().push(error.to_string());
    }
}

/// A trigger whose endpoint is down.
pub struct UnreachableTrigger;

#[async_trait]
impl ProcessingTrigger for UnreachableTrigger {
    async fn trigger(&self, _request: ProcessRequest) -> Result<(), IngestError> {
        Err(IngestError::Internal("connection refused".into()))
    }
}

/// Accounts that can be read but whose upload counter cannot be written.
pub struct StuckCounter;

#[async_trait]
impl AccountStore for StuckCounter {
    async fn get_or_create(&self, owner_id: &str) -> Result<Account, IngestError> {
        Ok(Account::free(owner_id))
    }

    async fn increment_uploads(&self, _owner_id: &str) -> Result<u32, IngestError> {
        Err(IngestError::Persistence("accounts table is read-only".into()))
    }
}
