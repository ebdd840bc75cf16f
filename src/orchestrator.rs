//! Ingestion orchestrator: the report state machine.
//!
//! ```text
//!            ┌─────────┐  claim (CAS)  ┌────────────┐  results + metadata  ┌───────────┐
//!  gateway ─▶│ pending │──────────────▶│ processing │─────────────────────▶│ completed │
//!            └─────────┘               └─────┬──────┘                      └───────────┘
//!                                            │ any terminal error
//!                                            ▼
//!                                       ┌────────┐   (or row deleted under
//!                                       │ failed │    FailurePolicy::Rollback)
//!                                       └────────┘
//! ```
//!
//! `pending → processing` is committed before any external call, so a second
//! trigger for the same report loses the compare-and-set and does nothing.
//! `completed` is written only after every result row is stored. Any error
//! after the claim ends the report `failed` (or deleted), never leaving it
//! in `processing`.

use crate::config::{FailurePolicy, IngestConfig, ProviderSettings};
use crate::error::IngestError;
use crate::model::{
    ProcessRequest, ProcessResponse, Report, ReportCompletion, ReportStatus,
    PASSWORD_REQUIRED_MARKER,
};
use crate::normalize::{normalize_candidate, MappingTable};
use crate::pipeline::analysis::{DocumentAnalyzer, JobAnalyzer};
use crate::pipeline::decrypt::{default_decryptor, is_password_protected, PdfDecryptor};
use crate::pipeline::extract::{BiomarkerExtractor, ChatCompletionsExtractor, ExtractionInput};
use crate::pipeline::layout::LayoutJobBackend;
use crate::pipeline::vision::VisionAnalyzer;
use crate::progress::{NoopObserver, ProcessingObserver, Stage};
use crate::store::Stores;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Where the text handed to the extractor comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Layout-analysis job, then text extraction. (default)
    #[default]
    Layout,
    /// Vision-LLM page transcription, then text extraction.
    Vision,
    /// The extractor reads the PDF itself; no separate analysis step.
    Direct,
}

impl FromStr for AnalysisMode {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "layout" => Ok(AnalysisMode::Layout),
            "vision" => Ok(AnalysisMode::Vision),
            "direct" => Ok(AnalysisMode::Direct),
            other => Err(IngestError::InvalidConfig(format!(
                "unknown analysis mode '{other}' (expected layout, vision or direct)"
            ))),
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub report_id: String,
    pub count: usize,
    pub lab_name: Option<String>,
}

impl ProcessResponse {
    /// Wire body for a run result.
    pub fn from_result(result: &Result<ProcessOutcome, IngestError>) -> Self {
        match result {
            Ok(outcome) => ProcessResponse::Completed {
                success: true,
                count: outcome.count,
                lab_name: outcome.lab_name.clone(),
            },
            Err(err) => ProcessResponse::Failed {
                error: err.user_message(),
                password_required: err.is_password_required(),
            },
        }
    }
}

/// Sequences decryption, analysis, extraction, normalization and
/// persistence for one report at a time.
#[derive(Clone)]
pub struct Orchestrator {
    stores: Stores,
    analyzer: Option<Arc<dyn DocumentAnalyzer>>,
    extractor: Arc<dyn BiomarkerExtractor>,
    decryptor: Arc<dyn PdfDecryptor>,
    table: Arc<MappingTable>,
    observer: Arc<dyn ProcessingObserver>,
    config: IngestConfig,
}

impl Orchestrator {
    /// An orchestrator in direct mode with the built-in mapping table.
    pub fn new(stores: Stores, extractor: Arc<dyn BiomarkerExtractor>, config: IngestConfig) -> Self {
        Self {
            stores,
            analyzer: None,
            extractor,
            decryptor: default_decryptor(),
            table: Arc::new(MappingTable::builtin()),
            observer: Arc::new(NoopObserver),
            config,
        }
    }

    /// Wire providers from the environment for the chosen mode.
    pub fn from_settings(
        mode: AnalysisMode,
        settings: &ProviderSettings,
        stores: Stores,
        config: IngestConfig,
    ) -> Result<Self, IngestError> {
        let extractor = Arc::new(ChatCompletionsExtractor::from_settings(settings, &config)?);
        let analyzer: Option<Arc<dyn DocumentAnalyzer>> = match mode {
            AnalysisMode::Layout => {
                let backend = LayoutJobBackend::from_settings(settings, config.api_timeout())?;
                Some(Arc::new(
                    JobAnalyzer::new(Arc::new(backend))
                        .with_polling(config.poll_interval(), config.max_poll_attempts)
                        .with_min_chars(config.min_text_chars),
                ))
            }
            AnalysisMode::Vision => Some(Arc::new(VisionAnalyzer::from_config(config.clone())?)),
            AnalysisMode::Direct => None,
        };
        let mut orchestrator = Self::new(stores, extractor, config);
        orchestrator.analyzer = analyzer;
        Ok(orchestrator)
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn DocumentAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_decryptor(mut self, decryptor: Arc<dyn PdfDecryptor>) -> Self {
        self.decryptor = decryptor;
        self
    }

    pub fn with_table(mut self, table: Arc<MappingTable>) -> Self {
        self.table = table;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProcessingObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Run the pipeline for one report.
    ///
    /// The report's status is terminal when this returns, whether or not the
    /// caller is still listening.
    pub async fn process(&self, request: &ProcessRequest) -> Result<ProcessOutcome, IngestError> {
        if request.report_id.is_empty() || request.file_path.is_empty() {
            return Err(IngestError::Validation(
                "reportId et filePath sont requis".into(),
            ));
        }

        let report = self.stores.reports.get(&request.report_id).await?;
        // Only the stored path is ever read or deleted; a trigger naming
        // another artifact is refused before the claim.
        if report.file_path != request.file_path {
            warn!(
                report_id = %report.id,
                stored = %report.file_path,
                requested = %request.file_path,
                "trigger path differs from stored path"
            );
            return Err(IngestError::Validation(
                "filePath ne correspond pas au rapport".into(),
            ));
        }

        self.stores
            .reports
            .transition(&report.id, ReportStatus::Pending, ReportStatus::Processing)
            .await?;
        self.observer
            .on_transition(&report.id, ReportStatus::Pending, ReportStatus::Processing);
        info!(report_id = %report.id, "processing started");

        match self.run(&report, request).await {
            Ok(outcome) => {
                info!(report_id = %report.id, count = outcome.count, "processing completed");
                self.observer.on_completed(&report.id, outcome.count);
                Ok(outcome)
            }
            Err(err) => {
                warn!(report_id = %report.id, error = %err, "processing failed");
                self.settle_failure(&report, &err).await;
                self.observer.on_failed(&report.id, &err.to_string());
                Err(err)
            }
        }
    }

    async fn run(&self, report: &Report, request: &ProcessRequest) -> Result<ProcessOutcome, IngestError> {
        let id = report.id.as_str();
        let mut pdf = self.stores.objects.get(&report.file_path).await?;

        match request.password.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(password) => {
                self.observer.on_stage(id, Stage::Decrypting);
                pdf = self.decryptor.decrypt(&pdf, password).await?;
            }
            None => {
                if is_password_protected(&pdf).await {
                    return Err(IngestError::PasswordRequired);
                }
            }
        }

        let (extraction, raw_text) = match &self.analyzer {
            Some(analyzer) => {
                self.observer.on_stage(id, Stage::Analyzing);
                let text = analyzer.analyze(&pdf, None).await?;
                self.observer.on_stage(id, Stage::Extracting);
                let extraction = self.extractor.extract(ExtractionInput::Text(&text)).await?;
                (extraction, text)
            }
            None => {
                self.observer.on_stage(id, Stage::Extracting);
                let extraction = self.extractor.extract(ExtractionInput::Document(&pdf)).await?;
                let raw = extraction.raw_response.clone();
                (extraction, raw)
            }
        };
        if extraction.biomarkers.is_empty() {
            return Err(IngestError::NoDataExtracted);
        }

        self.observer.on_stage(id, Stage::Normalizing);
        let fallback_date = extraction
            .report_date
            .unwrap_or_else(|| Utc::now().date_naive());
        let results: Vec<_> = extraction
            .biomarkers
            .iter()
            .map(|c| normalize_candidate(&self.table, c, id, &report.owner_id, fallback_date))
            .collect();

        self.observer.on_stage(id, Stage::Persisting);
        let count = self.stores.results.insert_all(results).await?;

        let completion = ReportCompletion {
            lab_name: extraction.lab_name.clone(),
            report_date: extraction.report_date,
            raw_analysis_text: truncate_chars(&raw_text, self.config.raw_text_limit),
        };
        if let Err(err) = self.stores.reports.complete(id, completion).await {
            // Results without a completed report would be visible but orphaned.
            if let Err(cleanup) = self.stores.results.delete_for_report(id).await {
                error!(report_id = id, error = %cleanup, "could not remove results after failed completion");
            }
            return Err(err);
        }
        self.observer
            .on_transition(id, ReportStatus::Processing, ReportStatus::Completed);

        Ok(ProcessOutcome {
            report_id: id.to_string(),
            count,
            lab_name: extraction.lab_name,
        })
    }

    /// Leave a claimed report in a terminal state after `err`.
    async fn settle_failure(&self, report: &Report, err: &IngestError) {
        let id = report.id.as_str();
        if let Err(e) = self.stores.results.delete_for_report(id).await {
            error!(report_id = id, error = %e, "could not remove partial results");
        }

        // The marker is how the uploader learns to retry with a password, so
        // it is recorded even under Rollback.
        let marker = err.is_password_required().then_some(PASSWORD_REQUIRED_MARKER);
        let policy = if marker.is_some() {
            FailurePolicy::MarkFailed
        } else {
            self.config.failure_policy
        };

        match policy {
            FailurePolicy::MarkFailed => match self.stores.reports.fail(id, marker).await {
                Ok(_) => self
                    .observer
                    .on_transition(id, ReportStatus::Processing, ReportStatus::Failed),
                Err(e) => error!(report_id = id, error = %e, "could not mark report failed"),
            },
            FailurePolicy::Rollback => {
                if let Err(e) = self.stores.objects.delete(&report.file_path).await {
                    error!(report_id = id, error = %e, "could not remove artifact during rollback");
                }
                if let Err(e) = self.stores.reports.delete(id).await {
                    error!(report_id = id, error = %e, "could not delete report during rollback");
                }
                info!(report_id = id, "report rolled back");
            }
        }
    }
}

/// First `limit` characters of `text`, cut on a character boundary.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
