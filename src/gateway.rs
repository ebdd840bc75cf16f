//! Ingestion gateway: accept an upload and hand it to the orchestrator.
//!
//! Order of checks for one upload:
//!
//! 1. an authenticated owner
//! 2. the free-plan quota
//! 3. file name, size and `%PDF` signature
//! 4. decryption, when a password was given
//!
//! Any failure up to here is synchronous and leaves no state behind. After
//! that the artifact is stored, a `pending` report is created, the counter is
//! incremented and the orchestrator is triggered. Steps 2 to the increment
//! run under a per-account lock, so two concurrent uploads cannot both pass a
//! quota that has room for one.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::model::{Plan, ProcessRequest, ProcessResponse, Report, ReportStatus, UploadResponse};
use crate::orchestrator::Orchestrator;
use crate::pipeline::decrypt::{default_decryptor, PdfDecryptor};
use crate::store::Stores;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub const UPLOAD_ACCEPTED_MESSAGE: &str = "Bilan importé avec succès. Traitement en cours...";

/// One file as received by the gateway.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub password: Option<String>,
}

/// Hands a created report to the orchestrator.
///
/// `Ok` means the orchestrator accepted the report; it says nothing about
/// how processing ends.
#[async_trait]
pub trait ProcessingTrigger: Send + Sync {
    async fn trigger(&self, request: ProcessRequest) -> Result<(), IngestError>;
}

/// Runs the orchestrator on a background task.
pub struct SpawnTrigger {
    orchestrator: Orchestrator,
}

impl SpawnTrigger {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl ProcessingTrigger for SpawnTrigger {
    async fn trigger(&self, request: ProcessRequest) -> Result<(), IngestError> {
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            // Outcome is recorded on the report; the error is already logged.
            let _ = orchestrator.process(&request).await;
        });
        Ok(())
    }
}

/// Runs the orchestrator to completion before returning.
pub struct InlineTrigger {
    orchestrator: Orchestrator,
}

impl InlineTrigger {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl ProcessingTrigger for InlineTrigger {
    async fn trigger(&self, request: ProcessRequest) -> Result<(), IngestError> {
        let _ = self.orchestrator.process(&request).await;
        Ok(())
    }
}

/// POSTs the trigger body to a remote orchestrator endpoint.
pub struct HttpTrigger {
    client: reqwest::Client,
    url: String,
    bearer: Option<String>,
}

impl HttpTrigger {
    pub fn new(url: impl Into<String>, bearer: Option<String>, timeout: Duration) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            bearer,
        })
    }
}

#[async_trait]
impl ProcessingTrigger for HttpTrigger {
    async fn trigger(&self, request: ProcessRequest) -> Result<(), IngestError> {
        let mut call = self.client.post(&self.url).json(&request);
        if let Some(token) = &self.bearer {
            call = call.bearer_auth(token);
        }
        let response = call
            .send()
            .await
            .map_err(|e| IngestError::Internal(format!("orchestrator unreachable: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        // Any well-formed reply means the orchestrator ran, whatever the outcome.
        match serde_json::from_str::<ProcessResponse>(&body) {
            Ok(reply) => {
                debug!(%status, ?reply, "orchestrator replied");
                Ok(())
            }
            Err(_) => Err(IngestError::Internal(format!(
                "orchestrator returned {status} without a trigger reply"
            ))),
        }
    }
}

/// Validates uploads, enforces quota and creates reports.
pub struct Gateway {
    stores: Stores,
    decryptor: Arc<dyn PdfDecryptor>,
    trigger: Arc<dyn ProcessingTrigger>,
    config: IngestConfig,
    account_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    last_stamp: AtomicI64,
}

impl Gateway {
    pub fn new(stores: Stores, trigger: Arc<dyn ProcessingTrigger>, config: IngestConfig) -> Self {
        Self {
            stores,
            decryptor: default_decryptor(),
            trigger,
            config,
            account_locks: Mutex::new(HashMap::new()),
            last_stamp: AtomicI64::new(0),
        }
    }

    pub fn with_decryptor(mut self, decryptor: Arc<dyn PdfDecryptor>) -> Self {
        self.decryptor = decryptor;
        self
    }

    async fn account_lock(&self, owner_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.account_locks.lock().await;
        Arc::clone(locks.entry(owner_id.to_string()).or_default())
    }

    /// Epoch milliseconds for a storage key, strictly increasing per gateway
    /// so two uploads in the same millisecond never share a key.
    fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let prev = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or(now);
        now.max(prev + 1)
    }

    /// Accept one upload for `owner_id`.
    pub async fn upload(&self, owner_id: &str, upload: Upload) -> Result<UploadResponse, IngestError> {
        if owner_id.trim().is_empty() {
            return Err(IngestError::Unauthenticated);
        }

        let lock = self.account_lock(owner_id).await;
        let guard = lock.lock().await;

        let account = self.stores.accounts.get_or_create(owner_id).await?;
        if account.plan == Plan::Free && account.uploads_count >= self.config.free_upload_limit {
            info!(owner_id, used = account.uploads_count, "upload quota reached");
            return Err(IngestError::QuotaExceeded {
                owner_id: owner_id.to_string(),
                used: account.uploads_count,
                limit: self.config.free_upload_limit,
            });
        }

        validate_upload(&upload, self.config.max_upload_bytes)?;

        let mut pdf = upload.bytes;
        if let Some(password) = upload.password.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            debug!(owner_id, "decrypting upload");
            pdf = self.decryptor.decrypt(&pdf, password).await?;
        }

        let file_name = sanitize_file_name(&upload.file_name);
        let file_path = format!("{owner_id}/{}-{file_name}", self.next_stamp());
        self.stores.objects.put(&file_path, pdf).await?;

        let report = Report::new(owner_id, file_name, file_path.clone());
        let report_id = report.id.clone();
        if let Err(err) = self.stores.reports.create(report).await {
            self.discard(None, &file_path).await;
            return Err(err);
        }

        // An upload the counter did not record would be free; undo it.
        if let Err(err) = self.stores.accounts.increment_uploads(owner_id).await {
            error!(owner_id, %report_id, error = %err, "could not increment upload counter");
            self.discard(Some(&report_id), &file_path).await;
            return Err(match err {
                IngestError::Persistence(detail) => IngestError::Persistence(detail),
                other => IngestError::Persistence(format!("upload counter: {other}")),
            });
        }
        drop(guard);
        info!(owner_id, %report_id, %file_path, "upload accepted");

        let request = ProcessRequest {
            report_id: report_id.clone(),
            file_path,
            password: None,
        };
        if let Err(err) = self.trigger.trigger(request).await {
            warn!(%report_id, error = %err, "orchestrator trigger failed");
            self.fail_untriggered(&report_id).await;
        }

        Ok(UploadResponse {
            report_id,
            message: UPLOAD_ACCEPTED_MESSAGE.to_string(),
        })
    }

    /// Remove what a rejected upload already stored.
    async fn discard(&self, report_id: Option<&str>, file_path: &str) {
        if let Some(report_id) = report_id {
            if let Err(e) = self.stores.reports.delete(report_id).await {
                error!(report_id, error = %e, "could not delete report of a rejected upload");
            }
        }
        if let Err(e) = self.stores.objects.delete(file_path).await {
            error!(%file_path, error = %e, "could not remove artifact of a rejected upload");
        }
    }

    /// Move a report nobody picked up to `failed`, through `processing` so
    /// the lifecycle stays linear. If the orchestrator already claimed it,
    /// the orchestrator owns the outcome.
    async fn fail_untriggered(&self, report_id: &str) {
        let reports = &self.stores.reports;
        match reports
            .transition(report_id, ReportStatus::Pending, ReportStatus::Processing)
            .await
        {
            Ok(_) => {
                if let Err(e) = reports.fail(report_id, None).await {
                    error!(report_id, error = %e, "could not mark untriggered report failed");
                }
            }
            Err(IngestError::InvalidTransition { from, .. }) => {
                debug!(report_id, %from, "report already claimed by orchestrator");
            }
            Err(e) => error!(report_id, error = %e, "could not claim untriggered report"),
        }
    }
}

/// Reject anything that is not a plausible PDF within the size limit.
pub fn validate_upload(upload: &Upload, max_bytes: usize) -> Result<(), IngestError> {
    if upload.bytes.is_empty() || upload.file_name.trim().is_empty() {
        return Err(IngestError::Validation("Aucun fichier fourni".into()));
    }
    if !upload.file_name.to_lowercase().ends_with(".pdf") {
        return Err(IngestError::Validation(
            "Seuls les fichiers PDF sont acceptés".into(),
        ));
    }
    if upload.bytes.len() > max_bytes {
        return Err(IngestError::Validation(format!(
            "Le fichier ne doit pas dépasser {} Mo",
            max_bytes / (1024 * 1024)
        )));
    }
    // Readers accept the header anywhere in the first KiB.
    let head = &upload.bytes[..upload.bytes.len().min(1024)];
    if !head.windows(4).any(|w| w == b"%PDF") {
        return Err(IngestError::Validation(
            "Le fichier n'est pas un PDF valide".into(),
        ));
    }
    Ok(())
}

/// Keep the name a single path segment.
fn sanitize_file_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
