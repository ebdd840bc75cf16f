//! In-memory stores.

use super::{AccountStore, ObjectStore, ReportStore, ResultStore};
use crate::error::IngestError;
use crate::model::{Account, BiomarkerResult, Report, ReportCompletion, ReportStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Artifacts held in a map.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), IngestError> {
        self.objects.lock().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, IngestError> {
        self.objects
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| IngestError::ArtifactUnavailable {
                path: key.to_string(),
                reason: "no such object".into(),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), IngestError> {
        self.objects.lock().await.remove(key);
        Ok(())
    }
}

#[derive(Default)]
struct Tables {
    reports: HashMap<String, Report>,
    results: HashMap<String, Vec<BiomarkerResult>>,
    accounts: HashMap<String, Account>,
}

/// Reports, results and accounts behind one lock, so a transition and the
/// read that follows it can never interleave with another writer.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account, e.g. a premium owner in tests.
    pub async fn put_account(&self, account: Account) {
        self.tables
            .lock()
            .await
            .accounts
            .insert(account.owner_id.clone(), account);
    }

    pub async fn report_count(&self) -> usize {
        self.tables.lock().await.reports.len()
    }
}

fn step(
    report: &mut Report,
    report_id: &str,
    from: ReportStatus,
    to: ReportStatus,
) -> Result<(), IngestError> {
    if report.status != from || !from.can_transition_to(to) {
        return Err(IngestError::InvalidTransition {
            report_id: report_id.to_string(),
            from: report.status,
            to,
        });
    }
    report.status = to;
    report.updated_at = Utc::now();
    Ok(())
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn create(&self, report: Report) -> Result<(), IngestError> {
        if report.status != ReportStatus::Pending {
            return Err(IngestError::Persistence(format!(
                "report '{}' must be created pending, not {}",
                report.id, report.status
            )));
        }
        let mut tables = self.tables.lock().await;
        if tables.reports.contains_key(&report.id) {
            return Err(IngestError::Persistence(format!(
                "report '{}' already exists",
                report.id
            )));
        }
        tables.reports.insert(report.id.clone(), report);
        Ok(())
    }

    async fn get(&self, report_id: &str) -> Result<Report, IngestError> {
        self.tables
            .lock()
            .await
            .reports
            .get(report_id)
            .cloned()
            .ok_or_else(|| IngestError::ReportNotFound(report_id.to_string()))
    }

    async fn transition(
        &self,
        report_id: &str,
        from: ReportStatus,
        to: ReportStatus,
    ) -> Result<Report, IngestError> {
        let mut tables = self.tables.lock().await;
        let report = tables
            .reports
            .get_mut(report_id)
            .ok_or_else(|| IngestError::ReportNotFound(report_id.to_string()))?;
        step(report, report_id, from, to)?;
        debug!(report_id, %from, %to, "status committed");
        Ok(report.clone())
    }

    async fn complete(
        &self,
        report_id: &str,
        completion: ReportCompletion,
    ) -> Result<Report, IngestError> {
        let mut tables = self.tables.lock().await;
        let report = tables
            .reports
            .get_mut(report_id)
            .ok_or_else(|| IngestError::ReportNotFound(report_id.to_string()))?;
        step(
            report,
            report_id,
            ReportStatus::Processing,
            ReportStatus::Completed,
        )?;
        report.lab_name = completion.lab_name;
        report.report_date = completion.report_date;
        report.raw_analysis_text = Some(completion.raw_analysis_text);
        Ok(report.clone())
    }

    async fn fail(&self, report_id: &str, marker: Option<&str>) -> Result<Report, IngestError> {
        let mut tables = self.tables.lock().await;
        let report = tables
            .reports
            .get_mut(report_id)
            .ok_or_else(|| IngestError::ReportNotFound(report_id.to_string()))?;
        step(report, report_id, ReportStatus::Processing, ReportStatus::Failed)?;
        if let Some(marker) = marker {
            report.raw_analysis_text = Some(marker.to_string());
        }
        Ok(report.clone())
    }

    async fn delete(&self, report_id: &str) -> Result<(), IngestError> {
        let mut tables = self.tables.lock().await;
        tables.reports.remove(report_id);
        tables.results.remove(report_id);
        Ok(())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn insert_all(&self, results: Vec<BiomarkerResult>) -> Result<usize, IngestError> {
        let mut tables = self.tables.lock().await;
        // Validate the whole batch before touching the map.
        for r in &results {
            if !tables.reports.contains_key(&r.report_id) {
                return Err(IngestError::Persistence(format!(
                    "result '{}' references unknown report '{}'",
                    r.name, r.report_id
                )));
            }
        }
        let count = results.len();
        for r in results {
            tables.results.entry(r.report_id.clone()).or_default().push(r);
        }
        Ok(count)
    }

    async fn delete_for_report(&self, report_id: &str) -> Result<(), IngestError> {
        self.tables.lock().await.results.remove(report_id);
        Ok(())
    }

    async fn list_for_report(&self, report_id: &str) -> Result<Vec<BiomarkerResult>, IngestError> {
        Ok(self
            .tables
            .lock()
            .await
            .results
            .get(report_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_or_create(&self, owner_id: &str) -> Result<Account, IngestError> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .entry(owner_id.to_string())
            .or_insert_with(|| Account::free(owner_id))
            .clone())
    }

    async fn increment_uploads(&self, owner_id: &str) -> Result<u32, IngestError> {
        let mut tables = self.tables.lock().await;
        let account = tables
            .accounts
            .entry(owner_id.to_string())
            .or_insert_with(|| Account::free(owner_id));
        account.uploads_count = account.uploads_count.saturating_add(1);
        Ok(account.uploads_count)
    }
}
