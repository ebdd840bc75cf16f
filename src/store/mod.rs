//! Storage contracts for artifacts, reports, results and accounts.
//!
//! The durable stores are external collaborators; the pipeline only relies
//! on the traits below. Two implementations ship with the crate:
//!
//! - [`memory`]: process-local maps behind async mutexes, used by the
//!   HTTP server in single-node mode, the CLI and the tests.
//! - [`fs`]: an [`ObjectStore`] on the local filesystem.
//!
//! ## Transition guarantees
//!
//! [`ReportStore::transition`] is a compare-and-set: it succeeds only when
//! the stored status equals `from` and `from → to` is a legal lifecycle step.
//! Two racing writers therefore cannot both move the same report, and a
//! status read always reflects the last committed transition.

pub mod fs;
pub mod memory;

use crate::error::IngestError;
use crate::model::{Account, BiomarkerResult, Report, ReportCompletion, ReportStatus};
use async_trait::async_trait;
use std::sync::Arc;

pub use fs::FsObjectStore;
pub use memory::{MemoryObjectStore, MemoryStore};

/// Byte-exact artifact storage keyed by path.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), IngestError>;

    /// Fails with [`IngestError::ArtifactUnavailable`] when the key is absent.
    async fn get(&self, key: &str) -> Result<Vec<u8>, IngestError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), IngestError>;
}

/// Report rows and their lifecycle.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Insert a new report. It must be `pending`.
    async fn create(&self, report: Report) -> Result<(), IngestError>;

    async fn get(&self, report_id: &str) -> Result<Report, IngestError>;

    /// Compare-and-set status change.
    async fn transition(
        &self,
        report_id: &str,
        from: ReportStatus,
        to: ReportStatus,
    ) -> Result<Report, IngestError>;

    /// `processing → completed`, writing the metadata in the same step.
    async fn complete(
        &self,
        report_id: &str,
        completion: ReportCompletion,
    ) -> Result<Report, IngestError>;

    /// `processing → failed`, optionally recording a marker in the raw text.
    async fn fail(&self, report_id: &str, marker: Option<&str>) -> Result<Report, IngestError>;

    /// Remove the row. Missing rows are not an error.
    async fn delete(&self, report_id: &str) -> Result<(), IngestError>;
}

/// Biomarker results owned by reports.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert every row or none of them.
    async fn insert_all(&self, results: Vec<BiomarkerResult>) -> Result<usize, IngestError>;

    async fn delete_for_report(&self, report_id: &str) -> Result<(), IngestError>;

    async fn list_for_report(&self, report_id: &str) -> Result<Vec<BiomarkerResult>, IngestError>;
}

/// Plan and upload counters.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Existing account, or a fresh free-plan one.
    async fn get_or_create(&self, owner_id: &str) -> Result<Account, IngestError>;

    /// Add one upload and return the new count.
    async fn increment_uploads(&self, owner_id: &str) -> Result<u32, IngestError>;
}

/// The four stores the pipeline writes to, shared between gateway and
/// orchestrator.
#[derive(Clone)]
pub struct Stores {
    pub objects: Arc<dyn ObjectStore>,
    pub reports: Arc<dyn ReportStore>,
    pub results: Arc<dyn ResultStore>,
    pub accounts: Arc<dyn AccountStore>,
}

impl Stores {
    /// Memory-backed rows over the given object store.
    pub fn in_memory(objects: Arc<dyn ObjectStore>) -> Self {
        let rows = Arc::new(MemoryStore::new());
        Self {
            objects,
            reports: rows.clone(),
            results: rows.clone(),
            accounts: rows,
        }
    }
}

impl Default for Stores {
    fn default() -> Self {
        Self::in_memory(Arc::new(MemoryObjectStore::new()))
    }
}
