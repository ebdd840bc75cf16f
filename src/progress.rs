//! Observer trait for report lifecycle events.
//!
//! Inject an [`Arc<dyn ProcessingObserver>`] into the
//! [`crate::orchestrator::Orchestrator`] to receive every committed status
//! transition and every pipeline stage as it starts. Callbacks fire after the
//! store accepted the write, so an observer never sees a transition that
//! storage rejected.
//!
//! # Example
//!
//! ```rust
//! use labtrack_ingest::{ProcessingObserver, ReportStatus};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     transitions: AtomicUsize,
//! }
//!
//! impl ProcessingObserver for CountingObserver {
//!     fn on_transition(&self, _report_id: &str, _from: ReportStatus, _to: ReportStatus) {
//!         self.transitions.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let observer = Arc::new(CountingObserver { transitions: AtomicUsize::new(0) });
//! observer.on_transition("r1", ReportStatus::Pending, ReportStatus::Processing);
//! assert_eq!(observer.transitions.load(Ordering::SeqCst), 1);
//! ```

use crate::model::ReportStatus;
use std::fmt;
use std::sync::Arc;

/// Pipeline stage currently running for a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Decrypting,
    Analyzing,
    Extracting,
    Normalizing,
    Persisting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Decrypting => "decrypting",
            Stage::Analyzing => "analyzing",
            Stage::Extracting => "extracting",
            Stage::Normalizing => "normalizing",
            Stage::Persisting => "persisting",
        };
        f.write_str(s)
    }
}

/// Called by the orchestrator as a report moves through the pipeline.
///
/// Implementations must be `Send + Sync`: different reports are processed
/// concurrently. All methods default to no-ops.
pub trait ProcessingObserver: Send + Sync {
    /// A status change was committed.
    fn on_transition(&self, report_id: &str, from: ReportStatus, to: ReportStatus) {
        let _ = (report_id, from, to);
    }

    /// A stage is about to run.
    fn on_stage(&self, report_id: &str, stage: Stage) {
        let _ = (report_id, stage);
    }

    /// The run finished; `count` is the number of persisted results.
    fn on_completed(&self, report_id: &str, count: usize) {
        let _ = (report_id, count);
    }

    /// The run failed with `error`.
    fn on_failed(&self, report_id: &str, error: &str) {
        let _ = (report_id, error);
    }
}

/// Observer used when none is configured.
pub struct NoopObserver;

impl ProcessingObserver for NoopObserver {}

pub type SharedObserver = Arc<dyn ProcessingObserver>;
