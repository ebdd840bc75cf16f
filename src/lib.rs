//! # labtrack-ingest
//!
//! Ingestion pipeline for laboratory blood-test PDFs: from an uploaded,
//! possibly password-protected report to normalized, classified biomarker
//! records.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Gateway       auth, quota, PDF checks, optional decryption, store artifact
//!  ├─ 2. Orchestrator  claim report (pending → processing)
//!  ├─ 3. Analysis      layout job (polled) or vision LLM → cleaned text
//!  ├─ 4. Extraction    strict-JSON LLM → biomarker candidates
//!  ├─ 5. Normalize     canonical name, LOINC code, category, clinical status
//!  └─ 6. Persist       all results, then processing → completed
//! ```
//!
//! Any failure after step 2 leaves the report `failed` (or removes it under
//! [`FailurePolicy::Rollback`]). A PDF that needs a password fails with the
//! `PASSWORD_REQUIRED` marker so the uploader can resubmit it with one.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use labtrack_ingest::{
//!     AnalysisMode, Gateway, IngestConfig, InlineTrigger, Orchestrator, ProviderSettings,
//!     Stores, Upload,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IngestConfig::default();
//!     let stores = Stores::default();
//!     let orchestrator = Orchestrator::from_settings(
//!         AnalysisMode::Layout,
//!         &ProviderSettings::from_env(),
//!         stores.clone(),
//!         config.clone(),
//!     )?;
//!     let gateway = Gateway::new(stores.clone(), Arc::new(InlineTrigger::new(orchestrator)), config);
//!
//!     let upload = Upload {
//!         file_name: "bilan.pdf".into(),
//!         bytes: std::fs::read("bilan.pdf")?,
//!         password: None,
//!     };
//!     let receipt = gateway.upload("user-1", upload).await?;
//!     let report = stores.reports.get(&receipt.report_id).await?;
//!     println!("{} → {}", report.file_name, report.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `labtrack` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when embedding the library:
//! ```toml
//! labtrack-ingest = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod server;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{FailurePolicy, IngestConfig, IngestConfigBuilder, ProviderSettings};
pub use error::IngestError;
pub use gateway::{Gateway, HttpTrigger, InlineTrigger, ProcessingTrigger, SpawnTrigger, Upload};
pub use model::{
    Account, BiomarkerCandidate, BiomarkerResult, BiomarkerStatus, ExtractionOutput, Plan,
    ProcessRequest, ProcessResponse, Report, ReportStatus, UploadResponse,
    PASSWORD_REQUIRED_MARKER,
};
pub use normalize::{classify, normalize_candidate, MappingTable};
pub use orchestrator::{AnalysisMode, Orchestrator, ProcessOutcome};
pub use pipeline::analysis::{DocumentAnalyzer, JobAnalyzer, JobBackend, JobStatus, Sleeper};
pub use pipeline::decrypt::{default_decryptor, LopdfDecryptor, PdfDecryptor, QpdfDecryptor};
pub use pipeline::extract::{BiomarkerExtractor, ChatCompletionsExtractor, ExtractionInput};
pub use progress::{NoopObserver, ProcessingObserver, Stage};
pub use store::{FsObjectStore, MemoryObjectStore, MemoryStore, Stores};
