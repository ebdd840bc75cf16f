//! Pipeline stages between a stored artifact and biomarker candidates.
//!
//! ## Data Flow
//!
//! ```text
//! decrypt ──▶ analysis ──────────────────────────▶ extract
//! (lopdf/    ├─ layout: submit ▶ poll (job mode)    (JSON-mode LLM)
//!  qpdf)     └─ vision: render ▶ encode ▶ llm
//!                       └──────── postprocess ─────┘
//! ```
//!
//! 1. [`decrypt`]: strip password protection; blocking work off the executor
//! 2. [`analysis`]: the [`analysis::DocumentAnalyzer`] seam plus the bounded
//!    polling loop for job-style providers
//! 3. [`layout`]: Azure Document Intelligence job backend
//! 4. [`vision`]: vision-LLM analyzer built from [`render`], [`encode`]
//!    and [`llm`]
//! 5. [`postprocess`]: deterministic text cleanup shared by both modes
//! 6. [`extract`]: strict-JSON biomarker extraction

pub mod analysis;
pub mod decrypt;
pub mod encode;
pub mod extract;
pub mod layout;
pub mod llm;
pub mod postprocess;
pub mod render;
pub mod vision;
