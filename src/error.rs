//! Error types for the labtrack ingestion pipeline.
//!
//! A single enum, [`IngestError`], covers every stage. The variants fall
//! into three groups that callers treat differently:
//!
//! * **Rejected before any state exists**: [`IngestError::Validation`],
//!   [`IngestError::QuotaExceeded`], [`IngestError::Unauthenticated`] and a
//!   gateway-level [`IngestError::Decryption`]. No Report row is created.
//!
//! * **User-correctable after a Report exists**:
//!   [`IngestError::PasswordRequired`] and an orchestrator-level
//!   [`IngestError::Decryption`]. The Report ends `failed`, but the message
//!   tells the user how to retry.
//!
//! * **Terminal pipeline faults**: analysis, extraction and persistence
//!   errors. The Report ends `failed` (or is rolled back).
//!
//! `Display` strings are written for operators and logs;
//! [`IngestError::user_message`] returns the short localized text shown to
//! the person who uploaded the report.

use crate::model::ReportStatus;
use thiserror::Error;

/// All errors returned by the labtrack ingestion library.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Gateway errors ────────────────────────────────────────────────────
    /// The request carried no authenticated owner.
    #[error("request is not authenticated")]
    Unauthenticated,

    /// Upload rejected before any state was created (bad type, size, missing file).
    #[error("invalid upload: {0}")]
    Validation(String),

    /// Free-tier upload limit reached for this account.
    #[error("upload quota exhausted for account '{owner_id}' ({used}/{limit})")]
    QuotaExceeded {
        owner_id: String,
        used: u32,
        limit: u32,
    },

    // ── Decryption errors ─────────────────────────────────────────────────
    /// Wrong password or a corrupt encrypted stream.
    #[error("PDF decryption failed: {0}")]
    Decryption(String),

    /// The document is encrypted and no password was supplied.
    #[error("PDF is encrypted and requires a password")]
    PasswordRequired,

    /// The security handler or cipher is not one this decryptor can open.
    #[error("PDF encryption is not supported: {0}")]
    UnsupportedEncryption(String),

    // ── Document analysis errors ──────────────────────────────────────────
    /// The analysis provider reported a terminal failure.
    #[error("document analysis failed: {0}")]
    Analysis(String),

    /// The analysis job was still running after every poll attempt.
    #[error("document analysis did not finish after {attempts} polls")]
    AnalysisTimeout { attempts: u32 },

    /// Analysis succeeded but produced too little text to be a lab report.
    #[error("document is unreadable: {chars} characters extracted, at least {min} required")]
    UnreadableDocument { chars: usize, min: usize },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The extraction provider could not be reached or answered with an error status.
    #[error("biomarker extraction failed: {0}")]
    Extraction(String),

    /// The language model response did not match the expected JSON schema.
    #[error("extraction response is not valid JSON: {0}")]
    ExtractionFormat(String),

    /// The response parsed but contained no usable biomarker.
    #[error("no biomarker could be extracted from the document")]
    NoDataExtracted,

    // ── Storage errors ────────────────────────────────────────────────────
    /// A durable write (report row, results, artifact) failed.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// The stored artifact could not be read back.
    #[error("artifact '{path}' is unavailable: {reason}")]
    ArtifactUnavailable { path: String, reason: String },

    /// No Report with this identifier exists.
    #[error("report '{0}' not found")]
    ReportNotFound(String),

    /// A status change that would break `pending → processing → terminal`.
    #[error("report '{report_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        report_id: String,
        from: ReportStatus,
        to: ReportStatus,
    },

    // ── Configuration errors ──────────────────────────────────────────────
    /// A provider is selected but its credentials or endpoint are missing.
    #[error("provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panic, runtime failure).
    #[error("internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// HTTP status for the gateway and orchestrator endpoints.
    pub fn http_status(&self) -> u16 {
        match self {
            IngestError::Unauthenticated => 401,
            IngestError::Validation(_)
            | IngestError::Decryption(_)
            | IngestError::UnsupportedEncryption(_)
            | IngestError::PasswordRequired => 400,
            IngestError::QuotaExceeded { .. } => 403,
            IngestError::ReportNotFound(_) => 404,
            IngestError::InvalidTransition { .. } => 409,
            _ => 500,
        }
    }

    /// Short, localized, actionable message for the uploader.
    pub fn user_message(&self) -> String {
        match self {
            IngestError::Unauthenticated => "Non autorisé".into(),
            IngestError::Validation(detail) => detail.clone(),
            IngestError::QuotaExceeded { .. } => {
                "Limite d'imports atteinte. Passez à Premium pour continuer.".into()
            }
            IngestError::Decryption(_) => {
                "Impossible de déchiffrer le PDF. Vérifiez le mot de passe.".into()
            }
            IngestError::PasswordRequired => {
                "Ce PDF nécessite un mot de passe. Importez-le à nouveau en le renseignant.".into()
            }
            IngestError::UnsupportedEncryption(_) => {
                "Ce type de chiffrement PDF n'est pas pris en charge.".into()
            }
            IngestError::Analysis(_) => "Échec de l'analyse du document.".into(),
            IngestError::AnalysisTimeout { .. } => {
                "L'analyse du document a pris trop de temps. Réessayez plus tard.".into()
            }
            IngestError::UnreadableDocument { .. } => "PDF non lisible.".into(),
            IngestError::Extraction(_) => "Échec de l'extraction des biomarqueurs.".into(),
            IngestError::ExtractionFormat(_) => "Réponse IA invalide.".into(),
            IngestError::NoDataExtracted => "Aucun biomarqueur trouvé dans ce document.".into(),
            IngestError::Persistence(_) | IngestError::ArtifactUnavailable { .. } => {
                "Erreur base de données".into()
            }
            IngestError::ReportNotFound(_) => "Rapport non trouvé".into(),
            _ => "Erreur serveur".into(),
        }
    }

    /// `true` for the distinguished "needs a password" condition.
    pub fn is_password_required(&self) -> bool {
        matches!(self, IngestError::PasswordRequired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_map_to_client_statuses() {
        assert_eq!(IngestError::Unauthenticated.http_status(), 401);
        assert_eq!(IngestError::Validation("x".into()).http_status(), 400);
        assert_eq!(IngestError::Decryption("bad".into()).http_status(), 400);
        let quota = IngestError::QuotaExceeded {
            owner_id: "u1".into(),
            used: 3,
            limit: 3,
        };
        assert_eq!(quota.http_status(), 403);
        assert!(quota.to_string().contains("3/3"));
    }

    #[test]
    fn pipeline_errors_are_internal() {
        assert_eq!(IngestError::NoDataExtracted.http_status(), 500);
        assert_eq!(
            IngestError::AnalysisTimeout { attempts: 30 }.http_status(),
            500
        );
        assert_eq!(IngestError::Persistence("x".into()).http_status(), 500);
        assert_eq!(IngestError::Extraction("503".into()).http_status(), 500);
    }

    #[test]
    fn unsupported_encryption_is_not_a_wrong_password() {
        let unsupported = IngestError::UnsupportedEncryption("V 7".into());
        let wrong = IngestError::Decryption("incorrect password".into());
        assert_eq!(unsupported.http_status(), 400);
        assert_ne!(unsupported.user_message(), wrong.user_message());
        assert!(!unsupported.user_message().contains("mot de passe"));
    }

    #[test]
    fn extraction_outage_is_not_an_analysis_failure() {
        let outage = IngestError::Extraction("HTTP 500".into());
        let analysis = IngestError::Analysis("HTTP 500".into());
        assert_ne!(outage.user_message(), analysis.user_message());
        assert!(outage.to_string().starts_with("biomarker extraction failed"));
    }

    #[test]
    fn password_required_is_distinct_from_analysis_failure() {
        let pw = IngestError::PasswordRequired;
        let generic = IngestError::Analysis("encrypted".into());
        assert!(pw.is_password_required());
        assert!(!generic.is_password_required());
        assert!(pw.user_message().contains("mot de passe"));
        assert_ne!(pw.user_message(), generic.user_message());
    }

    #[test]
    fn unreadable_display_mentions_threshold() {
        let e = IngestError::UnreadableDocument { chars: 12, min: 50 };
        let msg = e.to_string();
        assert!(msg.contains("12"), "got: {msg}");
        assert!(msg.contains("50"), "got: {msg}");
    }

    #[test]
    fn transition_display_names_both_states() {
        let e = IngestError::InvalidTransition {
            report_id: "r1".into(),
            from: ReportStatus::Completed,
            to: ReportStatus::Processing,
        };
        assert_eq!(
            e.to_string(),
            "report 'r1' cannot move from completed to processing"
        );
    }
}
