//! Domain records shared by every stage of the pipeline.
//!
//! Status enums are closed: serde rejects any value outside the listed
//! variants, so a corrupted row fails loudly on decode instead of flowing
//! through as an unknown state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker written to [`Report::raw_analysis_text`] when a report failed
/// only because its PDF needs a password.
pub const PASSWORD_REQUIRED_MARKER: &str = "PASSWORD_REQUIRED";

// ── Report ───────────────────────────────────────────────────────────────

/// Processing state of a [`Report`].
///
/// The only legal sequence is `Pending → Processing → {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Processing => "processing",
            ReportStatus::Completed => "completed",
            ReportStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Completed | ReportStatus::Failed)
    }

    /// Whether `self → next` is one step forward in the lifecycle.
    pub fn can_transition_to(&self, next: ReportStatus) -> bool {
        matches!(
            (self, next),
            (ReportStatus::Pending, ReportStatus::Processing)
                | (ReportStatus::Processing, ReportStatus::Completed)
                | (ReportStatus::Processing, ReportStatus::Failed)
        )
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One uploaded lab document and its processing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub owner_id: String,
    pub file_name: String,
    /// Object-store key of the (decrypted) artifact.
    pub file_path: String,
    pub lab_name: Option<String>,
    pub report_date: Option<NaiveDate>,
    pub status: ReportStatus,
    /// Truncated analysis text, or [`PASSWORD_REQUIRED_MARKER`].
    pub raw_analysis_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Report {
    /// A fresh `pending` report with a random identifier.
    pub fn new(
        owner_id: impl Into<String>,
        file_name: impl Into<String>,
        file_path: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            file_name: file_name.into(),
            file_path: file_path.into(),
            lab_name: None,
            report_date: None,
            status: ReportStatus::Pending,
            raw_analysis_text: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `true` when the report failed for lack of a password.
    pub fn needs_password(&self) -> bool {
        self.status == ReportStatus::Failed
            && self.raw_analysis_text.as_deref() == Some(PASSWORD_REQUIRED_MARKER)
    }
}

/// Metadata written together with the `completed` transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportCompletion {
    pub lab_name: Option<String>,
    pub report_date: Option<NaiveDate>,
    pub raw_analysis_text: String,
}

// ── Biomarkers ───────────────────────────────────────────────────────────

/// Clinical classification of a measurement against its reference range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiomarkerStatus {
    Normal,
    Low,
    High,
    Critical,
}

impl BiomarkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiomarkerStatus::Normal => "normal",
            BiomarkerStatus::Low => "low",
            BiomarkerStatus::High => "high",
            BiomarkerStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for BiomarkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A measurement as the extractor read it, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomarkerCandidate {
    pub name: String,
    /// Always finite; non-finite candidates never leave the extractor.
    pub value: f64,
    pub unit: Option<String>,
    pub reference_range_text: Option<String>,
    pub reference_min: Option<f64>,
    pub reference_max: Option<f64>,
    pub test_date: Option<NaiveDate>,
}

/// Everything the extractor returns for one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionOutput {
    pub biomarkers: Vec<BiomarkerCandidate>,
    pub lab_name: Option<String>,
    pub report_date: Option<NaiveDate>,
    /// The model's answer as received, kept when no analysis text exists.
    pub raw_response: String,
}

/// One normalized, classified, persisted measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomarkerResult {
    pub report_id: String,
    pub owner_id: String,
    pub name: String,
    pub normalized_name: String,
    pub coding_id: Option<String>,
    pub category: String,
    pub value: f64,
    pub unit: Option<String>,
    pub reference_min: Option<f64>,
    pub reference_max: Option<f64>,
    pub reference_range_text: Option<String>,
    pub status: BiomarkerStatus,
    pub test_date: NaiveDate,
}

// ── Accounts ─────────────────────────────────────────────────────────────

/// Subscription plan; only `Free` is subject to the upload quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Premium,
    Cancelled,
}

/// Per-owner quota bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub owner_id: String,
    pub plan: Plan,
    pub uploads_count: u32,
}

impl Account {
    pub fn free(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            plan: Plan::Free,
            uploads_count: 0,
        }
    }
}

// ── Wire payloads ────────────────────────────────────────────────────────

/// Orchestrator trigger body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub report_id: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Orchestrator reply: `{success, count}` or `{error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessResponse {
    Completed {
        success: bool,
        count: usize,
        #[serde(rename = "labName", default, skip_serializing_if = "Option::is_none")]
        lab_name: Option<String>,
    },
    Failed {
        error: String,
        #[serde(rename = "passwordRequired", default)]
        password_required: bool,
    },
}

/// Gateway success body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub report_id: String,
    pub message: String,
}

/// Error body shared by every endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_only_moves_forward() {
        use ReportStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Completed));
    }

    #[test]
    fn statuses_are_closed_enumerations() {
        let ok: ReportStatus = serde_json::from_str("\"processing\"").unwrap();
        assert_eq!(ok, ReportStatus::Processing);
        assert!(serde_json::from_str::<ReportStatus>("\"archived\"").is_err());
        assert!(serde_json::from_str::<BiomarkerStatus>("\"borderline\"").is_err());
        assert_eq!(
            serde_json::to_string(&BiomarkerStatus::Critical).unwrap(),
            "\"critical\""
        );
    }

    #[test]
    fn process_request_uses_camel_case() {
        let req: ProcessRequest =
            serde_json::from_str(r#"{"reportId":"r1","filePath":"u/1-a.pdf"}"#).unwrap();
        assert_eq!(req.report_id, "r1");
        assert_eq!(req.password, None);
    }

    #[test]
    fn process_response_shapes() {
        let ok = ProcessResponse::Completed {
            success: true,
            count: 4,
            lab_name: None,
        };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({"success": true, "count": 4})
        );

        let failed: ProcessResponse =
            serde_json::from_str(r#"{"error":"PDF non lisible."}"#).unwrap();
        assert_eq!(
            failed,
            ProcessResponse::Failed {
                error: "PDF non lisible.".into(),
                password_required: false
            }
        );
    }

    #[test]
    fn new_report_is_pending() {
        let r = Report::new("u1", "bilan.pdf", "u1/1-bilan.pdf");
        assert_eq!(r.status, ReportStatus::Pending);
        assert!(!r.needs_password());
        assert!(!r.id.is_empty());
    }
}
