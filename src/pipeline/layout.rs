//! Asynchronous layout analysis (Azure Document Intelligence).
//!
//! Submission posts the PDF to the `prebuilt-layout` model with markdown
//! output, which keeps result tables as tables. The service answers
//! `202 Accepted` with an `operation-location` header; that URL is the
//! job handle polled by [`crate::pipeline::analysis::JobAnalyzer`].

use crate::config::ProviderSettings;
use crate::error::IngestError;
use crate::pipeline::analysis::{JobBackend, JobStatus};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const API_VERSION: &str = "2024-11-30";
const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// [`JobBackend`] for the Document Intelligence layout model.
#[derive(Debug, Clone)]
pub struct LayoutJobBackend {
    client: reqwest::Client,
    endpoint: String,
    key: String,
}

impl LayoutJobBackend {
    pub fn new(endpoint: impl Into<String>, key: impl Into<String>, timeout: Duration) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::Internal(format!("http client: {e}")))?;
        let mut endpoint = endpoint.into();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        Ok(Self {
            client,
            endpoint,
            key: key.into(),
        })
    }

    pub fn from_settings(settings: &ProviderSettings, timeout: Duration) -> Result<Self, IngestError> {
        let (endpoint, key) = settings.layout()?;
        Self::new(endpoint, key, timeout)
    }

    pub fn analyze_url(&self) -> String {
        format!(
            "{}documentintelligence/documentModels/prebuilt-layout:analyze?api-version={API_VERSION}&outputContentFormat=markdown",
            self.endpoint
        )
    }
}

#[derive(Debug, Deserialize)]
struct OperationBody {
    status: String,
    #[serde(rename = "analyzeResult")]
    analyze_result: Option<AnalyzeResult>,
    error: Option<ServiceError>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    innererror: Option<Box<ServiceError>>,
}

impl ServiceError {
    fn describe(&self) -> String {
        match &self.innererror {
            Some(inner) if !inner.message.is_empty() => {
                format!("{} ({})", self.message, inner.describe())
            }
            _ => self.message.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ServiceError,
}

/// Prefer the service's own message over the raw body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|env| env.error.describe())
        .unwrap_or_else(|_| body.trim().to_string())
}

#[async_trait]
impl JobBackend for LayoutJobBackend {
    async fn submit(&self, pdf: &[u8]) -> Result<String, IngestError> {
        let response = self
            .client
            .post(self.analyze_url())
            .header(KEY_HEADER, &self.key)
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .body(pdf.to_vec())
            .send()
            .await
            .map_err(|e| IngestError::Analysis(format!("layout submit: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Analysis(format!(
                "layout service returned {status}: {}",
                error_detail(&body)
            )));
        }

        let handle = response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                IngestError::Analysis("layout service sent no operation-location".into())
            })?;
        debug!(%handle, bytes = pdf.len(), "layout job accepted");
        Ok(handle)
    }

    async fn poll(&self, handle: &str) -> Result<JobStatus, IngestError> {
        let response = self
            .client
            .get(handle)
            .header(KEY_HEADER, &self.key)
            .send()
            .await
            .map_err(|e| IngestError::Analysis(format!("layout poll: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Analysis(format!(
                "layout poll returned {status}: {}",
                error_detail(&body)
            )));
        }

        let body: OperationBody = response
            .json()
            .await
            .map_err(|e| IngestError::Analysis(format!("layout poll body: {e}")))?;

        match body.status.to_ascii_lowercase().as_str() {
            "succeeded" => Ok(JobStatus::Succeeded(
                body.analyze_result.map(|r| r.content).unwrap_or_default(),
            )),
            "failed" | "canceled" => Ok(JobStatus::Failed(
                body.error
                    .map(|e| e.describe())
                    .unwrap_or_else(|| format!("layout job {}", body.status)),
            )),
            "notstarted" | "running" => Ok(JobStatus::Running),
            other => Err(IngestError::Analysis(format!(
                "layout job reported unknown status '{other}'"
            ))),
        }
    }
}
