//! Structured biomarker extraction with a JSON-mode language model.
//!
//! The model answers one JSON object:
//!
//! ```json
//! {"biomarkers":[{"biomarker_name":"Glycémie","value":0.95,"unit":"g/L",
//!   "reference_range_text":"0,70-1,10","reference_min":0.7,"reference_max":1.1}],
//!  "lab_name":"Cerballiance","report_date":"2024-03-12"}
//! ```
//!
//! Parsing is strict about the envelope and lenient about entries: an answer
//! that is not a JSON object is an [`IngestError::ExtractionFormat`], while a
//! single entry with no name or a non-numeric value is dropped on its own.

use crate::config::{IngestConfig, ProviderSettings};
use crate::error::IngestError;
use crate::model::{BiomarkerCandidate, ExtractionOutput};
use crate::pipeline::postprocess::strip_json_fence;
use crate::prompts::{
    extraction_user_message, EXTRACTION_DOCUMENT_INSTRUCTION, EXTRACTION_SYSTEM_PROMPT,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

const AZURE_API_VERSION: &str = "2024-08-01-preview";
const MISTRAL_URL: &str = "https://api.mistral.ai/v1/chat/completions";
pub const DEFAULT_MISTRAL_MODEL: &str = "pixtral-12b-2409";

/// What the extractor reads.
#[derive(Debug, Clone, Copy)]
pub enum ExtractionInput<'a> {
    /// Cleaned analysis text.
    Text(&'a str),
    /// The PDF itself, for models that read documents directly.
    Document(&'a [u8]),
}

/// Turns a document or its text into biomarker candidates.
#[async_trait]
pub trait BiomarkerExtractor: Send + Sync {
    async fn extract(&self, input: ExtractionInput<'_>) -> Result<ExtractionOutput, IngestError>;
}

/// How the endpoint authenticates.
#[derive(Clone)]
pub enum AuthStyle {
    /// Azure OpenAI `api-key` header.
    ApiKey(String),
    /// `Authorization: Bearer`.
    Bearer(String),
}

impl std::fmt::Debug for AuthStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthStyle::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            AuthStyle::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

/// [`BiomarkerExtractor`] over an OpenAI-compatible `/chat/completions`
/// endpoint in `json_object` response mode.
#[derive(Debug, Clone)]
pub struct ChatCompletionsExtractor {
    client: reqwest::Client,
    url: String,
    auth: AuthStyle,
    model: Option<String>,
    temperature: f32,
    max_tokens: usize,
    system_prompt: String,
}

impl ChatCompletionsExtractor {
    pub fn new(url: impl Into<String>, auth: AuthStyle, timeout: Duration) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            auth,
            model: None,
            temperature: 0.1,
            max_tokens: 4096,
            system_prompt: EXTRACTION_SYSTEM_PROMPT.to_string(),
        })
    }

    /// Azure OpenAI deployment; the deployment name selects the model.
    pub fn azure(base: &str, key: &str, deployment: &str, timeout: Duration) -> Result<Self, IngestError> {
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        };
        let url = format!(
            "{base}openai/deployments/{deployment}/chat/completions?api-version={AZURE_API_VERSION}"
        );
        Self::new(url, AuthStyle::ApiKey(key.to_string()), timeout)
    }

    pub fn mistral(key: &str, model: &str, timeout: Duration) -> Result<Self, IngestError> {
        Ok(Self::new(MISTRAL_URL, AuthStyle::Bearer(key.to_string()), timeout)?.with_model(model))
    }

    /// Build from the environment: Azure OpenAI when configured, else Mistral.
    pub fn from_settings(settings: &ProviderSettings, config: &IngestConfig) -> Result<Self, IngestError> {
        let extractor = match settings.azure_openai() {
            Ok((base, key, deployment)) => Self::azure(base, key, deployment, config.api_timeout())?,
            Err(azure_err) => match settings.mistral() {
                Ok(key) => Self::mistral(
                    key,
                    config.model.as_deref().unwrap_or(DEFAULT_MISTRAL_MODEL),
                    config.api_timeout(),
                )?,
                Err(_) => return Err(azure_err),
            },
        };
        Ok(extractor.with_options(config))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Apply temperature, token limit and prompt override from the config.
    pub fn with_options(mut self, config: &IngestConfig) -> Self {
        self.temperature = config.temperature;
        self.max_tokens = config.max_tokens;
        if let Some(prompt) = &config.extraction_prompt {
            self.system_prompt = prompt.clone();
        }
        self
    }

    fn request_body(&self, input: ExtractionInput<'_>) -> Value {
        let user = match input {
            ExtractionInput::Text(text) => json!({
                "role": "user",
                "content": extraction_user_message(text),
            }),
            ExtractionInput::Document(pdf) => json!({
                "role": "user",
                "content": [
                    { "type": "text", "text": EXTRACTION_DOCUMENT_INSTRUCTION },
                    {
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:application/pdf;base64,{}", STANDARD.encode(pdf))
                        }
                    }
                ],
            }),
        };

        let mut body = json!({
            "messages": [
                { "role": "system", "content": self.system_prompt },
                user,
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": { "type": "json_object" },
        });
        if let Some(model) = &self.model {
            body["model"] = json!(model);
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl BiomarkerExtractor for ChatCompletionsExtractor {
    async fn extract(&self, input: ExtractionInput<'_>) -> Result<ExtractionOutput, IngestError> {
        let body = self.request_body(input);
        let request = self.client.post(&self.url).json(&body);
        let request = match &self.auth {
            AuthStyle::ApiKey(key) => request.header("api-key", key),
            AuthStyle::Bearer(key) => request.bearer_auth(key),
        };

        let response = request
            .send()
            .await
            .map_err(|e| IngestError::Extraction(format!("extraction request: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "extraction endpoint rejected the request");
            return Err(IngestError::Extraction(format!(
                "extraction endpoint returned {status}: {}",
                text.trim()
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| IngestError::ExtractionFormat(format!("completion envelope: {e}")))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!(chars = content.len(), "extraction answer received");

        let output = parse_extraction(&content)?;
        info!(
            biomarkers = output.biomarkers.len(),
            lab = output.lab_name.as_deref().unwrap_or("-"),
            "biomarkers extracted"
        );
        Ok(output)
    }
}

/// Parse a model answer into candidates.
///
/// Fails with [`IngestError::ExtractionFormat`] when the answer is not a JSON
/// object and with [`IngestError::NoDataExtracted`] when no entry survives.
pub fn parse_extraction(content: &str) -> Result<ExtractionOutput, IngestError> {
    let json = strip_json_fence(content);
    let root: Value = serde_json::from_str(json)
        .map_err(|e| IngestError::ExtractionFormat(e.to_string()))?;
    let Value::Object(root) = root else {
        return Err(IngestError::ExtractionFormat(
            "top-level value is not an object".into(),
        ));
    };

    let entries = match root.get("biomarkers") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => {
            return Err(IngestError::ExtractionFormat(
                "`biomarkers` is not an array".into(),
            ))
        }
    };

    let total = entries.len();
    let biomarkers: Vec<BiomarkerCandidate> = entries.iter().filter_map(candidate).collect();
    if biomarkers.len() < total {
        debug!(dropped = total - biomarkers.len(), "unusable entries dropped");
    }
    if biomarkers.is_empty() {
        return Err(IngestError::NoDataExtracted);
    }

    Ok(ExtractionOutput {
        biomarkers,
        lab_name: text_field(root.get("lab_name")),
        report_date: date_field(root.get("report_date")),
        raw_response: content.to_string(),
    })
}

fn candidate(entry: &Value) -> Option<BiomarkerCandidate> {
    let obj = entry.as_object()?;
    let name = text_field(obj.get("biomarker_name").or_else(|| obj.get("name")))?;
    let value = finite(obj.get("value"))?;
    Some(BiomarkerCandidate {
        name,
        value,
        unit: text_field(obj.get("unit")),
        reference_range_text: text_field(obj.get("reference_range_text")),
        reference_min: finite(obj.get("reference_min")),
        reference_max: finite(obj.get("reference_max")),
        test_date: date_field(obj.get("test_date")),
    })
}

/// A JSON number that is finite. Strings are not coerced.
fn finite(v: Option<&Value>) -> Option<f64> {
    v?.as_f64().filter(|x| x.is_finite())
}

/// Non-blank string, or a number rendered as text.
fn text_field(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn date_field(v: Option<&Value>) -> Option<NaiveDate> {
    let s = v?.as_str()?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    const ANSWER: &str = r#"{"biomarkers":[
        {"biomarker_name":"Glycémie","value":0.95,"unit":"g/L","reference_range_text":"0,70-1,10","reference_min":0.7,"reference_max":1.1},
        {"biomarker_name":"Plaquettes","value":250,"unit":"G/L","reference_min":150,"reference_max":400,"test_date":"2024-03-10"}
    ],"lab_name":"Cerballiance","report_date":"2024-03-12"}"#;

    #[test]
    fn parses_well_formed_answer() {
        let out = parse_extraction(ANSWER).unwrap();
        assert_eq!(out.biomarkers.len(), 2);
        assert_eq!(out.lab_name.as_deref(), Some("Cerballiance"));
        assert_eq!(out.report_date, NaiveDate::from_ymd_opt(2024, 3, 12));
        let platelets = &out.biomarkers[1];
        assert_eq!(platelets.value, 250.0);
        assert_eq!(platelets.test_date, NaiveDate::from_ymd_opt(2024, 3, 10));
    }

    #[test]
    fn drops_entries_without_name_or_numeric_value() {
        let out = parse_extraction(
            r#"{"biomarkers":[
                {"biomarker_name":"","value":1.0},
                {"biomarker_name":"CRP","value":"1,85"},
                {"biomarker_name":"Ferritine","value":null},
                {"value":4.2},
                {"biomarker_name":"Urée","value":5.1}
            ]}"#,
        )
        .unwrap();
        assert_eq!(out.biomarkers.len(), 1);
        assert_eq!(out.biomarkers[0].name, "Urée");
    }

    #[test]
    fn empty_list_is_no_data() {
        assert!(matches!(
            parse_extraction(r#"{"biomarkers":[]}"#),
            Err(IngestError::NoDataExtracted)
        ));
        assert!(matches!(
            parse_extraction("{}"),
            Err(IngestError::NoDataExtracted)
        ));
    }

    #[test]
    fn malformed_answers_are_format_errors() {
        for bad in ["", "not json", "[1,2,3]", r#"{"biomarkers":"many"}"#] {
            assert!(
                matches!(parse_extraction(bad), Err(IngestError::ExtractionFormat(_))),
                "{bad:?} should be a format error"
            );
        }
    }

    #[test]
    fn fenced_answer_is_unwrapped() {
        let fenced = format!("```json\n{ANSWER}\n```");
        assert_eq!(parse_extraction(&fenced).unwrap().biomarkers.len(), 2);
    }

    #[test]
    fn non_string_bounds_and_bad_dates_are_ignored() {
        let out = parse_extraction(
            r#"{"biomarkers":[{"biomarker_name":"TSH","value":2.1,"reference_min":"0,4","test_date":"12/03/2024"}],"report_date":"bientôt"}"#,
        )
        .unwrap();
        let tsh = &out.biomarkers[0];
        assert_eq!(tsh.reference_min, None);
        assert_eq!(tsh.test_date, None);
        assert_eq!(out.report_date, None);
    }

    #[test]
    fn document_input_is_inlined_as_data_url() {
        let ex = ChatCompletionsExtractor::new("http://localhost/x", AuthStyle::Bearer("k".into()), Duration::from_secs(1))
            .unwrap()
            .with_model("pixtral-12b-2409");
        let body = ex.request_body(ExtractionInput::Document(b"%PDF"));
        let url = body["messages"][1]["content"][1]["image_url"]["url"]
            .as_str()
            .unwrap();
        assert_eq!(url, "data:application/pdf;base64,JVBERg==");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["model"], "pixtral-12b-2409");
    }

    fn completion(content: &str) -> String {
        json!({ "choices": [ { "message": { "role": "assistant", "content": content } } ] })
            .to_string()
    }

    #[tokio::test]
    async fn azure_flavour_uses_api_key_header() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Regex("openai/deployments/gpt-4o/chat/completions".into()))
            .match_header("api-key", "secret")
            .match_body(Matcher::PartialJson(json!({
                "response_format": { "type": "json_object" }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion(ANSWER))
            .create_async()
            .await;

        let ex = ChatCompletionsExtractor::azure(&server.url(), "secret", "gpt-4o", Duration::from_secs(5)).unwrap();
        let out = ex.extract(ExtractionInput::Text("| Glycémie | 0,95 |")).await.unwrap();
        assert_eq!(out.biomarkers.len(), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn bearer_flavour_and_http_errors() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer mk")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let ex = ChatCompletionsExtractor::new(
            format!("{}/v1/chat/completions", server.url()),
            AuthStyle::Bearer("mk".into()),
            Duration::from_secs(5),
        )
        .unwrap();
        let err = ex.extract(ExtractionInput::Text("x")).await.unwrap_err();
        assert!(matches!(err, IngestError::Extraction(_)));
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn server_error_and_unreachable_endpoint_are_extraction_failures() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", Matcher::Any)
            .with_status(500)
            .with_body("upstream exploded")
            .create_async()
            .await;

        let ex = ChatCompletionsExtractor::new(server.url(), AuthStyle::ApiKey("k".into()), Duration::from_secs(5)).unwrap();
        let err = ex.extract(ExtractionInput::Text("x")).await.unwrap_err();
        assert!(matches!(err, IngestError::Extraction(_)), "got: {err}");
        assert!(err.to_string().contains("500"));
        assert_ne!(err.user_message(), IngestError::Analysis(String::new()).user_message());

        let ex = ChatCompletionsExtractor::new(
            "http://127.0.0.1:1/chat/completions",
            AuthStyle::ApiKey("k".into()),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = ex.extract(ExtractionInput::Text("x")).await.unwrap_err();
        assert!(matches!(err, IngestError::Extraction(_)), "got: {err}");
    }

    #[tokio::test]
    async fn non_json_content_is_format_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", Matcher::Any)
            .with_status(200)
            .with_body(completion("Voici les résultats : glycémie normale."))
            .create_async()
            .await;

        let ex = ChatCompletionsExtractor::new(server.url(), AuthStyle::ApiKey("k".into()), Duration::from_secs(5)).unwrap();
        let err = ex.extract(ExtractionInput::Text("x")).await.unwrap_err();
        assert!(matches!(err, IngestError::ExtractionFormat(_)));
    }
}
