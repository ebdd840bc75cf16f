//! Configuration for the ingestion pipeline.
//!
//! Every tunable lives in [`IngestConfig`], built via
//! [`IngestConfigBuilder`]. Provider credentials are kept apart in
//! [`ProviderSettings`] because they come from the environment and must never
//! be logged.

use crate::error::IngestError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for gateway, orchestrator and analysis adapters.
///
/// # Example
/// ```rust
/// use labtrack_ingest::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .free_upload_limit(5)
///     .max_poll_attempts(10)
///     .build()
///     .unwrap();
/// assert_eq!(config.free_upload_limit, 5);
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Largest accepted upload in bytes. Default: 10 MiB.
    pub max_upload_bytes: usize,

    /// Uploads allowed on the free plan. Default: 3.
    pub free_upload_limit: u32,

    /// Delay between two polls of an asynchronous analysis job. Default: 2000 ms.
    pub poll_interval_ms: u64,

    /// Poll attempts before the job is declared timed out. Default: 30.
    pub max_poll_attempts: u32,

    /// Extracted text shorter than this is treated as unreadable. Default: 50.
    pub min_text_chars: usize,

    /// Characters of analysis text kept on the report row. Default: 50 000.
    pub raw_text_limit: usize,

    /// What happens to a report whose pipeline fails. Default: mark failed.
    pub failure_policy: FailurePolicy,

    /// Vision model identifier, e.g. "pixtral-12b-2409". If None, uses provider default.
    pub model: Option<String>,

    /// Vision provider name (e.g. "openai", "mistral").
    pub provider_name: Option<String>,

    /// Pre-constructed vision provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for transcription and extraction. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per call. Default: 4096.
    pub max_tokens: usize,

    /// Retries per page in vision mode. Range: 0–10. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Rendering DPI for vision mode. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Longest rendered edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Concurrent page transcriptions in vision mode. Default: 4.
    pub concurrency: usize,

    /// Per-request HTTP timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom extraction system prompt. If None, uses the built-in prompt.
    pub extraction_prompt: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
            free_upload_limit: 3,
            poll_interval_ms: 2000,
            max_poll_attempts: 30,
            min_text_chars: 50,
            raw_text_limit: 50_000,
            failure_policy: FailurePolicy::default(),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            dpi: 150,
            max_rendered_pixels: 2000,
            concurrency: 4,
            api_timeout_secs: 60,
            extraction_prompt: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("free_upload_limit", &self.free_upload_limit)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_poll_attempts", &self.max_poll_attempts)
            .field("min_text_chars", &self.min_text_chars)
            .field("raw_text_limit", &self.raw_text_limit)
            .field("failure_policy", &self.failure_policy)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("dpi", &self.dpi)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn free_upload_limit(mut self, n: u32) -> Self {
        self.config.free_upload_limit = n;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn max_poll_attempts(mut self, n: u32) -> Self {
        self.config.max_poll_attempts = n;
        self
    }

    pub fn min_text_chars(mut self, n: usize) -> Self {
        self.config.min_text_chars = n;
        self
    }

    pub fn raw_text_limit(mut self, n: usize) -> Self {
        self.config.raw_text_limit = n;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(10);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = Some(prompt.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.max_upload_bytes == 0 {
            return Err(IngestError::InvalidConfig(
                "max_upload_bytes must be ≥ 1".into(),
            ));
        }
        if c.max_poll_attempts == 0 {
            return Err(IngestError::InvalidConfig(
                "max_poll_attempts must be ≥ 1".into(),
            ));
        }
        if c.raw_text_limit == 0 {
            return Err(IngestError::InvalidConfig(
                "raw_text_limit must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

/// How the orchestrator leaves a report whose pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep the row, drop partial results, set status `failed`. (default)
    #[default]
    MarkFailed,
    /// Delete the stored artifact and the report row entirely.
    Rollback,
}

/// Credentials and endpoints of the external analysis providers.
#[derive(Clone, Default)]
pub struct ProviderSettings {
    pub layout_endpoint: Option<String>,
    pub layout_key: Option<String>,
    pub azure_openai_base: Option<String>,
    pub azure_openai_key: Option<String>,
    pub azure_openai_deployment: Option<String>,
    pub mistral_key: Option<String>,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("ProviderSettings")
            .field("layout_endpoint", &self.layout_endpoint)
            .field("layout_key", &set(&self.layout_key))
            .field("azure_openai_base", &self.azure_openai_base)
            .field("azure_openai_key", &set(&self.azure_openai_key))
            .field("azure_openai_deployment", &self.azure_openai_deployment)
            .field("mistral_key", &set(&self.mistral_key))
            .finish()
    }
}

impl ProviderSettings {
    /// Read every provider variable; empty values count as unset.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            layout_endpoint: var("AZURE_OCR_ENDPOINT"),
            layout_key: var("AZURE_OCR_KEY"),
            azure_openai_base: var("AZURE_OPENAI_API_BASE"),
            azure_openai_key: var("AZURE_OPENAI_API_KEY"),
            azure_openai_deployment: var("AZURE_OPENAI_DEPLOYMENT_NAME"),
            mistral_key: var("MISTRAL_API_KEY"),
        }
    }

    /// `(endpoint, key)` for the layout-analysis service.
    pub fn layout(&self) -> Result<(&str, &str), IngestError> {
        match (&self.layout_endpoint, &self.layout_key) {
            (Some(endpoint), Some(key)) => Ok((endpoint, key)),
            _ => Err(IngestError::ProviderNotConfigured {
                provider: "azure-layout".into(),
                hint: "Set AZURE_OCR_ENDPOINT and AZURE_OCR_KEY.".into(),
            }),
        }
    }

    /// `(base, key, deployment)` for the Azure OpenAI extractor.
    pub fn azure_openai(&self) -> Result<(&str, &str, &str), IngestError> {
        match (
            &self.azure_openai_base,
            &self.azure_openai_key,
            &self.azure_openai_deployment,
        ) {
            (Some(base), Some(key), Some(deployment)) => Ok((base, key, deployment)),
            _ => Err(IngestError::ProviderNotConfigured {
                provider: "azure-openai".into(),
                hint: "Set AZURE_OPENAI_API_BASE, AZURE_OPENAI_API_KEY and \
                       AZURE_OPENAI_DEPLOYMENT_NAME."
                    .into(),
            }),
        }
    }

    pub fn mistral(&self) -> Result<&str, IngestError> {
        self.mistral_key
            .as_deref()
            .ok_or_else(|| IngestError::ProviderNotConfigured {
                provider: "mistral".into(),
                hint: "Set MISTRAL_API_KEY.".into(),
            })
    }
}
