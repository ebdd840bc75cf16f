//! Synchronous analysis through a vision LLM.
//!
//! ```text
//! render (pdfium) ──▶ encode (PNG/base64) ──▶ transcribe (VLM) ──▶ join ──▶ validate
//! ```
//!
//! Pages are transcribed concurrently but joined in page order, so tables
//! that span a page break read top to bottom.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::pipeline::analysis::{validate_text, DocumentAnalyzer};
use crate::pipeline::{encode, llm, render};
use async_trait::async_trait;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt, TryStreamExt};
use image::DynamicImage;
use std::sync::Arc;
use tracing::info;

const DEFAULT_VISION_MODEL: &str = "pixtral-12b-2409";

/// [`DocumentAnalyzer`] that transcribes rendered pages with a vision model.
pub struct VisionAnalyzer {
    provider: Arc<dyn LLMProvider>,
    config: IngestConfig,
}

impl VisionAnalyzer {
    pub fn new(provider: Arc<dyn LLMProvider>, config: IngestConfig) -> Self {
        Self { provider, config }
    }

    /// Resolve the provider from the config, most specific first:
    /// an injected provider, then `provider_name` + `model`, then
    /// `ProviderFactory::from_env`.
    pub fn from_config(config: IngestConfig) -> Result<Self, IngestError> {
        let provider = resolve_provider(&config)?;
        Ok(Self::new(provider, config))
    }
}

fn resolve_provider(config: &IngestConfig) -> Result<Arc<dyn LLMProvider>, IngestError> {
    if let Some(provider) = &config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(name) = &config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_VISION_MODEL);
        return ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            IngestError::ProviderNotConfigured {
                provider: name.clone(),
                hint: e.to_string(),
            }
        });
    }

    let (llm, _embedding) =
        ProviderFactory::from_env().map_err(|e| IngestError::ProviderNotConfigured {
            provider: "auto".into(),
            hint: format!(
                "No vision provider could be detected from the environment.\n\
                 Set MISTRAL_API_KEY or OPENAI_API_KEY, or pass --provider.\n\
                 Error: {e}"
            ),
        })?;
    Ok(llm)
}

impl VisionAnalyzer {
    /// Transcribe already-rendered pages and join them in page order.
    async fn transcribe(&self, images: &[DynamicImage]) -> Result<String, IngestError> {
        info!(pages = images.len(), "transcribing pages");

        let encoded = images
            .iter()
            .enumerate()
            .map(|(idx, img)| encode::encode_page(idx + 1, img))
            .collect::<Result<Vec<_>, _>>()?;

        let pages: Vec<String> = stream::iter(encoded.into_iter().enumerate().map(|(idx, image)| {
            let provider = Arc::clone(&self.provider);
            let config = self.config.clone();
            async move { llm::transcribe_page(&provider, idx + 1, image, &config).await }
        }))
        .buffered(self.config.concurrency)
        .try_collect()
        .await?;

        validate_text(&pages.join("\n\n"), self.config.min_text_chars)
    }
}

#[async_trait]
impl DocumentAnalyzer for VisionAnalyzer {
    async fn analyze(&self, pdf: &[u8], password: Option<&str>) -> Result<String, IngestError> {
        let images = render::render_pages(
            pdf,
            password,
            self.config.dpi,
            self.config.max_rendered_pixels,
        )
        .await?;
        self.transcribe(&images).await
    }
}
