//! Vision-model transcription of one page, with retry.
//!
//! Rate-limit and overload errors are routine under concurrent load, so each
//! page is retried with exponential backoff (`retry_backoff_ms * 2^attempt`,
//! at most [`MAX_BACKOFF`]). With the defaults the waits are 500 ms, 1 s, 2 s.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::prompts::TRANSCRIPTION_SYSTEM_PROMPT;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Ceiling for a single retry wait.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Transcribe a rendered page to Markdown.
///
/// The user turn carries only the image; the instructions are in the system
/// message. Fails with [`IngestError::Analysis`] once retries are exhausted.
pub async fn transcribe_page(
    provider: &Arc<dyn LLMProvider>,
    page_num: usize,
    image: ImageData,
    config: &IngestConfig,
) -> Result<String, IngestError> {
    let start = Instant::now();
    let messages = vec![
        ChatMessage::system(TRANSCRIPTION_SYSTEM_PROMPT),
        ChatMessage::user_with_images("", vec![image]),
    ];
    let options = build_options(config);

    let mut last_err = String::from("no attempt made");
    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = retry_backoff(config.retry_backoff_ms, attempt);
            warn!(page = page_num, attempt, backoff_ms = backoff.as_millis() as u64, "retrying page");
            sleep(backoff).await;
        }

        match provider.chat(&messages, Some(&options)).await {
            Ok(response) => {
                debug!(
                    page = page_num,
                    input_tokens = response.prompt_tokens,
                    output_tokens = response.completion_tokens,
                    elapsed = ?start.elapsed(),
                    "page transcribed"
                );
                return Ok(response.content);
            }
            Err(e) => {
                warn!(page = page_num, attempt = attempt + 1, error = %e, "transcription failed");
                last_err = e.to_string();
            }
        }
    }

    Err(IngestError::Analysis(format!(
        "page {page_num} failed after {} retries: {last_err}",
        config.max_retries
    )))
}

/// Wait before retry number `attempt` (1-based).
fn retry_backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_BACKOFF)
}

fn build_options(config: &IngestConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
