//! Document analysis: turn PDF bytes into plain, table-annotated text.
//!
//! Every provider is reached through [`DocumentAnalyzer`]. Providers that
//! work as long-running jobs implement the smaller [`JobBackend`] trait and
//! are driven by [`JobAnalyzer`], which owns the bounded polling loop:
//!
//! ```text
//! submit ──▶ sleep ──▶ poll ─┬─ running   ──▶ sleep ──▶ poll …
//!                            ├─ succeeded ──▶ clean ──▶ validate
//!                            └─ failed    ──▶ Analysis error
//! ```
//!
//! The loop sleeps through a [`Sleeper`] so tests replace wall-clock time
//! with a no-op.

use crate::error::IngestError;
use crate::pipeline::postprocess::clean_text;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Extracts text from a document.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    /// Return cleaned text of at least the plausibility threshold.
    ///
    /// `password` is forwarded to providers that can open protected files.
    async fn analyze(&self, pdf: &[u8], password: Option<&str>) -> Result<String, IngestError>;
}

/// State of a submitted analysis job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded(String),
    Failed(String),
}

/// An asynchronous analysis provider.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Submit the document and return the operation handle.
    async fn submit(&self, pdf: &[u8]) -> Result<String, IngestError>;

    async fn poll(&self, handle: &str) -> Result<JobStatus, IngestError>;
}

/// Source of delays for the polling loop.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately. For tests and dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSleep;

#[async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _duration: Duration) {}
}

/// Polls a [`JobBackend`] at a fixed interval up to a hard attempt ceiling.
pub struct JobAnalyzer {
    backend: Arc<dyn JobBackend>,
    sleeper: Arc<dyn Sleeper>,
    interval: Duration,
    max_attempts: u32,
    min_chars: usize,
}

impl JobAnalyzer {
    pub fn new(backend: Arc<dyn JobBackend>) -> Self {
        Self {
            backend,
            sleeper: Arc::new(TokioSleeper),
            interval: Duration::from_secs(2),
            max_attempts: 30,
            min_chars: 50,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.interval = interval;
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = min_chars;
        self
    }
}

#[async_trait]
impl DocumentAnalyzer for JobAnalyzer {
    async fn analyze(&self, pdf: &[u8], password: Option<&str>) -> Result<String, IngestError> {
        let handle = self
            .backend
            .submit(pdf)
            .await
            .map_err(|e| classify_protection(e, password))?;
        debug!(%handle, "analysis job submitted");

        for attempt in 1..=self.max_attempts {
            self.sleeper.sleep(self.interval).await;
            match self.backend.poll(&handle).await? {
                JobStatus::Running => {
                    debug!(attempt, max = self.max_attempts, "analysis still running");
                }
                JobStatus::Succeeded(text) => {
                    info!(attempt, chars = text.chars().count(), "analysis succeeded");
                    return validate_text(&text, self.min_chars);
                }
                JobStatus::Failed(reason) => {
                    warn!(attempt, %reason, "analysis job failed");
                    return Err(classify_protection(IngestError::Analysis(reason), password));
                }
            }
        }

        Err(IngestError::AnalysisTimeout {
            attempts: self.max_attempts,
        })
    }
}

/// Clean provider output and reject implausibly short text.
pub fn validate_text(raw: &str, min_chars: usize) -> Result<String, IngestError> {
    let text = clean_text(raw);
    let chars = text.chars().count();
    if chars < min_chars {
        return Err(IngestError::UnreadableDocument {
            chars,
            min: min_chars,
        });
    }
    Ok(text)
}

/// Turn a provider's protection complaint into [`IngestError::PasswordRequired`]
/// when the caller supplied no password.
pub fn classify_protection(err: IngestError, password: Option<&str>) -> IngestError {
    let IngestError::Analysis(message) = &err else {
        return err;
    };
    let lower = message.to_lowercase();
    let protected = ["password", "encrypt", "decrypt", "protected"]
        .iter()
        .any(|needle| lower.contains(needle));
    match (protected, password.is_some()) {
        (true, false) => IngestError::PasswordRequired,
        (true, true) => IngestError::Decryption(message.clone()),
        _ => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    const TABLE: &str = "| Analyse | Résultat | Unité | Référence |\n\
                         | --- | --- | --- | --- |\n\
                         | Glycémie | 0,95 | g/L | 0,70-1,10 |";

    struct Scripted {
        polls: Mutex<Vec<JobStatus>>,
        submit_error: Option<String>,
        poll_count: AtomicU32,
    }

    impl Scripted {
        fn new(mut polls: Vec<JobStatus>) -> Self {
            polls.reverse();
            Self {
                polls: Mutex::new(polls),
                submit_error: None,
                poll_count: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl JobBackend for Scripted {
        async fn submit(&self, _pdf: &[u8]) -> Result<String, IngestError> {
            match &self.submit_error {
                Some(msg) => Err(IngestError::Analysis(msg.clone())),
                None => Ok("op-1".into()),
            }
        }

        async fn poll(&self, handle: &str) -> Result<JobStatus, IngestError> {
            assert_eq!(handle, "op-1");
            self.poll_count.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .polls
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(JobStatus::Running))
        }
    }

    fn analyzer(backend: Arc<Scripted>, attempts: u32) -> JobAnalyzer {
        JobAnalyzer::new(backend)
            .with_sleeper(Arc::new(NoSleep))
            .with_polling(Duration::from_millis(1), attempts)
    }

    #[tokio::test]
    async fn running_then_succeeded() {
        let backend = Arc::new(Scripted::new(vec![
            JobStatus::Running,
            JobStatus::Running,
            JobStatus::Succeeded(TABLE.into()),
        ]));
        let text = analyzer(backend.clone(), 30)
            .analyze(b"%PDF", None)
            .await
            .unwrap();
        assert!(text.contains("Glycémie"));
        assert_eq!(backend.poll_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_job_is_analysis_error() {
        let backend = Arc::new(Scripted::new(vec![JobStatus::Failed("bad layout".into())]));
        let err = analyzer(backend, 30).analyze(b"%PDF", None).await.unwrap_err();
        assert!(matches!(err, IngestError::Analysis(_)));
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let backend = Arc::new(Scripted::new(vec![]));
        let err = analyzer(backend.clone(), 5)
            .analyze(b"%PDF", None)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::AnalysisTimeout { attempts: 5 }));
        assert_eq!(backend.poll_count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn short_text_is_unreadable() {
        let backend = Arc::new(Scripted::new(vec![JobStatus::Succeeded("Page 1".into())]));
        let err = analyzer(backend, 30).analyze(b"%PDF", None).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::UnreadableDocument { chars: 6, min: 50 }
        ));
    }

    #[tokio::test]
    async fn protected_document_without_password() {
        let mut scripted = Scripted::new(vec![]);
        scripted.submit_error = Some("The file is password protected".into());
        let err = analyzer(Arc::new(scripted), 30)
            .analyze(b"%PDF", None)
            .await
            .unwrap_err();
        assert!(err.is_password_required());
    }

    #[test]
    fn classify_leaves_unrelated_errors_alone() {
        let err = classify_protection(IngestError::Analysis("HTTP 503".into()), None);
        assert!(matches!(err, IngestError::Analysis(_)));

        let wrong = classify_protection(
            IngestError::Analysis("Invalid password".into()),
            Some("guess"),
        );
        assert!(matches!(wrong, IngestError::Decryption(_)));
    }

    #[test]
    fn threshold_counts_characters_not_bytes() {
        let accented = "é".repeat(50);
        assert!(validate_text(&accented, 50).is_ok());
        assert!(validate_text(&"é".repeat(49), 50).is_err());
    }
}
