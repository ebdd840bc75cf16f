//! PDF decryption: strip password protection before analysis.
//!
//! Two backends sit behind [`PdfDecryptor`]:
//!
//! - [`QpdfDecryptor`] shells out to `qpdf --decrypt`, staging input and
//!   output in a [`tempfile::TempDir`] that is removed on drop, whichever
//!   way the call exits. It opens every standard security handler (RC4,
//!   AES-128, AES-256) and is the default.
//! - [`LopdfDecryptor`] works in-process with `lopdf`. It opens documents
//!   that only carry an owner password, whatever the cipher, and checks a
//!   user password without needing anything installed on the host.
//!
//! [`default_decryptor`] chains them: qpdf first, lopdf when the `qpdf`
//! binary is not installed.
//!
//! A wrong password is an [`IngestError::Decryption`]; a handler or cipher
//! the backend cannot open is an [`IngestError::UnsupportedEncryption`].
//! Neither ever returns partial output.

use crate::error::IngestError;
use async_trait::async_trait;
use lopdf::encryption::DecryptionError;
use lopdf::{Document, Object};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tracing::{debug, warn};

/// Removes password protection from PDF bytes.
#[async_trait]
pub trait PdfDecryptor: Send + Sync {
    /// Return plaintext PDF bytes. An unencrypted input comes back unchanged.
    async fn decrypt(&self, bytes: &[u8], password: &str) -> Result<Vec<u8>, IngestError>;
}

/// qpdf with an in-process lopdf fallback.
pub fn default_decryptor() -> Arc<dyn PdfDecryptor> {
    Arc::new(QpdfDecryptor::default().with_fallback(Arc::new(LopdfDecryptor)))
}

/// `true` when the document cannot be opened without a user password.
///
/// Only a rejected empty password counts. Documents protected by an owner
/// password alone, unparseable input and encryption schemes `lopdf` does
/// not understand all return `false`.
pub async fn is_password_protected(bytes: &[u8]) -> bool {
    let owned = bytes.to_vec();
    tokio::task::spawn_blocking(move || {
        let document = match Document::load_mem(&owned) {
            Ok(document) => document,
            Err(e) => {
                debug!("cannot parse document to check encryption: {e}");
                return false;
            }
        };
        if !document.is_encrypted() {
            return false;
        }
        match document.authenticate_password("") {
            Ok(()) => false,
            Err(e) if is_incorrect_password(&e) => true,
            Err(e) => {
                debug!("cannot check encryption: {e}");
                false
            }
        }
    })
    .await
    .unwrap_or(false)
}

fn is_incorrect_password(err: &lopdf::Error) -> bool {
    matches!(
        err,
        lopdf::Error::Decryption(DecryptionError::IncorrectPassword)
    )
}

fn authentication_error(err: lopdf::Error) -> IngestError {
    match err {
        lopdf::Error::Decryption(DecryptionError::IncorrectPassword) => {
            IngestError::Decryption("incorrect password".into())
        }
        lopdf::Error::UnsupportedSecurityHandler(handler) => IngestError::UnsupportedEncryption(
            format!("security handler /{}", String::from_utf8_lossy(&handler)),
        ),
        lopdf::Error::Decryption(
            e @ (DecryptionError::UnsupportedEncryption
            | DecryptionError::UnsupportedVersion
            | DecryptionError::UnsupportedRevision
            | DecryptionError::InvalidVersion
            | DecryptionError::InvalidRevision
            | DecryptionError::InvalidKeyLength),
        ) => IngestError::UnsupportedEncryption(e.to_string()),
        other => IngestError::Decryption(format!("corrupt encryption dictionary: {other}")),
    }
}

// ── lopdf ────────────────────────────────────────────────────────────────

/// In-process decryption with `lopdf`.
///
/// The loader applies the empty password itself, so owner-only documents
/// come back decrypted. A document that needs a user password is
/// authenticated but not rewritten; it fails with
/// [`IngestError::UnsupportedEncryption`] and is left to qpdf.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfDecryptor;

#[async_trait]
impl PdfDecryptor for LopdfDecryptor {
    async fn decrypt(&self, bytes: &[u8], password: &str) -> Result<Vec<u8>, IngestError> {
        let owned = bytes.to_vec();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || decrypt_blocking(&owned, &password))
            .await
            .map_err(|e| IngestError::Internal(format!("decrypt task panicked: {e}")))?
    }
}

fn decrypt_blocking(bytes: &[u8], password: &str) -> Result<Vec<u8>, IngestError> {
    let mut document = Document::load_mem(bytes)
        .map_err(|e| IngestError::Decryption(format!("cannot parse PDF: {e}")))?;

    if !document.is_encrypted() {
        return Ok(bytes.to_vec());
    }

    if document.encryption_state.is_none() {
        document.authenticate_password(password).map_err(authentication_error)?;
        return Err(IngestError::UnsupportedEncryption(
            "in-process decryption needs a document readable with the empty user password".into(),
        ));
    }

    if let Ok(id) = document.trailer.get(b"Encrypt").and_then(Object::as_reference) {
        document.objects.remove(&id);
    }
    document.trailer.remove(b"Encrypt");
    document.encryption_state = None;

    let mut out = Vec::with_capacity(bytes.len());
    document
        .save_to(&mut out)
        .map_err(|e| IngestError::Decryption(format!("cannot write decrypted PDF: {e}")))?;
    debug!(input = bytes.len(), output = out.len(), "PDF decrypted");
    Ok(out)
}

// ── qpdf ─────────────────────────────────────────────────────────────────

/// Decryption through the `qpdf` command-line tool.
#[derive(Clone)]
pub struct QpdfDecryptor {
    binary: PathBuf,
    fallback: Option<Arc<dyn PdfDecryptor>>,
}

impl Default for QpdfDecryptor {
    fn default() -> Self {
        Self::new("qpdf")
    }
}

impl QpdfDecryptor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            fallback: None,
        }
    }

    /// Delegate to `fallback` when the binary is not installed.
    pub fn with_fallback(mut self, fallback: Arc<dyn PdfDecryptor>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

#[async_trait]
impl PdfDecryptor for QpdfDecryptor {
    async fn decrypt(&self, bytes: &[u8], password: &str) -> Result<Vec<u8>, IngestError> {
        let scratch = tempfile::tempdir()
            .map_err(|e| IngestError::Internal(format!("create temp dir: {e}")))?;
        let input = scratch.path().join("input.pdf");
        let output = scratch.path().join("output.pdf");
        let password_file = scratch.path().join("password");

        tokio::fs::write(&input, bytes)
            .await
            .map_err(|e| IngestError::Internal(format!("stage input: {e}")))?;
        // Keeps the password out of the process table.
        tokio::fs::write(&password_file, password)
            .await
            .map_err(|e| IngestError::Internal(format!("stage password: {e}")))?;

        let spawned = tokio::process::Command::new(&self.binary)
            .arg("--decrypt")
            .arg(format!("--password-file={}", password_file.display()))
            .arg(&input)
            .arg(&output)
            .stdin(Stdio::null())
            .output()
            .await;

        let result = match (spawned, &self.fallback) {
            (Ok(result), _) => result,
            (Err(e), Some(fallback)) if e.kind() == ErrorKind::NotFound => {
                warn!(binary = %self.binary.display(), "qpdf not installed, decrypting in-process");
                return fallback.decrypt(bytes, password).await;
            }
            (Err(e), _) => {
                return Err(IngestError::Decryption(format!(
                    "cannot run {}: {e}",
                    self.binary.display()
                )))
            }
        };

        // 3 means success with warnings.
        match result.status.code() {
            Some(0) | Some(3) => {}
            code => {
                let stderr = String::from_utf8_lossy(&result.stderr);
                warn!(?code, "qpdf rejected the document");
                return Err(qpdf_error(code, stderr.trim()));
            }
        }

        tokio::fs::read(&output)
            .await
            .map_err(|e| IngestError::Decryption(format!("qpdf produced no output: {e}")))
    }
}

fn qpdf_error(code: Option<i32>, stderr: &str) -> IngestError {
    let detail = format!("qpdf exited with {code:?}: {stderr}");
    if stderr.to_ascii_lowercase().contains("unsupported") {
        IngestError::UnsupportedEncryption(detail)
    } else {
        IngestError::Decryption(detail)
    }
}
