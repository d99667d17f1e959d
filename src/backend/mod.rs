//! Generation backend seam.
//!
//! The queue core never synthesizes audio itself; it drives an external
//! collaborator through the [`GenerationBackend`] trait. Implementations wrap
//! whatever service actually performs the work (a hosted TTS API, a local
//! model, a test double). Errors raised here are classified by
//! [`retry::RetryPolicy`] to decide whether an invocation is retried.

pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use retry::{classify, ErrorClass, RetryPolicy};

/// Errors a generation backend can raise.
///
/// Variants map onto the retry classification: `InvalidRequest` is never
/// retried, `QuotaExceeded` is never retried, `Unavailable` and `Timeout` are
/// transient, and `Api`/`Other` are classified by status code or message.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request was malformed or failed backend-side validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The backend reported an exhausted quota or rate limit.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The backend was unreachable or refused the connection.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A single backend call timed out.
    #[error("backend request timed out: {0}")]
    Timeout(String),

    /// The backend returned a structured API error.
    #[error("backend API error ({code}): {message}")]
    Api { code: u16, message: String },

    /// Anything else the backend surfaced.
    #[error("backend error: {0}")]
    Other(String),
}

/// One unit of generation work, treated as opaque by the queue layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Text to synthesize.
    pub text: String,
    /// Voice name, backend-specific.
    #[serde(default)]
    pub voice: Option<String>,
    /// Language tag, backend-specific.
    #[serde(default)]
    pub language: Option<String>,
    /// Preferred output filename; the backend picks one when absent.
    #[serde(default)]
    pub output_filename: Option<String>,
}

impl GenerationRequest {
    /// Creates a request for the given text with no voice or language hints.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: None,
            language: None,
            output_filename: None,
        }
    }

    /// Sets the voice name.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Sets the language tag.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Sets the output filename.
    pub fn with_output_filename(mut self, filename: impl Into<String>) -> Self {
        self.output_filename = Some(filename.into());
        self
    }
}

/// Successful output of one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    /// Where the generated audio was written.
    pub file_path: String,
    /// Human-readable summary from the backend.
    pub message: String,
}

impl GenerationOutput {
    /// Creates an output record for a written file.
    pub fn new(file_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            message: message.into(),
        }
    }
}

/// The external collaborator that performs the generation work.
///
/// Implementations must be safe to share across workers; each worker holds
/// the backend behind an `Arc` and invokes it through the retry policy.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Performs one generation call for the given request.
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, BackendError>;
}
