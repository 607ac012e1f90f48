use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssessError {
    #[error("inference runtime is not installed or is not in the system path")]
    RuntimeNotInstalled,

    #[error("inference runtime is not reachable at {0}")]
    RuntimeUnreachable(String),

    #[error("failed to start inference runtime: {0}")]
    RuntimeStartFailed(String),

    #[error("failed to query inference runtime: {0}")]
    RuntimeQueryFailed(String),

    #[error("model '{0}' is not available and allow-download is not set")]
    ModelUnavailable(String),

    #[error("model '{0}' is not in the list of models permitted for download")]
    ModelNotAllowed(String),

    #[error("model '{0}' is not ready after download")]
    ModelNotReadyAfterDownload(String),

    #[error("model download rejected: {0}")]
    DownloadRejected(String),

    #[error("failed to decode model download status: {0}")]
    DownloadDecodeFailed(String),

    #[error("context length exceeded")]
    ContextLengthExceeded,

    #[error("failed to fetch target: {0}")]
    FetchFailed(String),

    #[error("model invocation failed: {0}")]
    InvocationFailed(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl AssessError {
    /// Only context overflow is handled in-band; everything else ends the assessment.
    pub fn is_context_length(&self) -> bool {
        matches!(self, AssessError::ContextLengthExceeded)
    }
}

/// Phrases the runtime uses when a prompt does not fit the model's context window.
const CONTEXT_LENGTH_MARKERS: &[&str] = &[
    "context length exceeded",
    "context window exceeded",
    "too many tokens",
];

/// Checks whether a runtime error message reports a context overflow.
pub fn is_context_length_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    CONTEXT_LENGTH_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

pub type Result<T> = std::result::Result<T, AssessError>;
