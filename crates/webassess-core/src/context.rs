use crate::error::{AssessError, Result};
use tokio_util::sync::CancellationToken;

/// Per-assessment state handed to every downstream call: the endpoint the
/// runtime was resolved to and the cancellation signal for the whole call tree.
#[derive(Debug, Clone)]
pub struct AssessContext {
    endpoint: String,
    cancel: CancellationToken,
}

impl AssessContext {
    pub fn new(endpoint: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            endpoint: normalize_endpoint(&endpoint.into()),
            cancel,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails fast once the token has fired.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(AssessError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Strips trailing slashes so paths can be appended with `format!("{}/api/..")`.
pub fn normalize_endpoint(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
