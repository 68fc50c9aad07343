//! LLM error types.

use thiserror::Error;

/// Errors that can occur during a text-completion call.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed or the provider returned an error status.
    #[error("LLM request failed: {0}")]
    RequestFailed(String),

    /// The provider's response envelope could not be decoded.
    #[error("Failed to parse LLM response envelope: {0}")]
    ParseError(String),

    /// Request timed out.
    #[error("LLM request timed out after {0}ms")]
    Timeout(u64),

    /// LLM provider is unavailable.
    #[error("LLM provider unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the request (bad request, auth). Not retryable.
    #[error("LLM request rejected with HTTP {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnosis.
        body: String,
    },

    /// The provider rejected the request for quota or rate reasons.
    #[error("LLM quota exhausted: {0}")]
    QuotaExceeded(String),
}

impl LlmError {
    /// Whether trying again later could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::Unavailable(_)
                | Self::QuotaExceeded(_)
                | Self::RequestFailed(_)
        )
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(0)
        } else if err.is_connect() {
            LlmError::Unavailable(err.to_string())
        } else {
            LlmError::RequestFailed(err.to_string())
        }
    }
}
