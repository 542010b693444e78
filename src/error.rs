//! Error taxonomy for fetching and acquiring analysis results.
//!
//! Schema mismatches and missing fields are not errors here: the first degrades to
//! [`crate::payload::VariantKind::Unknown`], the second makes the cascade try its next
//! strategy.

use thiserror::Error;

/// Failure while fetching a raw payload from an external source.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The request could not be built at all (bad id, bad URL). Never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response was not valid JSON: {0}")]
    Decode(String),
}

impl FetchError {
    /// Whether another poll attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::InvalidRequest(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            FetchError::InvalidRequest(e.to_string())
        } else if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// Failure surfaced by [`crate::acquirer::ResultAcquirer`].
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Non-retryable failure on the first attempt.
    #[error("analysis request rejected: {0}")]
    Request(#[source] FetchError),

    /// Poll budget consumed; only returned under [`crate::acquirer::FallbackPolicy::Fail`].
    #[error("analysis {job_id} not ready after {attempts} attempts (last error: {})", .last_error.as_deref().unwrap_or("none"))]
    Exhausted {
        job_id: String,
        attempts: u32,
        last_error: Option<String>,
    },
}
