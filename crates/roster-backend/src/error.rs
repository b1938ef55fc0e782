//! Backend error types.

use retry_policy::Retryable;
use thiserror::Error;

/// Error reported by any remote collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Connection failed or was reset
    #[error("Network error: {0}")]
    Network(String),

    /// The request deadline elapsed
    #[error("Request timed out")]
    Timeout,

    /// The caller has no active session
    #[error("No active session")]
    NoSession,

    /// A token or redirect credential could not be used
    #[error("Malformed credential: {0}")]
    MalformedCredential(String),

    /// Email/password rejected
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Unique constraint violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Server-side failure or rate limit (transient)
    #[error("Service unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    /// Any other rejected request
    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Response body did not match the expected shape
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors include:
    /// - Network failures
    /// - Timeouts
    /// - 5xx and 429 responses
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Network(_) | BackendError::Timeout | BackendError::Unavailable { .. }
        )
    }

    /// Returns true if the provider explicitly reported that no session exists.
    pub fn is_no_session(&self) -> bool {
        matches!(self, BackendError::NoSession)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BackendError::Conflict(_))
    }
}

impl Retryable for BackendError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Decode(err.to_string())
    }
}

/// Result type alias using BackendError.
pub type BackendResult<T> = Result<T, BackendError>;
