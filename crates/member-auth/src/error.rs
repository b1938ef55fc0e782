//! Authentication and provisioning error types.

use retry_policy::RetryError;
use roster_backend::BackendError;
use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Invalid email or password
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Session not found
    #[error("Not logged in")]
    NotLoggedIn,

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Network unavailable (transient error, can retry)
    #[error("Network unavailable: {0}")]
    Network(String),

    /// Invalid state transition in the session FSM
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),

    /// Every retry failed
    #[error("{operation} failed after {attempts} attempt(s): {message}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// Any other backend failure
    #[error("Backend error: {0}")]
    Backend(BackendError),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Callers show transient failures as "network delay, try again" rather
    /// than as a rejected sign-in.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthError::Timeout | AuthError::Network(_) | AuthError::RetryExhausted { .. }
        )
    }
}

impl From<BackendError> for AuthError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::InvalidCredentials(message) => AuthError::InvalidCredentials(message),
            BackendError::NoSession => AuthError::NotLoggedIn,
            BackendError::Timeout => AuthError::Timeout,
            BackendError::Network(message) => AuthError::Network(message),
            BackendError::Unavailable { status, message } => {
                AuthError::Network(format!("HTTP {}: {}", status, message))
            }
            other => AuthError::Backend(other),
        }
    }
}

impl From<RetryError<BackendError>> for AuthError {
    fn from(err: RetryError<BackendError>) -> Self {
        match err {
            RetryError::Exhausted {
                operation,
                attempts,
                last,
            } => AuthError::RetryExhausted {
                operation,
                attempts,
                message: last.to_string(),
            },
            RetryError::Rejected { error, .. } => AuthError::from(error),
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;

/// Member provisioning error type.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Empty join code or missing identity field
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No organization uses the join code
    #[error("Invalid join code")]
    InvalidJoinCode,

    /// Insert retries exhausted
    #[error("Provisioning failed after {attempts} attempt(s): {source}")]
    ProvisionFailed { attempts: u32, source: BackendError },

    /// A single-attempt lookup ran out of time
    #[error("{0} timed out")]
    Timeout(String),

    /// Non-retryable backend failure
    #[error("Backend error: {0}")]
    Backend(BackendError),
}

impl ProvisionError {
    pub fn is_transient(&self) -> bool {
        match self {
            ProvisionError::Timeout(_) | ProvisionError::ProvisionFailed { .. } => true,
            ProvisionError::Backend(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<RetryError<BackendError>> for ProvisionError {
    fn from(err: RetryError<BackendError>) -> Self {
        if err.timed_out() {
            return ProvisionError::Timeout(err.operation().to_string());
        }
        match err {
            RetryError::Exhausted {
                attempts, last, ..
            } => ProvisionError::ProvisionFailed {
                attempts,
                source: last.error().cloned().unwrap_or(BackendError::Timeout),
            },
            RetryError::Rejected { error, .. } => ProvisionError::Backend(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retry_policy::AttemptFailure;
    use std::time::Duration;

    #[test]
    fn test_is_transient_timeout() {
        assert!(AuthError::Timeout.is_transient());
    }

    #[test]
    fn test_is_not_transient_invalid_credentials() {
        assert!(!AuthError::InvalidCredentials("bad password".to_string()).is_transient());
    }

    #[test]
    fn test_is_not_transient_not_logged_in() {
        assert!(!AuthError::NotLoggedIn.is_transient());
    }

    #[test]
    fn test_backend_error_mapping() {
        assert!(matches!(
            AuthError::from(BackendError::InvalidCredentials("nope".to_string())),
            AuthError::InvalidCredentials(_)
        ));
        assert!(matches!(
            AuthError::from(BackendError::NoSession),
            AuthError::NotLoggedIn
        ));
        assert!(AuthError::from(BackendError::Unavailable {
            status: 503,
            message: "down".to_string()
        })
        .is_transient());
        assert!(matches!(
            AuthError::from(BackendError::Decode("x".to_string())),
            AuthError::Backend(_)
        ));
    }

    #[test]
    fn test_retry_exhausted_is_transient() {
        let err = AuthError::from(RetryError::Exhausted {
            operation: "sign_in".to_string(),
            attempts: 2,
            last: AttemptFailure::<BackendError>::Timeout(Duration::from_secs(5)),
        });
        assert!(err.is_transient());
        assert!(err.to_string().contains("sign_in failed after 2 attempt(s)"));
    }

    #[test]
    fn test_provision_error_from_timeout() {
        let err = ProvisionError::from(RetryError::Exhausted {
            operation: "find_organization".to_string(),
            attempts: 1,
            last: AttemptFailure::<BackendError>::Timeout(Duration::from_secs(10)),
        });
        assert!(matches!(err, ProvisionError::Timeout(ref op) if op == "find_organization"));
    }

    #[test]
    fn test_provision_error_keeps_last_failure() {
        let err = ProvisionError::from(RetryError::Exhausted {
            operation: "insert_member".to_string(),
            attempts: 3,
            last: AttemptFailure::Failed(BackendError::Conflict("dup".to_string())),
        });
        match err {
            ProvisionError::ProvisionFailed { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(source.is_conflict());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
