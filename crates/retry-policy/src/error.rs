//! Retry error types.

use std::time::Duration;
use thiserror::Error;

/// Classifies errors for the retry loop.
///
/// Errors that report `false` (no active session, malformed credential,
/// invalid input) end the loop on the attempt that produced them.
pub trait Retryable {
    /// Returns true if another attempt could plausibly succeed.
    fn is_retryable(&self) -> bool;
}

/// Why a single attempt failed.
#[derive(Error, Debug)]
pub enum AttemptFailure<E> {
    /// The attempt lost the race against its deadline.
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The operation itself returned an error.
    #[error("{0}")]
    Failed(E),
}

impl<E> AttemptFailure<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AttemptFailure::Timeout(_))
    }

    pub fn error(&self) -> Option<&E> {
        match self {
            AttemptFailure::Failed(error) => Some(error),
            AttemptFailure::Timeout(_) => None,
        }
    }
}

/// Terminal outcome of a failed [`RetryPolicy`](crate::RetryPolicy) run.
#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last failure.
    #[error("{operation} failed after {attempts} attempt(s): {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last: AttemptFailure<E>,
    },

    /// A non-retryable error stopped the loop early.
    #[error("{operation} failed: {error}")]
    Rejected { operation: String, error: E },
}

impl<E> RetryError<E> {
    /// Name of the operation that failed.
    pub fn operation(&self) -> &str {
        match self {
            RetryError::Exhausted { operation, .. } | RetryError::Rejected { operation, .. } => {
                operation
            }
        }
    }

    /// Returns true if the terminal cause was a deadline rather than an error.
    pub fn timed_out(&self) -> bool {
        matches!(
            self,
            RetryError::Exhausted {
                last: AttemptFailure::Timeout(_),
                ..
            }
        )
    }

    /// The last underlying error, if the terminal cause was not a timeout.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { last, .. } => last.error(),
            RetryError::Rejected { error, .. } => Some(error),
        }
    }

    /// Consumes the error and returns the last underlying error, if any.
    pub fn into_last_error(self) -> Option<E> {
        match self {
            RetryError::Exhausted {
                last: AttemptFailure::Failed(error),
                ..
            } => Some(error),
            RetryError::Exhausted { .. } => None,
            RetryError::Rejected { error, .. } => Some(error),
        }
    }

    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryError::Exhausted { attempts, .. } => Some(*attempts),
            RetryError::Rejected { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_out_only_for_exhausted_timeouts() {
        let timeout: RetryError<String> = RetryError::Exhausted {
            operation: "fetch_profile".to_string(),
            attempts: 2,
            last: AttemptFailure::Timeout(Duration::from_secs(5)),
        };
        assert!(timeout.timed_out());
        assert!(timeout.last_error().is_none());

        let failed: RetryError<String> = RetryError::Exhausted {
            operation: "fetch_profile".to_string(),
            attempts: 2,
            last: AttemptFailure::Failed("connection reset".to_string()),
        };
        assert!(!failed.timed_out());
        assert_eq!(failed.last_error().map(String::as_str), Some("connection reset"));
    }

    #[test]
    fn test_rejected_carries_error() {
        let rejected: RetryError<String> = RetryError::Rejected {
            operation: "current_identity".to_string(),
            error: "no active session".to_string(),
        };
        assert_eq!(rejected.operation(), "current_identity");
        assert_eq!(rejected.attempts(), None);
        assert_eq!(
            rejected.into_last_error(),
            Some("no active session".to_string())
        );
    }

    #[test]
    fn test_display_includes_operation_and_cause() {
        let err: RetryError<String> = RetryError::Exhausted {
            operation: "upload".to_string(),
            attempts: 3,
            last: AttemptFailure::Timeout(Duration::from_millis(1500)),
        };
        assert_eq!(
            err.to_string(),
            "upload failed after 3 attempt(s): timed out after 1500ms"
        );
    }
}
