//! Photo storage error types.

use retry_policy::RetryError;
use roster_backend::BackendError;
use thiserror::Error;

/// Photo storage error type.
#[derive(Error, Debug)]
pub enum PhotoError {
    /// Rejected before any network call
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Owner already has the maximum number of photos
    #[error("Photo limit reached: {owner_member_id} already has {count} photo(s), limit is {limit}")]
    QuotaExceeded {
        owner_member_id: String,
        count: usize,
        limit: usize,
    },

    /// No photo row with this id
    #[error("Photo not found: {0}")]
    NotFound(String),

    /// Object write failed; no metadata row exists
    #[error("Storage write failed for {key}: {reason}")]
    StorageWriteFailed { key: String, reason: String },

    /// Object written but the bucket has no public URL for it
    #[error("No public URL for {key}")]
    UrlResolutionFailed { key: String },

    /// Metadata insert failed after the object was written
    #[error("Metadata write failed for {key}: {reason}")]
    MetadataWriteFailed { key: String, reason: String },

    /// Transient failures persisted through every attempt
    #[error("{operation} failed after {attempts} attempt(s): {message}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// Non-retryable backend failure
    #[error("Backend error: {0}")]
    Backend(BackendError),
}

impl PhotoError {
    /// Returns true if repeating the whole operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PhotoError::RetryExhausted { .. }
            | PhotoError::StorageWriteFailed { .. }
            | PhotoError::MetadataWriteFailed { .. } => true,
            PhotoError::Backend(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<RetryError<BackendError>> for PhotoError {
    fn from(err: RetryError<BackendError>) -> Self {
        match err {
            RetryError::Exhausted {
                operation,
                attempts,
                last,
            } => PhotoError::RetryExhausted {
                operation,
                attempts,
                message: last.to_string(),
            },
            RetryError::Rejected { error, .. } => PhotoError::Backend(error),
        }
    }
}

/// Result type alias using PhotoError.
pub type PhotoResult<T> = Result<T, PhotoError>;

#[cfg(test)]
mod tests {
    use super::*;
    use retry_policy::AttemptFailure;
    use std::time::Duration;

    #[test]
    fn test_exhausted_retry_keeps_operation_and_attempts() {
        let err = PhotoError::from(RetryError::Exhausted {
            operation: "list_photos".to_string(),
            attempts: 3,
            last: AttemptFailure::<BackendError>::Timeout(Duration::from_secs(10)),
        });
        match &err {
            PhotoError::RetryExhausted {
                operation,
                attempts,
                ..
            } => {
                assert_eq!(operation, "list_photos");
                assert_eq!(*attempts, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.is_transient());
    }

    #[test]
    fn test_rejected_retry_is_backend_error() {
        let err = PhotoError::from(RetryError::Rejected {
            operation: "delete_photo".to_string(),
            error: BackendError::Rejected {
                status: 403,
                message: "denied".to_string(),
            },
        });
        assert!(matches!(err, PhotoError::Backend(BackendError::Rejected { status: 403, .. })));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_quota_is_never_transient() {
        let err = PhotoError::QuotaExceeded {
            owner_member_id: "u1".to_string(),
            count: 5,
            limit: 5,
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("limit is 5"));
    }
}
