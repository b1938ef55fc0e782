//! HTTP response helpers shared by the Supabase clients.

use crate::BackendError;
use reqwest::{Response, StatusCode};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Postgres unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

pub(crate) fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

/// Pull a human-readable message out of a Supabase error body.
///
/// GoTrue uses `msg` / `error_description`, PostgREST uses `message`,
/// Storage uses `error` / `message`. Falls back to a body summary so raw
/// payloads never reach logs.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["msg", "message", "error_description", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| summarize_response_body(body))
}

/// Map a non-success status to a [`BackendError`].
pub(crate) fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let message = error_message(body);
    let code = status.as_u16();

    if status == StatusCode::CONFLICT || body.contains(UNIQUE_VIOLATION) {
        return BackendError::Conflict(message);
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return BackendError::Unavailable {
            status: code,
            message,
        };
    }
    BackendError::Rejected {
        status: code,
        message,
    }
}

/// Consume a failed response and classify it, logging a body summary.
pub(crate) async fn error_from_response(response: Response, context: &str) -> BackendError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(
        status = %status,
        body_summary = %summarize_response_body(&body),
        "{} failed",
        context
    );
    classify_status(status, &body)
}
