//! Bounded retry control flow for remote calls.
//!
//! This crate provides:
//! - [`RetryPolicy`]: runs an async operation with a per-attempt timeout,
//!   capped exponential backoff and early exit on non-retryable errors
//! - [`first_ok`]: races independent lookups and keeps the first success
//!
//! The policy is a pure control-flow decorator. It never inspects the value
//! an operation produces and owns no state between invocations; every
//! [`RetryAttempt`] lives only for the invocation that created it.

mod error;
mod policy;
mod race;

pub use error::{AttemptFailure, RetryError, Retryable};
pub use policy::{RetryAttempt, RetryPolicy};
pub use race::first_ok;
