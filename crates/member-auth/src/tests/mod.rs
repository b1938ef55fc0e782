//! Scenario tests against the in-memory backend.
//!
//! - `harness.rs`   - fixtures and a recording callback host
//! - `session.rs`   - reconcile outcomes, retry budget, stale results
//! - `oauth.rs`     - redirect detection, single exchange, routing
//! - `provision.rs` - join codes, idempotence, insert races

pub(crate) mod harness;
