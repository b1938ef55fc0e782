//! Supabase implementations of the collaborator traits.
//!
//! - [`SupabaseAuth`]: GoTrue identity provider with optional on-disk session
//! - [`SupabaseClient`]: PostgREST tables and Storage bucket

mod auth;
mod http;
mod rest;

pub use auth::SupabaseAuth;
pub use rest::SupabaseClient;

/// Supplies the bearer token for data requests.
pub trait AccessTokenSource: Send + Sync {
    /// Current unexpired access token, if signed in.
    fn access_token(&self) -> Option<String>;
}
