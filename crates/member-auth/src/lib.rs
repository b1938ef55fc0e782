//! Member authentication for Roster.
//!
//! - [`SessionStore`]: caches the signed-in identity and its member profile
//!   and reconciles them with the identity provider
//! - [`OAuthCallbackResolver`]: consumes a federated-login redirect exactly once
//! - [`ProfileProvisioner`]: binds an identity to an organization by join code

mod auth_fsm;
mod error;
mod oauth;
mod provision;
mod session;

#[cfg(test)]
mod tests;

pub use auth_fsm::{
    CallbackMachine, CallbackMachineInput, CallbackMachineState, CallbackState, DegradedReason,
    SessionMachine, SessionMachineInput, SessionMachineState, SessionState, SessionStateChanged,
};
pub use error::{AuthError, AuthResult, ProvisionError};
pub use oauth::{strip_redirect_markers, CallbackHost, OAuthCallbackResolver, ResolverConfig, Route};
pub use provision::{display_name, ProfileProvisioner, ProvisionOutcome, ProvisionerConfig};
pub use session::{
    ReconcileTrigger, SessionSnapshot, SessionStateCallback, SessionStore, SessionStoreConfig,
};
