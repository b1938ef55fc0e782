//! State machines for session reconciliation and redirect handling.
//!
//! ## Session
//!
//! ```text
//!                 Reconcile
//! Uninitialized ───────────► Reconciling ◄──────────────┐
//!                               │                        │ Reconcile
//!     ProfileFound ─────────────┼──► Authenticated ──────┤
//!     ProfileMissing ───────────┼──► NeedsProvisioning ──┤
//!     NoIdentity ───────────────┼──► Unauthenticated ────┤
//!     Degrade ──────────────────┴──► Degraded ───────────┘
//!
//! SignOut from any state ──► Unauthenticated
//! ```
//!
//! ## Callback
//!
//! ```text
//! Idle ──Detect──► Detected ──Begin──► Processing ──Succeed──► Resolved
//!                     │                    │
//!                     └──Fail──► Failed ◄──┘ Fail
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Uninitialized)

    Uninitialized => {
        Reconcile => Reconciling,
        SignOut => Unauthenticated
    },
    Reconciling => {
        // A newer reconcile supersedes the running one
        Reconcile => Reconciling,
        ProfileFound => Authenticated,
        ProfileMissing => NeedsProvisioning,
        NoIdentity => Unauthenticated,
        Degrade => Degraded,
        SignOut => Unauthenticated
    },
    Authenticated => {
        Reconcile => Reconciling,
        SignOut => Unauthenticated
    },
    NeedsProvisioning => {
        Reconcile => Reconciling,
        SignOut => Unauthenticated
    },
    Unauthenticated => {
        Reconcile => Reconciling,
        SignOut => Unauthenticated
    },
    Degraded => {
        Reconcile => Reconciling,
        SignOut => Unauthenticated
    }
}

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub callback_machine(Idle)

    Idle => {
        Detect => Detected
    },
    Detected => {
        Begin => Processing,
        Fail => Failed
    },
    Processing => {
        Succeed => Resolved,
        Fail => Failed
    }
}

pub use callback_machine::Input as CallbackMachineInput;
pub use callback_machine::State as CallbackMachineState;
pub use callback_machine::StateMachine as CallbackMachine;
pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Session state for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No reconcile has run yet.
    Uninitialized,
    /// A reconcile is in flight.
    Reconciling,
    /// Identity and member profile are both cached.
    Authenticated,
    /// Identity is known but has no member profile yet.
    NeedsProvisioning,
    /// Nobody is signed in.
    Unauthenticated,
    /// Signed in, but the last reconcile could not complete.
    Degraded,
}

impl SessionState {
    /// Returns true only when a member profile is resolved.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated)
    }

    /// Returns true if the state still carries a signed-in identity.
    pub fn has_identity(&self) -> bool {
        matches!(
            self,
            SessionState::Authenticated | SessionState::NeedsProvisioning | SessionState::Degraded
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Reconciling => "reconciling",
            SessionState::Authenticated => "authenticated",
            SessionState::NeedsProvisioning => "needs_provisioning",
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Degraded => "degraded",
        };
        f.write_str(label)
    }
}

impl From<&SessionMachineState> for SessionState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Uninitialized => SessionState::Uninitialized,
            SessionMachineState::Reconciling => SessionState::Reconciling,
            SessionMachineState::Authenticated => SessionState::Authenticated,
            SessionMachineState::NeedsProvisioning => SessionState::NeedsProvisioning,
            SessionMachineState::Unauthenticated => SessionState::Unauthenticated,
            SessionMachineState::Degraded => SessionState::Degraded,
        }
    }
}

/// Why a reconcile ended in [`SessionState::Degraded`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "message", rename_all = "snake_case")]
pub enum DegradedReason {
    /// The profile fetch ran out of time; the cached profile is stale.
    Timeout,
    /// The identity provider could not be reached.
    Network,
    /// The profile fetch failed outright.
    Error(String),
}

/// Redirect handling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackState {
    Idle,
    Detected,
    Processing,
    Resolved,
    Failed,
}

impl From<&CallbackMachineState> for CallbackState {
    fn from(state: &CallbackMachineState) -> Self {
        match state {
            CallbackMachineState::Idle => CallbackState::Idle,
            CallbackMachineState::Detected => CallbackState::Detected,
            CallbackMachineState::Processing => CallbackState::Processing,
            CallbackMachineState::Resolved => CallbackState::Resolved,
            CallbackMachineState::Failed => CallbackState::Failed,
        }
    }
}

/// Payload for session state change notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStateChanged {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<DegradedReason>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_states() {
        assert_eq!(
            *SessionMachine::new().state(),
            SessionMachineState::Uninitialized
        );
        assert_eq!(*CallbackMachine::new().state(), CallbackMachineState::Idle);
    }

    #[test]
    fn test_reconcile_outcomes() {
        let outcomes = [
            (SessionMachineInput::ProfileFound, SessionMachineState::Authenticated),
            (
                SessionMachineInput::ProfileMissing,
                SessionMachineState::NeedsProvisioning,
            ),
            (SessionMachineInput::NoIdentity, SessionMachineState::Unauthenticated),
            (SessionMachineInput::Degrade, SessionMachineState::Degraded),
        ];

        for (input, expected) in outcomes {
            let mut machine = SessionMachine::new();
            machine.consume(&SessionMachineInput::Reconcile).unwrap();
            machine.consume(&input).unwrap();
            assert_eq!(*machine.state(), expected);
        }
    }

    #[test]
    fn test_outcome_requires_reconciling() {
        let mut machine = SessionMachine::new();
        assert!(machine.consume(&SessionMachineInput::ProfileFound).is_err());

        machine.consume(&SessionMachineInput::Reconcile).unwrap();
        machine.consume(&SessionMachineInput::ProfileFound).unwrap();
        assert!(machine.consume(&SessionMachineInput::Degrade).is_err());
    }

    #[test]
    fn test_reconcile_can_restart_while_running() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::Reconcile).unwrap();
        machine.consume(&SessionMachineInput::Reconcile).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Reconciling);
    }

    #[test]
    fn test_sign_out_from_every_state() {
        let paths: [&[SessionMachineInput]; 4] = [
            &[],
            &[SessionMachineInput::Reconcile],
            &[SessionMachineInput::Reconcile, SessionMachineInput::ProfileFound],
            &[SessionMachineInput::Reconcile, SessionMachineInput::Degrade],
        ];

        for path in paths {
            let mut machine = SessionMachine::new();
            for input in path {
                machine.consume(input).unwrap();
            }
            machine.consume(&SessionMachineInput::SignOut).unwrap();
            assert_eq!(*machine.state(), SessionMachineState::Unauthenticated);
        }
    }

    #[test]
    fn test_callback_success_path() {
        let mut machine = CallbackMachine::new();
        machine.consume(&CallbackMachineInput::Detect).unwrap();
        machine.consume(&CallbackMachineInput::Begin).unwrap();
        machine.consume(&CallbackMachineInput::Succeed).unwrap();
        assert_eq!(*machine.state(), CallbackMachineState::Resolved);
    }

    #[test]
    fn test_callback_cannot_restart_once_finished() {
        let mut machine = CallbackMachine::new();
        machine.consume(&CallbackMachineInput::Detect).unwrap();
        machine.consume(&CallbackMachineInput::Fail).unwrap();

        assert!(machine.consume(&CallbackMachineInput::Detect).is_err());
        assert!(machine.consume(&CallbackMachineInput::Begin).is_err());
        assert_eq!(
            CallbackState::from(machine.state()),
            CallbackState::Failed
        );
    }

    #[test]
    fn test_callback_cannot_skip_processing() {
        let mut machine = CallbackMachine::new();
        assert!(machine.consume(&CallbackMachineInput::Succeed).is_err());
        machine.consume(&CallbackMachineInput::Detect).unwrap();
        assert!(machine.consume(&CallbackMachineInput::Succeed).is_err());
    }

    #[test]
    fn test_session_state_helpers() {
        assert!(SessionState::Authenticated.is_authenticated());
        assert!(!SessionState::NeedsProvisioning.is_authenticated());
        assert!(SessionState::Degraded.has_identity());
        assert!(!SessionState::Unauthenticated.has_identity());
    }

    #[test]
    fn test_degraded_reason_serialization() {
        let json = serde_json::to_value(DegradedReason::Error("boom".to_string())).unwrap();
        assert_eq!(json, serde_json::json!({ "reason": "error", "message": "boom" }));
    }
}
