//! Session and profile reconciliation.
//!
//! [`SessionStore`] is the only owner of the cached identity/profile pair.
//! Every reconcile pass takes a generation number; a pass that has been
//! superseded by a newer pass (or by a sign-out) discards its result instead
//! of applying it, then waits for the newest pass to settle and reports that
//! outcome. Network and timeout failures never sign a user out: only
//! an explicit "no session" answer, confirmed by a direct session check, does.

use crate::auth_fsm::{
    DegradedReason, SessionMachine, SessionMachineInput, SessionState, SessionStateChanged,
};
use crate::{AuthError, AuthResult};
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use retry_policy::{first_ok, RetryPolicy};
use roster_backend::{
    BackendError, CredentialEvent, Identity, IdentityProvider, MemberDirectory, MemberProfile,
};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Who asked for a reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileTrigger {
    /// An explicit user action (load, refresh button, sign-in).
    UserInitiated,
    /// A background credential event.
    Automatic,
}

/// Tuning for [`SessionStore`].
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Wait before repeating the identity lookup while a session is still valid.
    pub identity_retry_delay: Duration,
    /// Identity retries automatic reconciles may use between credential events.
    pub max_automatic_identity_retries: u32,
    /// Retry policy for the member profile fetch.
    pub profile_policy: RetryPolicy,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            identity_retry_delay: Duration::from_millis(500),
            max_automatic_identity_retries: 3,
            profile_policy: RetryPolicy::new(2, Duration::from_secs(5)),
        }
    }
}

/// Point-in-time copy of the store.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub identity: Option<Identity>,
    pub profile: Option<MemberProfile>,
    pub degraded: Option<DegradedReason>,
}

/// Callback type for session state change notifications.
pub type SessionStateCallback = Box<dyn Fn(SessionStateChanged) + Send + Sync>;

#[derive(Default)]
struct Cache {
    identity: Option<Identity>,
    profile: Option<MemberProfile>,
    degraded: Option<DegradedReason>,
}

impl Cache {
    fn clear(&mut self) {
        *self = Cache::default();
    }
}

/// Why one identity lookup produced no identity.
#[derive(Debug)]
enum LookupMiss {
    /// The provider said nobody is signed in.
    Absent,
    Failed(BackendError),
}

/// What a finished profile fetch does to the cached profile.
enum ProfileUpdate {
    Set(MemberProfile),
    Clear,
    /// Keep a stale profile only if it belongs to the same member.
    KeepIfSameMember,
}

/// Result of asking the provider for its session directly.
#[derive(Debug)]
enum SessionCheck {
    Valid,
    Absent,
    Unknown(BackendError),
}

/// Publishes the current state for a pass dropped before it settled, so
/// passes waiting on it are released.
struct PassGuard<'a> {
    store: &'a SessionStore,
    generation: u64,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        let store = self.store;
        let fsm = store.fsm.lock();
        let latest = store.generation.load(Ordering::SeqCst) == self.generation;
        if latest && store.settled.borrow().0 != self.generation {
            store
                .settled
                .send_replace((self.generation, SessionState::from(fsm.state())));
        }
    }
}

/// Caches the signed-in identity and member profile.
pub struct SessionStore {
    identity_provider: Arc<dyn IdentityProvider>,
    directory: Arc<dyn MemberDirectory>,
    config: SessionStoreConfig,
    /// Lock order: `fsm` before `cache`.
    fsm: Mutex<SessionMachine>,
    cache: Mutex<Cache>,
    generation: AtomicU64,
    /// Generation and state of the last applied transition.
    settled: watch::Sender<(u64, SessionState)>,
    automatic_retries: AtomicU32,
    state_callback: Mutex<Option<SessionStateCallback>>,
}

impl SessionStore {
    /// Create a new session store.
    pub fn new(
        identity_provider: Arc<dyn IdentityProvider>,
        directory: Arc<dyn MemberDirectory>,
    ) -> Self {
        Self::with_config(identity_provider, directory, SessionStoreConfig::default())
    }

    /// Create a new session store with custom tuning.
    pub fn with_config(
        identity_provider: Arc<dyn IdentityProvider>,
        directory: Arc<dyn MemberDirectory>,
        config: SessionStoreConfig,
    ) -> Self {
        Self {
            identity_provider,
            directory,
            config,
            fsm: Mutex::new(SessionMachine::new()),
            cache: Mutex::new(Cache::default()),
            generation: AtomicU64::new(0),
            settled: watch::Sender::new((0, SessionState::Uninitialized)),
            automatic_retries: AtomicU32::new(0),
            state_callback: Mutex::new(None),
        }
    }

    /// Set a callback to be notified of session state changes.
    pub fn set_state_callback(&self, callback: SessionStateCallback) {
        *self.state_callback.lock() = Some(callback);
    }

    pub fn state(&self) -> SessionState {
        SessionState::from(self.fsm.lock().state())
    }

    pub fn identity(&self) -> Option<Identity> {
        self.cache.lock().identity.clone()
    }

    pub fn profile(&self) -> Option<MemberProfile> {
        self.cache.lock().profile.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let fsm = self.fsm.lock();
        let cache = self.cache.lock();
        SessionSnapshot {
            state: SessionState::from(fsm.state()),
            identity: cache.identity.clone(),
            profile: cache.profile.clone(),
            degraded: cache.degraded.clone(),
        }
    }

    /// Identity retries automatic reconciles have used since the last reset.
    pub fn automatic_retries_used(&self) -> u32 {
        self.automatic_retries.load(Ordering::SeqCst)
    }

    fn reset_retry_budget(&self) {
        self.automatic_retries.store(0, Ordering::SeqCst);
    }

    /// Take one identity retry for this call, if the budget allows.
    fn claim_identity_retry(&self, trigger: ReconcileTrigger) -> bool {
        match trigger {
            ReconcileTrigger::UserInitiated => true,
            ReconcileTrigger::Automatic => {
                let max = self.config.max_automatic_identity_retries;
                self.automatic_retries
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                        (used < max).then_some(used + 1)
                    })
                    .is_ok()
            }
        }
    }

    /// Apply `input` and update the cache, unless `generation` is stale.
    ///
    /// Passing `None` as the generation applies unconditionally and
    /// supersedes every pass in flight.
    fn transition(
        &self,
        generation: Option<u64>,
        input: &SessionMachineInput,
        update: impl FnOnce(&mut Cache),
    ) -> AuthResult<Option<SessionState>> {
        let (old_state, payload) = {
            let mut fsm = self.fsm.lock();
            match generation {
                Some(generation) if generation != self.generation.load(Ordering::SeqCst) => {
                    debug!(generation, input = ?input, "Discarding superseded reconcile result");
                    return Ok(None);
                }
                Some(_) => {}
                None => {
                    self.generation.fetch_add(1, Ordering::SeqCst);
                }
            }

            let applied = self.generation.load(Ordering::SeqCst);
            let old_state = SessionState::from(fsm.state());
            if fsm.consume(input).is_err() {
                // Waiters on this generation must still wake up.
                self.settled.send_replace((applied, old_state));
                return Err(AuthError::InvalidStateTransition(format!(
                    "Cannot apply {:?} in state {:?}",
                    input, old_state
                )));
            }

            let mut cache = self.cache.lock();
            update(&mut cache);
            let payload = SessionStateChanged {
                state: SessionState::from(fsm.state()),
                user_id: cache.identity.as_ref().map(|i| i.id.clone()),
                email: cache.identity.as_ref().and_then(|i| i.email.clone()),
                degraded: cache.degraded.clone(),
            };
            self.settled.send_replace((applied, payload.state));
            (old_state, payload)
        };

        let new_state = payload.state;
        if old_state != new_state {
            debug!(
                old_state = ?old_state,
                new_state = ?new_state,
                "Session state transition"
            );
            self.notify_state_change(payload);
        }
        Ok(Some(new_state))
    }

    fn notify_state_change(&self, payload: SessionStateChanged) {
        let cb = self.state_callback.lock();
        if let Some(callback) = cb.as_ref() {
            callback(payload);
        }
    }

    /// Start a pass: bump the generation and enter `Reconciling`.
    fn begin_reconcile(&self) -> AuthResult<u64> {
        let mut fsm = self.fsm.lock();
        let old_state = SessionState::from(fsm.state());
        fsm.consume(&SessionMachineInput::Reconcile).map_err(|_| {
            AuthError::InvalidStateTransition(format!("Cannot reconcile in state {:?}", old_state))
        })?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        drop(fsm);

        if old_state != SessionState::Reconciling {
            let cache = self.cache.lock();
            let payload = SessionStateChanged {
                state: SessionState::Reconciling,
                user_id: cache.identity.as_ref().map(|i| i.id.clone()),
                email: cache.identity.as_ref().and_then(|i| i.email.clone()),
                degraded: None,
            };
            drop(cache);
            self.notify_state_change(payload);
        }
        Ok(generation)
    }

    /// Align the cached identity and profile with the identity provider.
    ///
    /// Returns true iff an authenticated member with a resolved profile is
    /// cached when this pass completes. A pass that was superseded reports
    /// the outcome of the newest pass once that one settles.
    pub async fn reconcile(&self, trigger: ReconcileTrigger) -> bool {
        let generation = match self.begin_reconcile() {
            Ok(generation) => generation,
            Err(e) => {
                warn!(error = %e, "Could not start reconcile");
                return false;
            }
        };
        debug!(generation, trigger = ?trigger, "Reconcile started");
        let _pass = PassGuard {
            store: self,
            generation,
        };

        let mut retried = false;
        let identity = loop {
            match self.lookup_identity().await {
                Ok(identity) => break identity,
                Err(misses) => {
                    let check = self.check_session().await;
                    if !retried
                        && matches!(check, SessionCheck::Valid)
                        && self.claim_identity_retry(trigger)
                    {
                        retried = true;
                        debug!(
                            delay_ms = self.config.identity_retry_delay.as_millis() as u64,
                            "Session still valid but identity unresolved, retrying lookup"
                        );
                        tokio::time::sleep(self.config.identity_retry_delay).await;
                        continue;
                    }
                    let settled = self.settle_without_identity(generation, &misses, check);
                    return self.outcome(settled).await;
                }
            }
        };

        let settled = self.settle_with_identity(generation, identity).await;
        self.outcome(settled).await
    }

    /// Whether `settled` (or, for a discarded pass, the newest pass) left an
    /// authenticated member behind.
    async fn outcome(&self, settled: Option<SessionState>) -> bool {
        let state = match settled {
            Some(state) => state,
            None => self.wait_for_latest().await,
        };
        state.is_authenticated()
    }

    /// Wait until the newest generation has applied its transition.
    async fn wait_for_latest(&self) -> SessionState {
        let mut settled = self.settled.subscribe();
        let latest = settled
            .wait_for(|(generation, _)| *generation == self.generation.load(Ordering::SeqCst))
            .await
            .map(|settled| settled.1);
        latest.unwrap_or_else(|_| self.state())
    }

    /// Race the user lookup against the session lookup; first identity wins.
    async fn lookup_identity(&self) -> Result<Identity, Vec<LookupMiss>> {
        let provider = &self.identity_provider;

        let by_user: BoxFuture<'_, Result<Identity, LookupMiss>> = async move {
            match provider.current_identity().await {
                Ok(Some(identity)) => Ok(identity),
                Ok(None) => Err(LookupMiss::Absent),
                Err(e) if e.is_no_session() => Err(LookupMiss::Absent),
                Err(e) => Err(LookupMiss::Failed(e)),
            }
        }
        .boxed();

        let by_session: BoxFuture<'_, Result<Identity, LookupMiss>> = async move {
            match provider.current_session().await {
                Ok(Some(session)) if session.is_valid() => Ok(session.identity),
                Ok(_) => Err(LookupMiss::Absent),
                Err(e) if e.is_no_session() => Err(LookupMiss::Absent),
                Err(e) => Err(LookupMiss::Failed(e)),
            }
        }
        .boxed();

        first_ok([by_user, by_session]).await
    }

    async fn check_session(&self) -> SessionCheck {
        match self.identity_provider.current_session().await {
            Ok(Some(session)) if session.is_valid() => SessionCheck::Valid,
            Ok(_) => SessionCheck::Absent,
            Err(e) if e.is_no_session() => SessionCheck::Absent,
            Err(e) => SessionCheck::Unknown(e),
        }
    }

    /// Record a pass that found no identity. `None` if it was superseded.
    fn settle_without_identity(
        &self,
        generation: u64,
        misses: &[LookupMiss],
        check: SessionCheck,
    ) -> Option<SessionState> {
        let all_absent = misses.iter().all(|m| matches!(m, LookupMiss::Absent));

        if all_absent || matches!(check, SessionCheck::Absent) {
            info!("No signed-in identity");
            return self
                .transition(Some(generation), &SessionMachineInput::NoIdentity, Cache::clear)
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Failed to record signed-out state");
                    Some(self.state())
                });
        }

        let failures = misses.iter().filter_map(|m| match m {
            LookupMiss::Failed(e) => Some(e),
            LookupMiss::Absent => None,
        });
        let check_failure = match &check {
            SessionCheck::Unknown(e) => Some(e),
            _ => None,
        };
        let errors: Vec<&BackendError> = failures.chain(check_failure).collect();

        let reason = if errors.iter().any(|e| e.is_transient()) {
            DegradedReason::Network
        } else {
            DegradedReason::Error(
                errors
                    .first()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "identity lookup failed".to_string()),
            )
        };
        warn!(reason = ?reason, "Identity lookup failed, keeping cached session");

        self.transition(Some(generation), &SessionMachineInput::Degrade, |cache| {
            cache.degraded = Some(reason)
        })
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to record degraded state");
            Some(self.state())
        })
    }

    /// Fetch the profile and record the pass. `None` if it was superseded.
    async fn settle_with_identity(
        &self,
        generation: u64,
        identity: Identity,
    ) -> Option<SessionState> {
        let directory = &self.directory;
        let member_id = identity.id.as_str();

        let result = self
            .config
            .profile_policy
            .run("fetch_member_profile", move || directory.find_profile(member_id))
            .await;

        let (input, update, degraded) = match result {
            Ok(Some(profile)) => {
                debug!(member_id, organization_id = %profile.organization_id, "Profile resolved");
                (SessionMachineInput::ProfileFound, ProfileUpdate::Set(profile), None)
            }
            Ok(None) => {
                info!(member_id, "Identity has no member profile yet");
                (SessionMachineInput::ProfileMissing, ProfileUpdate::Clear, None)
            }
            Err(e) if e.timed_out() => {
                warn!(member_id, "Profile fetch timed out, keeping stale profile");
                (
                    SessionMachineInput::Degrade,
                    ProfileUpdate::KeepIfSameMember,
                    Some(DegradedReason::Timeout),
                )
            }
            Err(e) => {
                warn!(member_id, error = %e, "Profile fetch failed");
                (
                    SessionMachineInput::Degrade,
                    ProfileUpdate::Clear,
                    Some(DegradedReason::Error(e.to_string())),
                )
            }
        };

        let outcome = |cache: &mut Cache| {
            cache.profile = match update {
                ProfileUpdate::Set(profile) => Some(profile),
                ProfileUpdate::Clear => None,
                ProfileUpdate::KeepIfSameMember => {
                    cache.profile.take().filter(|p| p.id == identity.id)
                }
            };
            cache.identity = Some(identity);
            cache.degraded = degraded;
        };

        self.transition(Some(generation), &input, outcome)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to record reconcile result");
                Some(self.state())
            })
    }

    /// Sign in with email and password, then reconcile.
    ///
    /// Returns whether a member profile is now resolved; `Ok(false)` means
    /// the identity still needs provisioning (or the profile fetch degraded).
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<bool> {
        self.reset_retry_budget();
        let identity = self.identity_provider.sign_in(email, password).await?;
        info!(user_id = %identity.id, "Signed in");
        Ok(self.reconcile(ReconcileTrigger::UserInitiated).await)
    }

    /// Register an account, then reconcile.
    pub async fn sign_up(&self, email: &str, password: &str) -> AuthResult<bool> {
        self.reset_retry_budget();
        let identity = self.identity_provider.sign_up(email, password).await?;
        info!(user_id = %identity.id, "Account created");
        Ok(self.reconcile(ReconcileTrigger::UserInitiated).await)
    }

    /// Sign out with the provider and clear the local cache.
    ///
    /// The cache is cleared even when the provider call fails; transient
    /// failures are only logged.
    pub async fn sign_out(&self) -> AuthResult<()> {
        self.reset_retry_budget();
        let remote = self.identity_provider.sign_out().await;
        self.clear_local();

        match remote {
            Ok(()) => {
                info!("Signed out");
                Ok(())
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Provider sign-out failed, local session cleared");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn clear_local(&self) {
        if let Err(e) = self.transition(None, &SessionMachineInput::SignOut, Cache::clear) {
            warn!(error = %e, "Failed to record sign-out");
        }
    }

    /// React to a credential change reported by the provider.
    pub async fn handle_credential_event(&self, event: CredentialEvent) {
        debug!(event = ?event, "Credential event");
        self.reset_retry_budget();
        match event {
            CredentialEvent::SignedOut => self.clear_local(),
            CredentialEvent::SignedIn { .. }
            | CredentialEvent::TokenRefreshed { .. }
            | CredentialEvent::UserUpdated { .. } => {
                self.reconcile(ReconcileTrigger::Automatic).await;
            }
        }
    }

    /// Feed provider credential events into the store until the provider
    /// drops its sender.
    pub fn watch_credentials(self: Arc<Self>) -> JoinHandle<()> {
        let mut events = self.identity_provider.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => self.handle_credential_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed credential events, reconciling");
                        self.reset_retry_budget();
                        self.reconcile(ReconcileTrigger::Automatic).await;
                    }
                    Err(RecvError::Closed) => {
                        debug!("Credential event stream closed");
                        break;
                    }
                }
            }
        })
    }
}
