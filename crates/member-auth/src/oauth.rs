//! Federated-login redirect handling.
//!
//! One [`OAuthCallbackResolver`] exists per page load. It claims the redirect
//! with an atomic compare-and-swap, so exactly one `resolve` call ever
//! exchanges the credentials, however many times the host invokes it.

use crate::auth_fsm::{CallbackMachine, CallbackMachineInput, CallbackState};
use parking_lot::Mutex;
use retry_policy::RetryPolicy;
use roster_backend::{IdentityProvider, MemberDirectory, RedirectParams, REDIRECT_MARKERS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::{form_urlencoded, Url};

const DEFAULT_ERROR_MESSAGE: &str = "Sign-in failed. Please try again.";

/// Where the host should go once the redirect is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Signed in with a member profile.
    Dashboard,
    /// Signed in, but the member profile still has to be created.
    Provisioning,
    /// Back to the unauthenticated entry point.
    SignIn,
}

/// The page hosting the callback.
pub trait CallbackHost: Send + Sync {
    /// Address currently shown, including query and fragment.
    fn current_url(&self) -> Url;

    /// Replace the visible address without navigating.
    fn replace_url(&self, url: &Url);

    /// Show an error to the user.
    fn show_error(&self, message: &str);

    fn navigate(&self, route: Route);
}

/// Tuning for [`OAuthCallbackResolver`].
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub exchange_policy: RetryPolicy,
    /// Deadline for the single profile lookup after a successful exchange.
    pub profile_timeout: Duration,
    /// How long an error stays visible before routing to sign-in.
    pub error_redirect_delay: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            exchange_policy: RetryPolicy::new(2, Duration::from_secs(15)),
            profile_timeout: Duration::from_secs(10),
            error_redirect_delay: Duration::from_secs(3),
        }
    }
}

pub struct OAuthCallbackResolver {
    identity_provider: Arc<dyn IdentityProvider>,
    directory: Arc<dyn MemberDirectory>,
    host: Arc<dyn CallbackHost>,
    config: ResolverConfig,
    claimed: AtomicBool,
    fsm: Mutex<CallbackMachine>,
}

impl OAuthCallbackResolver {
    pub fn new(
        identity_provider: Arc<dyn IdentityProvider>,
        directory: Arc<dyn MemberDirectory>,
        host: Arc<dyn CallbackHost>,
    ) -> Self {
        Self::with_config(identity_provider, directory, host, ResolverConfig::default())
    }

    pub fn with_config(
        identity_provider: Arc<dyn IdentityProvider>,
        directory: Arc<dyn MemberDirectory>,
        host: Arc<dyn CallbackHost>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            identity_provider,
            directory,
            host,
            config,
            claimed: AtomicBool::new(false),
            fsm: Mutex::new(CallbackMachine::new()),
        }
    }

    pub fn state(&self) -> CallbackState {
        CallbackState::from(self.fsm.lock().state())
    }

    fn transition(&self, input: &CallbackMachineInput) {
        let mut fsm = self.fsm.lock();
        if fsm.consume(input).is_err() {
            warn!(input = ?input, state = ?fsm.state(), "Ignoring invalid callback transition");
        }
    }

    /// Handle the redirect in the current address, if there is one.
    ///
    /// Without redirect markers this is a no-op that leaves the resolver
    /// `Idle`. Calls made while another call is processing, or after one
    /// finished, return the current state without side effects.
    pub async fn resolve(&self) -> CallbackState {
        let url = self.host.current_url();
        let Some(params) = RedirectParams::from_url(&url) else {
            return self.state();
        };

        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Redirect already claimed");
            return self.state();
        }
        self.transition(&CallbackMachineInput::Detect);

        if params.is_error() {
            let message = params
                .error_message()
                .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string());
            warn!(error_code = ?params.error_code, "Provider returned an error redirect");
            return self.fail(&url, &message).await;
        }

        self.transition(&CallbackMachineInput::Begin);
        let provider = &self.identity_provider;
        let exchange = self
            .config
            .exchange_policy
            .run("exchange_redirect", || provider.exchange_redirect(&params))
            .await;

        let session = match exchange {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Redirect exchange failed");
                return self.fail(&url, DEFAULT_ERROR_MESSAGE).await;
            }
        };

        // Strip before any further async work so a reload cannot replay it.
        self.host.replace_url(&strip_redirect_markers(&url));

        let directory = &self.directory;
        let member_id = session.identity.id.as_str();
        let route = match RetryPolicy::once(self.config.profile_timeout)
            .run("lookup_profile", || directory.find_profile(member_id))
            .await
        {
            Ok(Some(_)) => Route::Dashboard,
            Ok(None) => Route::Provisioning,
            Err(e) => {
                warn!(member_id, error = %e, "Profile lookup failed, routing to provisioning");
                Route::Provisioning
            }
        };

        info!(member_id, route = ?route, "Redirect resolved");
        self.transition(&CallbackMachineInput::Succeed);
        self.host.navigate(route);
        self.state()
    }

    async fn fail(&self, url: &Url, message: &str) -> CallbackState {
        self.transition(&CallbackMachineInput::Fail);
        self.host.show_error(message);
        self.host.replace_url(&strip_redirect_markers(url));
        tokio::time::sleep(self.config.error_redirect_delay).await;
        self.host.navigate(Route::SignIn);
        self.state()
    }
}

fn is_marker(key: &str) -> bool {
    REDIRECT_MARKERS.contains(&key)
}

/// Re-encode `encoded` without redirect markers; `None` if it had none.
fn without_markers(encoded: &str) -> Option<String> {
    let pairs: Vec<(String, String)> = form_urlencoded::parse(encoded.as_bytes())
        .into_owned()
        .collect();
    if !pairs.iter().any(|(key, _)| is_marker(key)) {
        return None;
    }

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs.iter().filter(|(key, _)| !is_marker(key)) {
        serializer.append_pair(key, value);
    }
    Some(serializer.finish())
}

/// Remove redirect markers from the query and fragment of `url`.
///
/// Unrelated parameters are preserved; a query or fragment left empty is
/// removed entirely.
pub fn strip_redirect_markers(url: &Url) -> Url {
    let mut clean = url.clone();

    if let Some(kept) = url.query().and_then(without_markers) {
        clean.set_query((!kept.is_empty()).then_some(kept.as_str()));
    }
    if let Some(kept) = url.fragment().and_then(without_markers) {
        clean.set_fragment((!kept.is_empty()).then_some(kept.as_str()));
    }
    clean
}
