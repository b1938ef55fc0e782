//! Shared fixtures: the Acme organization, its first member and a host that
//! records what the resolver did to it.

use crate::{
    CallbackHost, OAuthCallbackResolver, ProfileProvisioner, ResolverConfig, Route, SessionStore,
    SessionStoreConfig,
};
use parking_lot::Mutex;
use roster_backend::memory::{MemoryBackend, MemoryIdentityProvider};
use roster_backend::{Identity, MemberProfile, MemberRole, Organization, Session};
use std::sync::Arc;
use url::Url;

pub(crate) fn acme() -> Organization {
    Organization {
        id: "org1".to_string(),
        name: "Acme".to_string(),
        join_code: "ACME-2024".to_string(),
    }
}

pub(crate) fn ada() -> Identity {
    Identity::new("u1", Some("a@acme.com"))
}

pub(crate) fn ada_profile() -> MemberProfile {
    MemberProfile {
        id: "u1".to_string(),
        name: "Ada".to_string(),
        email: "a@acme.com".to_string(),
        organization_id: "org1".to_string(),
        role: MemberRole::Member,
        organization: acme().summary(),
    }
}

pub(crate) fn valid_session(identity: Identity) -> Session {
    Session::issue(identity, "access-token", chrono::Duration::hours(1))
}

pub(crate) struct Harness {
    pub idp: Arc<MemoryIdentityProvider>,
    pub backend: Arc<MemoryBackend>,
}

impl Harness {
    /// Signed-out provider, Acme organization, no members.
    pub fn new() -> Self {
        let backend = MemoryBackend::new();
        backend.add_organization(acme());
        Self {
            idp: Arc::new(MemoryIdentityProvider::new()),
            backend: Arc::new(backend),
        }
    }

    /// Ada signed in with a member profile.
    pub fn signed_in_member() -> Self {
        let harness = Self::new();
        harness.idp.set_signed_in(ada());
        harness.backend.add_profile(ada_profile());
        harness
    }

    pub fn store(&self) -> SessionStore {
        self.store_with(SessionStoreConfig::default())
    }

    pub fn store_with(&self, config: SessionStoreConfig) -> SessionStore {
        SessionStore::with_config(self.idp.clone(), self.backend.clone(), config)
    }

    pub fn provisioner(&self) -> ProfileProvisioner {
        ProfileProvisioner::new(self.backend.clone())
    }

    pub fn resolver(&self, host: Arc<RecordingHost>) -> OAuthCallbackResolver {
        OAuthCallbackResolver::with_config(
            self.idp.clone(),
            self.backend.clone(),
            host,
            ResolverConfig::default(),
        )
    }
}

/// Callback host that remembers every call.
pub(crate) struct RecordingHost {
    url: Mutex<Url>,
    replaced: Mutex<Vec<Url>>,
    errors: Mutex<Vec<String>>,
    routes: Mutex<Vec<Route>>,
}

impl RecordingHost {
    pub fn at(raw: &str) -> Arc<Self> {
        Arc::new(Self {
            url: Mutex::new(Url::parse(raw).unwrap()),
            replaced: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            routes: Mutex::new(Vec::new()),
        })
    }

    pub fn replaced(&self) -> Vec<String> {
        self.replaced.lock().iter().map(Url::to_string).collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn routes(&self) -> Vec<Route> {
        self.routes.lock().clone()
    }
}

impl CallbackHost for RecordingHost {
    fn current_url(&self) -> Url {
        self.url.lock().clone()
    }

    fn replace_url(&self, url: &Url) {
        *self.url.lock() = url.clone();
        self.replaced.lock().push(url.clone());
    }

    fn show_error(&self, message: &str) {
        self.errors.lock().push(message.to_string());
    }

    fn navigate(&self, route: Route) {
        self.routes.lock().push(route);
    }
}
