//! CLI command implementations.

mod auth;
mod callback;
mod photos;
mod provision;

pub use auth::{login, logout, signup, status};
pub use callback::callback;
pub use photos::{photos_delete, photos_list, photos_upload};
pub use provision::provision;

use anyhow::Result;
use member_auth::{ProfileProvisioner, ReconcileTrigger, SessionStore};
use photo_storage::PhotoStorageService;
use roster_backend::{AccessTokenSource, MemberProfile, SupabaseAuth, SupabaseClient};
use roster_config_and_utils::{Config, Paths};
use std::sync::Arc;

/// Backend clients shared by every command.
pub struct Context {
    pub config: Config,
    pub auth: Arc<SupabaseAuth>,
    pub client: Arc<SupabaseClient>,
}

impl Context {
    /// Build the Supabase clients, restoring any stored session.
    pub fn new(paths: Paths, config: Config) -> Result<Self> {
        config.validate()?;
        paths.ensure_dirs()?;

        let auth = Arc::new(
            SupabaseAuth::new(&config.supabase_url, &config.supabase_publishable_key)
                .with_session_file(paths.session_file()),
        );
        let tokens: Arc<dyn AccessTokenSource> = auth.clone();
        let client = Arc::new(
            SupabaseClient::new(
                &config.supabase_url,
                &config.supabase_publishable_key,
                &config.photo_bucket,
            )
            .with_token_source(tokens),
        );

        Ok(Self {
            config,
            auth,
            client,
        })
    }

    pub fn session_store(&self) -> SessionStore {
        SessionStore::new(self.auth.clone(), self.client.clone())
    }

    pub fn provisioner(&self) -> ProfileProvisioner {
        ProfileProvisioner::new(self.client.clone())
    }

    pub fn photo_service(&self) -> PhotoStorageService {
        PhotoStorageService::new(self.client.clone(), self.client.clone())
    }

    /// Reconcile and return the signed-in member's profile.
    pub async fn require_member(&self) -> Result<MemberProfile> {
        let store = self.session_store();
        store.reconcile(ReconcileTrigger::UserInitiated).await;
        let snapshot = store.snapshot();
        match snapshot.profile {
            Some(profile) => Ok(profile),
            None if snapshot.identity.is_some() => anyhow::bail!(
                "No member profile yet ({}). Join an organization with 'roster provision --join-code <code>'",
                snapshot.state
            ),
            None => anyhow::bail!("Not logged in. Run 'roster login' first"),
        }
    }
}
