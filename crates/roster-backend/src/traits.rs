//! Collaborator contracts.
//!
//! Organization-scoped authorization is enforced by the remote database;
//! implementations only have to forward the caller's credentials.

use crate::types::{
    CredentialEvent, Identity, MemberProfile, NewMember, NewPhoto, Organization, Photo,
    RedirectParams, Session,
};
use crate::BackendResult;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Remote identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Register a new account.
    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<Identity>;

    /// Sign in with email and password.
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Identity>;

    /// End the current session.
    async fn sign_out(&self) -> BackendResult<()>;

    /// Ask the provider who the current user is.
    ///
    /// Fails with [`BackendError::NoSession`](crate::BackendError::NoSession)
    /// when there is no session to ask about.
    async fn current_identity(&self) -> BackendResult<Option<Identity>>;

    /// The provider's current session, possibly expired.
    async fn current_session(&self) -> BackendResult<Option<Session>>;

    /// Turn federated-login redirect parameters into a session.
    async fn exchange_redirect(&self, params: &RedirectParams) -> BackendResult<Session>;

    /// Subscribe to credential changes. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<CredentialEvent>;
}

/// `members` and `organizations` tables.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// Profile for a member id, joined with its organization.
    async fn find_profile(&self, member_id: &str) -> BackendResult<Option<MemberProfile>>;

    async fn find_organization_by_join_code(
        &self,
        join_code: &str,
    ) -> BackendResult<Option<Organization>>;

    /// Insert a member row. Fails with `Conflict` if the id already exists.
    async fn insert_member(&self, member: &NewMember) -> BackendResult<MemberProfile>;
}

/// `photos` metadata table.
#[async_trait]
pub trait PhotoTable: Send + Sync {
    /// Photos for one owner, newest first.
    async fn list_for_owner(&self, owner_member_id: &str, limit: usize)
        -> BackendResult<Vec<Photo>>;

    /// Photos for several owners in one request, newest first.
    async fn list_for_owners(
        &self,
        owner_member_ids: &[String],
        limit: usize,
    ) -> BackendResult<Vec<Photo>>;

    async fn get(&self, photo_id: &str) -> BackendResult<Option<Photo>>;

    async fn insert(&self, photo: &NewPhoto) -> BackendResult<Photo>;

    async fn delete(&self, photo_id: &str) -> BackendResult<()>;
}

/// Object storage bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` under `key`, replacing any object already stored
    /// there; returns the stored path.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> BackendResult<String>;

    /// Public URL for `key`, if the bucket exposes one.
    fn public_url(&self, key: &str) -> Option<String>;

    async fn remove(&self, key: &str) -> BackendResult<()>;
}
