//! In-memory collaborators for tests.
//!
//! Provides:
//! - MemoryIdentityProvider: scripted identity/session answers, accounts,
//!   redirect exchange, credential events and call counters
//! - MemoryBackend: member directory, photo table and object store sharing
//!   one state, with per-operation fault injection and delays

use crate::types::{
    CredentialEvent, Identity, MemberProfile, NewMember, NewPhoto, Organization, Photo,
    RedirectParams, Session,
};
use crate::{
    BackendError, BackendResult, IdentityProvider, MemberDirectory, ObjectStore, PhotoTable,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

/// Public URL prefix used by [`MemoryBackend`].
pub const MEMORY_PUBLIC_URL_PREFIX: &str = "https://storage.test/storage/v1/object/public/photos";

// =============================================================================
// Identity provider
// =============================================================================

struct IdpState {
    identity_script: VecDeque<BackendResult<Option<Identity>>>,
    identity_default: BackendResult<Option<Identity>>,
    session_script: VecDeque<BackendResult<Option<Session>>>,
    session_default: BackendResult<Option<Session>>,
    exchange_result: BackendResult<Session>,
    exchange_delay: Duration,
    lookup_delay: Duration,
    accounts: HashMap<String, (String, Identity)>,
}

/// Scripted identity provider.
///
/// Queued answers (`push_*`) are consumed first; afterwards the default
/// answer (`set_*`) repeats.
pub struct MemoryIdentityProvider {
    state: Mutex<IdpState>,
    events: broadcast::Sender<CredentialEvent>,
    identity_calls: AtomicUsize,
    session_calls: AtomicUsize,
    exchange_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentityProvider {
    /// Signed-out provider.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            state: Mutex::new(IdpState {
                identity_script: VecDeque::new(),
                identity_default: Err(BackendError::NoSession),
                session_script: VecDeque::new(),
                session_default: Ok(None),
                exchange_result: Err(BackendError::MalformedCredential(
                    "no exchange configured".to_string(),
                )),
                exchange_delay: Duration::ZERO,
                lookup_delay: Duration::ZERO,
                accounts: HashMap::new(),
            }),
            events,
            identity_calls: AtomicUsize::new(0),
            session_calls: AtomicUsize::new(0),
            exchange_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
        }
    }

    /// Provider already signed in as `identity` with a one-hour session.
    pub fn signed_in(identity: Identity) -> Self {
        let idp = Self::new();
        idp.set_signed_in(identity);
        idp
    }

    /// Make both lookups answer with `identity` and a fresh session.
    pub fn set_signed_in(&self, identity: Identity) {
        let session = Session::issue(identity.clone(), "memory-token", ChronoDuration::hours(1));
        let mut state = self.state.lock();
        state.identity_default = Ok(Some(identity));
        state.session_default = Ok(Some(session));
    }

    /// Make both lookups report that nobody is signed in.
    pub fn set_signed_out(&self) {
        let mut state = self.state.lock();
        state.identity_default = Err(BackendError::NoSession);
        state.session_default = Ok(None);
    }

    pub fn set_identity_result(&self, result: BackendResult<Option<Identity>>) {
        self.state.lock().identity_default = result;
    }

    pub fn push_identity_result(&self, result: BackendResult<Option<Identity>>) {
        self.state.lock().identity_script.push_back(result);
    }

    pub fn set_session_result(&self, result: BackendResult<Option<Session>>) {
        self.state.lock().session_default = result;
    }

    pub fn push_session_result(&self, result: BackendResult<Option<Session>>) {
        self.state.lock().session_script.push_back(result);
    }

    pub fn set_exchange_result(&self, result: BackendResult<Session>) {
        self.state.lock().exchange_result = result;
    }

    pub fn set_exchange_delay(&self, delay: Duration) {
        self.state.lock().exchange_delay = delay;
    }

    /// Delay applied to both identity lookups.
    pub fn set_lookup_delay(&self, delay: Duration) {
        self.state.lock().lookup_delay = delay;
    }

    pub fn add_account(&self, email: &str, password: &str, identity: Identity) {
        self.state
            .lock()
            .accounts
            .insert(email.to_string(), (password.to_string(), identity));
    }

    /// Broadcast a credential event to subscribers.
    pub fn emit(&self, event: CredentialEvent) {
        let _ = self.events.send(event);
    }

    pub fn identity_calls(&self) -> usize {
        self.identity_calls.load(Ordering::SeqCst)
    }

    pub fn session_calls(&self) -> usize {
        self.session_calls.load(Ordering::SeqCst)
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<Identity> {
        let identity = {
            let mut state = self.state.lock();
            if state.accounts.contains_key(email) {
                return Err(BackendError::Rejected {
                    status: 422,
                    message: "User already registered".to_string(),
                });
            }
            let identity = Identity::new(uuid::Uuid::new_v4().to_string(), Some(email));
            state
                .accounts
                .insert(email.to_string(), (password.to_string(), identity.clone()));
            identity
        };
        self.set_signed_in(identity.clone());
        self.emit(CredentialEvent::SignedIn {
            user_id: identity.id.clone(),
        });
        Ok(identity)
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Identity> {
        let identity = {
            let state = self.state.lock();
            match state.accounts.get(email) {
                Some((stored, identity)) if stored == password => identity.clone(),
                _ => {
                    return Err(BackendError::InvalidCredentials(
                        "Invalid login credentials".to_string(),
                    ))
                }
            }
        };
        self.set_signed_in(identity.clone());
        self.emit(CredentialEvent::SignedIn {
            user_id: identity.id.clone(),
        });
        Ok(identity)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        self.set_signed_out();
        self.emit(CredentialEvent::SignedOut);
        Ok(())
    }

    async fn current_identity(&self) -> BackendResult<Option<Identity>> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        let (delay, result) = {
            let mut state = self.state.lock();
            let result = state
                .identity_script
                .pop_front()
                .unwrap_or_else(|| state.identity_default.clone());
            (state.lookup_delay, result)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn current_session(&self) -> BackendResult<Option<Session>> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        let (delay, result) = {
            let mut state = self.state.lock();
            let result = state
                .session_script
                .pop_front()
                .unwrap_or_else(|| state.session_default.clone());
            (state.lookup_delay, result)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn exchange_redirect(&self, _params: &RedirectParams) -> BackendResult<Session> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        let (delay, result) = {
            let state = self.state.lock();
            (state.exchange_delay, state.exchange_result.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Ok(session) = &result {
            self.set_signed_in(session.identity.clone());
            self.emit(CredentialEvent::SignedIn {
                user_id: session.identity.id.clone(),
            });
        }
        result
    }

    fn subscribe(&self) -> broadcast::Receiver<CredentialEvent> {
        self.events.subscribe()
    }
}

// =============================================================================
// Member directory, photo table and object store
// =============================================================================

/// Operations that accept injected faults and delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    FindProfile,
    FindOrganization,
    InsertMember,
    ListPhotos,
    GetPhoto,
    InsertPhoto,
    DeletePhoto,
    PutObject,
    RemoveObject,
}

#[derive(Default)]
struct BackendState {
    organizations: Vec<Organization>,
    members: HashMap<String, MemberProfile>,
    photos: Vec<Photo>,
    objects: HashMap<String, Vec<u8>>,
    removed_keys: Vec<String>,
    next_photo_seq: i64,
}

#[derive(Default)]
struct Faults {
    queued: HashMap<BackendOp, VecDeque<BackendError>>,
    sticky: HashMap<BackendOp, BackendError>,
    delays: HashMap<BackendOp, Duration>,
    /// Stalls applied after the write has landed.
    stalls: HashMap<BackendOp, VecDeque<Duration>>,
}

/// In-memory tables and bucket.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<BackendState>,
    faults: Mutex<Faults>,
    calls: Mutex<HashMap<BackendOp, usize>>,
    public_urls_disabled: std::sync::atomic::AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_organization(&self, organization: Organization) {
        self.state.lock().organizations.push(organization);
    }

    pub fn add_profile(&self, profile: MemberProfile) {
        self.state
            .lock()
            .members
            .insert(profile.id.clone(), profile);
    }

    /// Insert a photo row (and a matching object) without going through faults.
    pub fn seed_photo(&self, organization_id: &str, owner_member_id: &str) -> Photo {
        let mut state = self.state.lock();
        state.next_photo_seq += 1;
        let seq = state.next_photo_seq;
        let key = format!("{}/{}/seed_{}.jpg", organization_id, owner_member_id, seq);
        state.objects.insert(key.clone(), vec![0xFF, 0xD8]);
        let photo = Photo {
            id: format!("photo-{}", seq),
            owner_member_id: owner_member_id.to_string(),
            image_url: format!("{}/{}", MEMORY_PUBLIC_URL_PREFIX, key),
            created_at: timestamp(seq),
        };
        state.photos.push(photo.clone());
        photo
    }

    /// Fail the next call of `op` with `error`. Queued faults stack.
    pub fn fail_next(&self, op: BackendOp, error: BackendError) {
        self.faults
            .lock()
            .queued
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Fail every call of `op` with `error` until cleared.
    pub fn fail_always(&self, op: BackendOp, error: BackendError) {
        self.faults.lock().sticky.insert(op, error);
    }

    /// Let the next call of `op` apply its write, then stall for `delay`
    /// before answering. Queued stalls stack.
    pub fn stall_after_commit(&self, op: BackendOp, delay: Duration) {
        self.faults
            .lock()
            .stalls
            .entry(op)
            .or_default()
            .push_back(delay);
    }

    pub fn clear_faults(&self, op: BackendOp) {
        let mut faults = self.faults.lock();
        faults.queued.remove(&op);
        faults.sticky.remove(&op);
        faults.stalls.remove(&op);
    }

    pub fn set_delay(&self, op: BackendOp, delay: Duration) {
        self.faults.lock().delays.insert(op, delay);
    }

    /// Make `public_url` return `None`.
    pub fn disable_public_urls(&self) {
        self.public_urls_disabled.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self, op: BackendOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    pub fn member_count(&self) -> usize {
        self.state.lock().members.len()
    }

    pub fn profile(&self, member_id: &str) -> Option<MemberProfile> {
        self.state.lock().members.get(member_id).cloned()
    }

    pub fn photo_count(&self, owner_member_id: &str) -> usize {
        self.state
            .lock()
            .photos
            .iter()
            .filter(|p| p.owner_member_id == owner_member_id)
            .count()
    }

    pub fn has_object(&self, key: &str) -> bool {
        self.state.lock().objects.contains_key(key)
    }

    pub fn object_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Keys passed to `remove`, in call order, including failed calls.
    pub fn removed_keys(&self) -> Vec<String> {
        self.state.lock().removed_keys.clone()
    }

    /// Count the call, apply any delay, then surface any injected fault.
    async fn enter(&self, op: BackendOp) -> BackendResult<()> {
        *self.calls.lock().entry(op).or_insert(0) += 1;

        let (delay, fault) = {
            let mut faults = self.faults.lock();
            let delay = faults.delays.get(&op).copied().unwrap_or(Duration::ZERO);
            let fault = match faults.queued.get_mut(&op).and_then(|q| q.pop_front()) {
                Some(error) => Some(error),
                None => faults.sticky.get(&op).cloned(),
            };
            (delay, fault)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match fault {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn after_commit(&self, op: BackendOp) {
        let stall = self
            .faults
            .lock()
            .stalls
            .get_mut(&op)
            .and_then(|q| q.pop_front());
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
    }
}

fn timestamp(seq: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000 + seq, 0).unwrap_or_default()
}

fn newest_first(photos: &mut [Photo]) {
    photos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl MemberDirectory for MemoryBackend {
    async fn find_profile(&self, member_id: &str) -> BackendResult<Option<MemberProfile>> {
        self.enter(BackendOp::FindProfile).await?;
        Ok(self.state.lock().members.get(member_id).cloned())
    }

    async fn find_organization_by_join_code(
        &self,
        join_code: &str,
    ) -> BackendResult<Option<Organization>> {
        self.enter(BackendOp::FindOrganization).await?;
        Ok(self
            .state
            .lock()
            .organizations
            .iter()
            .find(|o| o.join_code == join_code)
            .cloned())
    }

    async fn insert_member(&self, member: &NewMember) -> BackendResult<MemberProfile> {
        self.enter(BackendOp::InsertMember).await?;
        let mut state = self.state.lock();
        if state.members.contains_key(&member.id) {
            return Err(BackendError::Conflict(
                "duplicate key value violates unique constraint \"members_pkey\"".to_string(),
            ));
        }
        let organization = state
            .organizations
            .iter()
            .find(|o| o.id == member.organization_id)
            .map(Organization::summary)
            .ok_or_else(|| BackendError::Rejected {
                status: 409,
                message: "organization does not exist".to_string(),
            })?;
        let profile = MemberProfile {
            id: member.id.clone(),
            name: member.name.clone(),
            email: member.email.clone(),
            organization_id: member.organization_id.clone(),
            role: member.role,
            organization,
        };
        state.members.insert(profile.id.clone(), profile.clone());
        Ok(profile)
    }
}

#[async_trait]
impl PhotoTable for MemoryBackend {
    async fn list_for_owner(
        &self,
        owner_member_id: &str,
        limit: usize,
    ) -> BackendResult<Vec<Photo>> {
        self.enter(BackendOp::ListPhotos).await?;
        let mut photos: Vec<Photo> = self
            .state
            .lock()
            .photos
            .iter()
            .filter(|p| p.owner_member_id == owner_member_id)
            .cloned()
            .collect();
        newest_first(&mut photos);
        photos.truncate(limit);
        Ok(photos)
    }

    async fn list_for_owners(
        &self,
        owner_member_ids: &[String],
        limit: usize,
    ) -> BackendResult<Vec<Photo>> {
        self.enter(BackendOp::ListPhotos).await?;
        let owners: HashSet<&String> = owner_member_ids.iter().collect();
        let mut photos: Vec<Photo> = self
            .state
            .lock()
            .photos
            .iter()
            .filter(|p| owners.contains(&p.owner_member_id))
            .cloned()
            .collect();
        newest_first(&mut photos);
        photos.truncate(limit);
        Ok(photos)
    }

    async fn get(&self, photo_id: &str) -> BackendResult<Option<Photo>> {
        self.enter(BackendOp::GetPhoto).await?;
        Ok(self
            .state
            .lock()
            .photos
            .iter()
            .find(|p| p.id == photo_id)
            .cloned())
    }

    async fn insert(&self, photo: &NewPhoto) -> BackendResult<Photo> {
        self.enter(BackendOp::InsertPhoto).await?;
        let mut state = self.state.lock();
        state.next_photo_seq += 1;
        let seq = state.next_photo_seq;
        let row = Photo {
            id: format!("photo-{}", seq),
            owner_member_id: photo.owner_member_id.clone(),
            image_url: photo.image_url.clone(),
            created_at: timestamp(seq),
        };
        state.photos.push(row.clone());
        Ok(row)
    }

    async fn delete(&self, photo_id: &str) -> BackendResult<()> {
        self.enter(BackendOp::DeletePhoto).await?;
        self.state.lock().photos.retain(|p| p.id != photo_id);
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> BackendResult<String> {
        self.enter(BackendOp::PutObject).await?;
        self.state.lock().objects.insert(key.to_string(), bytes);
        self.after_commit(BackendOp::PutObject).await;
        Ok(format!("photos/{}", key))
    }

    fn public_url(&self, key: &str) -> Option<String> {
        if self.public_urls_disabled.load(Ordering::SeqCst) {
            return None;
        }
        Some(format!("{}/{}", MEMORY_PUBLIC_URL_PREFIX, key))
    }

    async fn remove(&self, key: &str) -> BackendResult<()> {
        self.state.lock().removed_keys.push(key.to_string());
        self.enter(BackendOp::RemoveObject).await?;
        self.state.lock().objects.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_identity_answers_then_default() {
        let idp = MemoryIdentityProvider::signed_in(Identity::new("u1", None));
        idp.push_identity_result(Err(BackendError::Timeout));

        assert_eq!(idp.current_identity().await, Err(BackendError::Timeout));
        assert_eq!(
            idp.current_identity().await.unwrap().unwrap().id,
            "u1".to_string()
        );
        assert_eq!(idp.identity_calls(), 2);
    }

    #[tokio::test]
    async fn test_sign_in_checks_password() {
        let idp = MemoryIdentityProvider::new();
        idp.add_account("a@acme.com", "secret", Identity::new("u1", Some("a@acme.com")));

        assert!(matches!(
            idp.sign_in("a@acme.com", "wrong").await,
            Err(BackendError::InvalidCredentials(_))
        ));
        assert_eq!(idp.sign_in("a@acme.com", "secret").await.unwrap().id, "u1");
        assert!(idp.current_session().await.unwrap().unwrap().is_valid());
    }

    #[tokio::test]
    async fn test_fault_queue_then_sticky() {
        let backend = MemoryBackend::new();
        backend.fail_next(BackendOp::ListPhotos, BackendError::Timeout);
        backend.fail_always(
            BackendOp::ListPhotos,
            BackendError::Network("down".to_string()),
        );

        assert_eq!(
            backend.list_for_owner("u1", 10).await,
            Err(BackendError::Timeout)
        );
        assert!(matches!(
            backend.list_for_owner("u1", 10).await,
            Err(BackendError::Network(_))
        ));

        backend.clear_faults(BackendOp::ListPhotos);
        assert!(backend.list_for_owner("u1", 10).await.unwrap().is_empty());
        assert_eq!(backend.calls(BackendOp::ListPhotos), 3);
    }

    #[tokio::test]
    async fn test_photos_listed_newest_first() {
        let backend = MemoryBackend::new();
        let first = backend.seed_photo("org1", "u1");
        let second = backend.seed_photo("org1", "u1");

        let photos = backend.list_for_owner("u1", 10).await.unwrap();
        assert_eq!(photos, vec![second, first]);
    }

    #[tokio::test]
    async fn test_duplicate_member_insert_conflicts() {
        let backend = MemoryBackend::new();
        backend.add_organization(Organization {
            id: "org1".to_string(),
            name: "Acme".to_string(),
            join_code: "ACME-2024".to_string(),
        });
        let member = NewMember {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            email: "a@acme.com".to_string(),
            organization_id: "org1".to_string(),
            role: crate::MemberRole::Member,
        };

        backend.insert_member(&member).await.unwrap();
        assert!(backend.insert_member(&member).await.unwrap_err().is_conflict());
        assert_eq!(backend.member_count(), 1);
    }
}
