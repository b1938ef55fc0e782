//! Backend contracts for Roster.
//!
//! This crate provides:
//! - The shared data model (identities, sessions, member profiles,
//!   organizations, photos)
//! - [`BackendError`], the error every collaborator reports
//! - Collaborator traits for the identity provider, the member directory,
//!   the photo metadata table and the object store
//! - Supabase implementations of those traits over REST
//! - In-memory doubles with fault injection (`test-support` feature)

mod error;
pub mod supabase;
mod traits;
mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

pub use error::{BackendError, BackendResult};
pub use supabase::{AccessTokenSource, SupabaseAuth, SupabaseClient};
pub use traits::{IdentityProvider, MemberDirectory, ObjectStore, PhotoTable};
pub use types::{
    CredentialEvent, Identity, MemberProfile, MemberRole, NewMember, NewPhoto, Organization,
    OrganizationSummary, Photo, RedirectParams, Session, REDIRECT_MARKERS,
};
