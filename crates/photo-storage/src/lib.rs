//! Member headshot photos.
//!
//! Object bytes live in the storage bucket and metadata lives in the `photos`
//! table. [`PhotoStorageService`] keeps the two consistent:
//! - uploads write the object first and remove it again if the row insert fails
//! - deletes remove the row first; a leftover object is only logged
//!
//! The per-member quota is checked client-side before each upload. The
//! check and the insert are not atomic, so the backing database must also
//! enforce the limit.

mod error;
mod key;
mod service;


pub use error::{PhotoError, PhotoResult};
pub use key::{key_from_url, sanitize_file_name, storage_key};
pub use service::{
    PhotoServiceConfig, PhotoStorageService, PhotoUpload, UploadedPhoto, MAX_PHOTOS_PER_MEMBER,
    MAX_UPLOAD_BYTES,
};
