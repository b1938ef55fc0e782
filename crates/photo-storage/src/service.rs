//! Upload, list and delete workflows.

use crate::error::{PhotoError, PhotoResult};
use crate::key::{key_from_url, storage_key};
use chrono::Utc;
use retry_policy::RetryPolicy;
use roster_backend::{NewPhoto, ObjectStore, Photo, PhotoTable};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Largest accepted upload (10 MiB).
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Photos a member may have at once.
pub const MAX_PHOTOS_PER_MEMBER: usize = 5;

/// A photo waiting to be stored.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Size the caller claims; must equal `bytes.len()`.
    pub size_bytes: usize,
    /// Original file name, sanitized into the storage key.
    pub file_name: String,
    pub owner_member_id: String,
    pub organization_id: String,
}

/// A stored photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPhoto {
    pub id: String,
    pub image_url: String,
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct PhotoServiceConfig {
    /// Policy for every retried remote call.
    pub policy: RetryPolicy,
    pub max_upload_bytes: usize,
    pub max_photos_per_member: usize,
    /// Rows fetched per owner listing and for the quota count.
    pub owner_list_limit: usize,
    /// Rows fetched by one bulk listing.
    pub bulk_list_limit: usize,
}

impl Default for PhotoServiceConfig {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            max_upload_bytes: MAX_UPLOAD_BYTES,
            max_photos_per_member: MAX_PHOTOS_PER_MEMBER,
            owner_list_limit: 10,
            bulk_list_limit: 250,
        }
    }
}

/// Keeps bucket objects and `photos` rows consistent.
pub struct PhotoStorageService {
    table: Arc<dyn PhotoTable>,
    store: Arc<dyn ObjectStore>,
    config: PhotoServiceConfig,
}

impl PhotoStorageService {
    pub fn new(table: Arc<dyn PhotoTable>, store: Arc<dyn ObjectStore>) -> Self {
        Self::with_config(table, store, PhotoServiceConfig::default())
    }

    pub fn with_config(
        table: Arc<dyn PhotoTable>,
        store: Arc<dyn ObjectStore>,
        config: PhotoServiceConfig,
    ) -> Self {
        Self {
            table,
            store,
            config,
        }
    }

    fn validate(&self, upload: &PhotoUpload) -> PhotoResult<()> {
        let mime = upload.mime_type.trim().to_ascii_lowercase();
        if !mime.starts_with("image/") || mime.len() == "image/".len() {
            return Err(PhotoError::InvalidInput(format!(
                "{} is not an image type",
                upload.mime_type
            )));
        }
        if upload.size_bytes == 0 {
            return Err(PhotoError::InvalidInput("file is empty".to_string()));
        }
        if upload.size_bytes > self.config.max_upload_bytes {
            return Err(PhotoError::InvalidInput(format!(
                "file is {} bytes, limit is {} bytes",
                upload.size_bytes, self.config.max_upload_bytes
            )));
        }
        if upload.size_bytes != upload.bytes.len() {
            return Err(PhotoError::InvalidInput(format!(
                "declared size {} does not match {} bytes received",
                upload.size_bytes,
                upload.bytes.len()
            )));
        }
        if upload.owner_member_id.trim().is_empty() || upload.organization_id.trim().is_empty() {
            return Err(PhotoError::InvalidInput(
                "owner and organization are required".to_string(),
            ));
        }
        Ok(())
    }

    /// Store a photo for its owner.
    ///
    /// The object is written before the row. If the row insert fails, or the
    /// write fails after an attempt timed out, the object is removed again
    /// with a single best-effort call. Object writes overwrite, so a retry
    /// after a timed-out attempt that did commit still succeeds.
    pub async fn upload(&self, upload: PhotoUpload) -> PhotoResult<UploadedPhoto> {
        self.validate(&upload)?;

        let owner = upload.owner_member_id.as_str();
        let count = self.count_for_owner(owner).await?;
        if count >= self.config.max_photos_per_member {
            info!(owner_member_id = owner, count, "Photo quota reached");
            return Err(PhotoError::QuotaExceeded {
                owner_member_id: owner.to_string(),
                count,
                limit: self.config.max_photos_per_member,
            });
        }

        let key = storage_key(
            &upload.organization_id,
            owner,
            &upload.file_name,
            Utc::now(),
        );

        let store = &self.store;
        let key_ref = key.as_str();
        let bytes = &upload.bytes;
        let mime = upload.mime_type.as_str();
        let mut outcome_unknown = false;
        let written = self
            .config
            .policy
            .run_observed(
                "put_object",
                move || store.put(key_ref, bytes.clone(), mime),
                |attempt| outcome_unknown |= attempt.last_error.is_timeout(),
            )
            .await;
        if let Err(e) = written {
            warn!(key = %key, error = %e, "Object write failed");
            // A timed-out attempt may still have stored the object.
            if outcome_unknown || e.timed_out() {
                self.remove_object(&key).await;
            }
            return Err(PhotoError::StorageWriteFailed {
                key,
                reason: e.to_string(),
            });
        }

        let Some(image_url) = self.store.public_url(&key) else {
            warn!(key = %key, "No public URL for stored object, leaving it orphaned");
            return Err(PhotoError::UrlResolutionFailed { key });
        };

        let table = &self.table;
        let row = NewPhoto {
            owner_member_id: owner.to_string(),
            image_url,
        };
        let row_ref = &row;
        let inserted = self
            .config
            .policy
            .run("insert_photo", move || table.insert(row_ref))
            .await;

        match inserted {
            Ok(photo) => {
                info!(photo_id = %photo.id, owner_member_id = owner, key = %key, "Photo uploaded");
                Ok(UploadedPhoto {
                    id: photo.id,
                    image_url: photo.image_url,
                })
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Photo row insert failed, removing object");
                self.remove_object(&key).await;
                Err(PhotoError::MetadataWriteFailed {
                    key,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn count_for_owner(&self, owner: &str) -> PhotoResult<usize> {
        let table = &self.table;
        let limit = self.config.owner_list_limit;
        let photos = self
            .config
            .policy
            .run("count_photos", move || table.list_for_owner(owner, limit))
            .await?;
        Ok(photos.len())
    }

    /// Photos for one owner, newest first.
    pub async fn list_for_owner(&self, owner_member_id: &str) -> PhotoResult<Vec<Photo>> {
        let table = &self.table;
        let limit = self.config.owner_list_limit;
        let photos = self
            .config
            .policy
            .run("list_photos", move || {
                table.list_for_owner(owner_member_id, limit)
            })
            .await?;
        Ok(photos)
    }

    /// Photos for several owners with one request.
    ///
    /// Every requested owner has an entry, empty when they have no photos.
    pub async fn list_for_owners(
        &self,
        owner_member_ids: &[String],
    ) -> PhotoResult<HashMap<String, Vec<Photo>>> {
        let mut grouped: HashMap<String, Vec<Photo>> = owner_member_ids
            .iter()
            .map(|owner| (owner.clone(), Vec::new()))
            .collect();
        if grouped.is_empty() {
            return Ok(grouped);
        }

        let owners: Vec<String> = grouped.keys().cloned().collect();
        let owners_ref = owners.as_slice();
        let table = &self.table;
        let limit = self.config.bulk_list_limit;
        let photos = self
            .config
            .policy
            .run("list_photos_bulk", move || {
                table.list_for_owners(owners_ref, limit)
            })
            .await?;

        if photos.len() >= limit {
            debug!(limit, owners = owners.len(), "Bulk photo listing hit its row limit");
        }

        for photo in photos {
            if let Some(list) = grouped.get_mut(&photo.owner_member_id) {
                list.push(photo);
            }
        }
        for list in grouped.values_mut() {
            list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
        Ok(grouped)
    }

    /// Delete a photo row, then its object.
    ///
    /// Failing to remove the object is logged and does not fail the call.
    pub async fn delete(&self, photo_id: &str) -> PhotoResult<()> {
        let table = &self.table;
        let photo = self
            .config
            .policy
            .run("get_photo", move || table.get(photo_id))
            .await?
            .ok_or_else(|| PhotoError::NotFound(photo_id.to_string()))?;

        let key = key_from_url(&photo.image_url);
        if key.is_none() {
            warn!(photo_id, image_url = %photo.image_url, "Cannot derive storage key from photo URL");
        }

        self.config
            .policy
            .run("delete_photo", move || table.delete(photo_id))
            .await?;
        info!(photo_id, owner_member_id = %photo.owner_member_id, "Photo deleted");

        if let Some(key) = key {
            self.remove_object(&key).await;
        }
        Ok(())
    }

    /// Remove an object with a single attempt, logging any failure.
    async fn remove_object(&self, key: &str) {
        let store = &self.store;
        match RetryPolicy::once(self.config.policy.timeout)
            .run("remove_object", move || store.remove(key))
            .await
        {
            Ok(()) => debug!(key, "Object removed"),
            Err(e) => warn!(key, error = %e, "Object removal failed, object left orphaned"),
        }
    }
}
