//! PostgREST tables and Storage bucket.

use super::http::error_from_response;
use super::AccessTokenSource;
use crate::types::{MemberProfile, NewMember, NewPhoto, Organization, Photo};
use crate::{BackendError, BackendResult, MemberDirectory, ObjectStore, PhotoTable};
use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Deserialize;
use std::sync::Arc;

const MEMBER_SELECT: &str =
    "id,name,email,organization_id,role,organization:organizations(name,join_code)";
const ORGANIZATION_SELECT: &str = "id,name,join_code";
const PHOTO_SELECT: &str = "id,owner_member_id,image_url,created_at";

#[derive(Debug, Deserialize)]
struct StoredObject {
    #[serde(rename = "Key")]
    key: String,
}

/// Supabase REST client for member, organization and photo data.
#[derive(Clone)]
pub struct SupabaseClient {
    http_client: reqwest::Client,
    api_url: String,
    anon_key: String,
    bucket: String,
    tokens: Option<Arc<dyn AccessTokenSource>>,
}

impl SupabaseClient {
    /// Create a new Supabase client.
    ///
    /// # Arguments
    /// * `api_url` - The Supabase project API URL (e.g., `https://xyz.supabase.co`)
    /// * `anon_key` - The Supabase anonymous API key
    /// * `bucket` - Storage bucket holding photo objects
    pub fn new(
        api_url: impl Into<String>,
        anon_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            bucket: bucket.into(),
            tokens: None,
        }
    }

    /// Authenticate data requests with the signed-in user's token.
    ///
    /// Without a token source (or while signed out) requests carry the
    /// anonymous key, and row-level security decides what is visible.
    pub fn with_token_source(mut self, tokens: Arc<dyn AccessTokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Build the REST API URL for a table.
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.api_url, table)
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.api_url, self.bucket, key)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .tokens
            .as_ref()
            .and_then(|t| t.access_token())
            .unwrap_or_else(|| self.anon_key.clone());
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    async fn select<T: for<'de> Deserialize<'de>>(
        &self,
        table: &str,
        query: &[(&str, String)],
        context: &str,
    ) -> BackendResult<Vec<T>> {
        let response = self
            .authorize(self.http_client.get(self.rest_url(table)))
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, context).await);
        }
        Ok(response.json().await?)
    }

    async fn insert_returning<B: serde::Serialize + ?Sized, T: for<'de> Deserialize<'de>>(
        &self,
        table: &str,
        select: &str,
        body: &B,
        context: &str,
    ) -> BackendResult<T> {
        let response = self
            .authorize(self.http_client.post(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .query(&[("select", select)])
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, context).await);
        }

        let mut rows: Vec<T> = response.json().await?;
        if rows.is_empty() {
            return Err(BackendError::Decode(format!(
                "{} returned no rows",
                context
            )));
        }
        Ok(rows.swap_remove(0))
    }
}

/// PostgREST `in` filter value with quoted ids.
fn in_filter(ids: &[String]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('"', "")))
        .collect();
    format!("in.({})", quoted.join(","))
}

#[async_trait]
impl MemberDirectory for SupabaseClient {
    async fn find_profile(&self, member_id: &str) -> BackendResult<Option<MemberProfile>> {
        tracing::debug!(member_id, "Fetching member profile");
        let rows: Vec<MemberProfile> = self
            .select(
                "members",
                &[
                    ("id", format!("eq.{}", member_id)),
                    ("select", MEMBER_SELECT.to_string()),
                    ("limit", "1".to_string()),
                ],
                "Member lookup",
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find_organization_by_join_code(
        &self,
        join_code: &str,
    ) -> BackendResult<Option<Organization>> {
        let rows: Vec<Organization> = self
            .select(
                "organizations",
                &[
                    ("join_code", format!("eq.{}", join_code)),
                    ("select", ORGANIZATION_SELECT.to_string()),
                    ("limit", "1".to_string()),
                ],
                "Organization lookup",
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_member(&self, member: &NewMember) -> BackendResult<MemberProfile> {
        tracing::debug!(member_id = %member.id, organization_id = %member.organization_id, "Inserting member");
        self.insert_returning("members", MEMBER_SELECT, member, "Member insert")
            .await
    }
}

#[async_trait]
impl PhotoTable for SupabaseClient {
    async fn list_for_owner(
        &self,
        owner_member_id: &str,
        limit: usize,
    ) -> BackendResult<Vec<Photo>> {
        self.select(
            "photos",
            &[
                ("owner_member_id", format!("eq.{}", owner_member_id)),
                ("select", PHOTO_SELECT.to_string()),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ],
            "Photo list",
        )
        .await
    }

    async fn list_for_owners(
        &self,
        owner_member_ids: &[String],
        limit: usize,
    ) -> BackendResult<Vec<Photo>> {
        self.select(
            "photos",
            &[
                ("owner_member_id", in_filter(owner_member_ids)),
                ("select", PHOTO_SELECT.to_string()),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ],
            "Bulk photo list",
        )
        .await
    }

    async fn get(&self, photo_id: &str) -> BackendResult<Option<Photo>> {
        let rows: Vec<Photo> = self
            .select(
                "photos",
                &[
                    ("id", format!("eq.{}", photo_id)),
                    ("select", PHOTO_SELECT.to_string()),
                    ("limit", "1".to_string()),
                ],
                "Photo lookup",
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert(&self, photo: &NewPhoto) -> BackendResult<Photo> {
        self.insert_returning("photos", PHOTO_SELECT, photo, "Photo insert")
            .await
    }

    async fn delete(&self, photo_id: &str) -> BackendResult<()> {
        let response = self
            .authorize(self.http_client.delete(self.rest_url("photos")))
            .header("Prefer", "return=minimal")
            .query(&[("id", format!("eq.{}", photo_id))])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "Photo delete").await);
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for SupabaseClient {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> BackendResult<String> {
        let size = bytes.len();
        let response = self
            .authorize(self.http_client.post(self.object_url(key)))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "Object upload").await);
        }

        let stored: StoredObject = response.json().await?;
        tracing::debug!(key, size, "Object stored");
        Ok(stored.key)
    }

    fn public_url(&self, key: &str) -> Option<String> {
        if key.is_empty() {
            return None;
        }
        Some(format!(
            "{}/storage/v1/object/public/{}/{}",
            self.api_url, self.bucket, key
        ))
    }

    async fn remove(&self, key: &str) -> BackendResult<()> {
        let response = self
            .authorize(
                self.http_client
                    .delete(format!("{}/storage/v1/object/{}", self.api_url, self.bucket)),
            )
            .json(&serde_json::json!({ "prefixes": [key] }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "Object removal").await);
        }
        Ok(())
    }
}
