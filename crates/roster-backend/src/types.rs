//! Shared data model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Parameters a federated-login redirect may carry in its fragment or query.
pub const REDIRECT_MARKERS: &[&str] = &[
    "access_token",
    "refresh_token",
    "expires_in",
    "expires_at",
    "token_type",
    "type",
    "provider_token",
    "provider_refresh_token",
    "error",
    "error_code",
    "error_description",
];

/// An authenticated identity as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: Option<&str>) -> Self {
        Self {
            id: id.into(),
            email: email.map(str::to_string),
            user_metadata: serde_json::Value::Null,
        }
    }

    /// A non-blank string value from `user_metadata`.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.user_metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Identity provider session. Owned by the provider; callers hold copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub identity: Identity,
}

impl Session {
    /// A session for `identity` that expires `expires_in` from now.
    pub fn issue(identity: Identity, access_token: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: Utc::now() + expires_in,
            identity,
        }
    }

    /// A session is never valid at or past its expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

/// Emitted by the identity provider whenever credentials change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialEvent {
    SignedIn { user_id: String },
    SignedOut,
    TokenRefreshed { user_id: String },
    UserUpdated { user_id: String },
}

/// Member role within an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(MemberRole::Admin),
            "member" => Ok(MemberRole::Member),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// Organization row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub join_code: String,
}

impl Organization {
    pub fn summary(&self) -> OrganizationSummary {
        OrganizationSummary {
            name: self.name.clone(),
            join_code: self.join_code.clone(),
        }
    }
}

/// Organization fields embedded in a member profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationSummary {
    pub name: String,
    pub join_code: String,
}

/// Member row joined with its organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberProfile {
    /// Same as the identity id.
    pub id: String,
    pub name: String,
    pub email: String,
    pub organization_id: String,
    pub role: MemberRole,
    pub organization: OrganizationSummary,
}

/// Insert payload for the `members` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMember {
    pub id: String,
    pub name: String,
    pub email: String,
    pub organization_id: String,
    pub role: MemberRole,
}

/// Photo metadata row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    pub owner_member_id: String,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for the `photos` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPhoto {
    pub owner_member_id: String,
    pub image_url: String,
}

/// Credentials or error carried back by a federated-login redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectParams {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub expires_at: Option<i64>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
}

impl RedirectParams {
    /// Extract redirect parameters from the fragment and query of `url`.
    ///
    /// Returns `None` when neither an access token nor an error marker is
    /// present. Fragment values take precedence over query values.
    pub fn from_url(url: &Url) -> Option<Self> {
        let mut params = RedirectParams::default();

        let query = url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned()));
        let fragment = url
            .fragment()
            .map(|f| {
                url::form_urlencoded::parse(f.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        for (key, value) in query.chain(fragment) {
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "access_token" => params.access_token = Some(value),
                "refresh_token" => params.refresh_token = Some(value),
                "expires_in" => params.expires_in = value.parse().ok(),
                "expires_at" => params.expires_at = value.parse().ok(),
                "error" => params.error = Some(value),
                "error_code" => params.error_code = Some(value),
                "error_description" => params.error_description = Some(value),
                _ => {}
            }
        }

        if params.access_token.is_some() || params.is_error() {
            Some(params)
        } else {
            None
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some() || self.error_description.is_some()
    }

    /// Human-readable error carried by the redirect, if any.
    pub fn error_message(&self) -> Option<String> {
        self.error_description
            .clone()
            .or_else(|| self.error.clone())
            .map(|m| m.replace('+', " "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_never_valid_at_expiry() {
        let session = Session::issue(Identity::new("u1", None), "token", Duration::minutes(5));
        assert!(session.is_valid_at(session.expires_at - Duration::seconds(1)));
        assert!(!session.is_valid_at(session.expires_at));
        assert!(!session.is_valid_at(session.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn test_identity_metadata_str_skips_blank() {
        let mut identity = Identity::new("u1", Some("a@acme.com"));
        identity.user_metadata = serde_json::json!({ "full_name": "  ", "name": "Ada" });
        assert_eq!(identity.metadata_str("full_name"), None);
        assert_eq!(identity.metadata_str("name"), Some("Ada"));
        assert_eq!(identity.metadata_str("missing"), None);
    }

    #[test]
    fn test_member_role_parse_and_serialize() {
        assert_eq!("Member".parse::<MemberRole>().unwrap(), MemberRole::Member);
        assert_eq!("admin".parse::<MemberRole>().unwrap(), MemberRole::Admin);
        assert!("owner".parse::<MemberRole>().is_err());
        assert_eq!(serde_json::to_string(&MemberRole::Admin).unwrap(), "\"admin\"");
    }

    #[test]
    fn test_member_profile_deserializes_embedded_organization() {
        let json = r#"{
            "id": "u1",
            "name": "Ada",
            "email": "a@acme.com",
            "organization_id": "org1",
            "role": "member",
            "organization": { "name": "Acme", "join_code": "ACME-2024" }
        }"#;
        let profile: MemberProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.organization.name, "Acme");
        assert_eq!(profile.role, MemberRole::Member);
    }

    #[test]
    fn test_redirect_params_from_fragment() {
        let url = Url::parse(
            "https://app.test/auth/callback#access_token=abc&refresh_token=def&expires_in=3600&token_type=bearer",
        )
        .unwrap();
        let params = RedirectParams::from_url(&url).unwrap();
        assert_eq!(params.access_token.as_deref(), Some("abc"));
        assert_eq!(params.refresh_token.as_deref(), Some("def"));
        assert_eq!(params.expires_in, Some(3600));
        assert!(!params.is_error());
    }

    #[test]
    fn test_redirect_params_error_in_query() {
        let url = Url::parse(
            "https://app.test/auth/callback?error=access_denied&error_description=User+cancelled",
        )
        .unwrap();
        let params = RedirectParams::from_url(&url).unwrap();
        assert!(params.is_error());
        assert_eq!(params.error_message().as_deref(), Some("User cancelled"));
    }

    #[test]
    fn test_redirect_params_absent_without_markers() {
        let url = Url::parse("https://app.test/dashboard?tab=photos#top").unwrap();
        assert!(RedirectParams::from_url(&url).is_none());
    }
}
