//! Member provisioning from a join code.

use crate::ProvisionError;
use retry_policy::RetryPolicy;
use roster_backend::{BackendError, Identity, MemberDirectory, MemberProfile, MemberRole, NewMember};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const FALLBACK_NAME: &str = "Member";

/// Result of a successful [`ProfileProvisioner::provision`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// A new member row was inserted.
    Created(MemberProfile),
    /// The identity already had a member row; nothing was written.
    AlreadyProvisioned(MemberProfile),
}

impl ProvisionOutcome {
    pub fn profile(&self) -> &MemberProfile {
        match self {
            ProvisionOutcome::Created(profile) | ProvisionOutcome::AlreadyProvisioned(profile) => {
                profile
            }
        }
    }

    pub fn into_profile(self) -> MemberProfile {
        match self {
            ProvisionOutcome::Created(profile) | ProvisionOutcome::AlreadyProvisioned(profile) => {
                profile
            }
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, ProvisionOutcome::Created(_))
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Deadline for the organization and existing-profile lookups.
    pub lookup_timeout: Duration,
    pub insert_policy: RetryPolicy,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(10),
            insert_policy: RetryPolicy::fixed(3, Duration::from_secs(10), Duration::from_secs(1)),
        }
    }
}

/// Creates the member row binding an identity to an organization.
pub struct ProfileProvisioner {
    directory: Arc<dyn MemberDirectory>,
    config: ProvisionerConfig,
}

impl ProfileProvisioner {
    pub fn new(directory: Arc<dyn MemberDirectory>) -> Self {
        Self::with_config(directory, ProvisionerConfig::default())
    }

    pub fn with_config(directory: Arc<dyn MemberDirectory>, config: ProvisionerConfig) -> Self {
        Self { directory, config }
    }

    /// Provision `identity` into the organization behind `join_code`.
    pub async fn provision(
        &self,
        identity: &Identity,
        join_code: &str,
        role: MemberRole,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        self.provision_named(identity, join_code, role, None).await
    }

    /// Like [`provision`](Self::provision) with an explicit display name.
    ///
    /// Calling this again for an identity that already has a row is a no-op
    /// success; at most one row is ever created.
    pub async fn provision_named(
        &self,
        identity: &Identity,
        join_code: &str,
        role: MemberRole,
        name: Option<&str>,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let join_code = join_code.trim();
        if join_code.is_empty() {
            return Err(ProvisionError::InvalidInput(
                "join code must not be empty".to_string(),
            ));
        }
        let email = identity
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ProvisionError::InvalidInput("identity has no email".to_string()))?;

        let directory = &self.directory;
        let lookup = RetryPolicy::once(self.config.lookup_timeout);

        let organization = lookup
            .run("find_organization", || {
                directory.find_organization_by_join_code(join_code)
            })
            .await?
            .ok_or(ProvisionError::InvalidJoinCode)?;

        let member_id = identity.id.as_str();
        if let Some(existing) = lookup
            .run("find_member_profile", || directory.find_profile(member_id))
            .await?
        {
            debug!(member_id, "Member already provisioned");
            return Ok(ProvisionOutcome::AlreadyProvisioned(existing));
        }

        let member = NewMember {
            id: identity.id.clone(),
            name: display_name(identity, name),
            email: email.to_string(),
            organization_id: organization.id.clone(),
            role,
        };

        let member_ref = &member;
        let outcome = self
            .config
            .insert_policy
            .run_classified(
                "insert_member",
                move || async move {
                    match directory.insert_member(member_ref).await {
                        Ok(profile) => Ok(ProvisionOutcome::Created(profile)),
                        Err(e) if e.is_conflict() => {
                            // Another request won the race; its row is as good as ours.
                            match directory.find_profile(&member_ref.id).await {
                                Ok(Some(profile)) => Ok(ProvisionOutcome::AlreadyProvisioned(profile)),
                                _ => Err(e),
                            }
                        }
                        Err(e) => Err(e),
                    }
                },
                |e: &BackendError| e.is_transient() || e.is_conflict(),
            )
            .await
            .map_err(|e| {
                warn!(member_id, error = %e, "Member insert failed");
                ProvisionError::from(e)
            })?;

        info!(
            member_id,
            organization_id = %organization.id,
            role = %role,
            created = outcome.was_created(),
            "Member provisioned"
        );
        Ok(outcome)
    }
}

/// Display name for a new member.
///
/// Explicit non-blank input, else `full_name` or `name` from the identity
/// metadata, else the email local part, else `"Member"`.
pub fn display_name(identity: &Identity, explicit: Option<&str>) -> String {
    explicit
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .or_else(|| identity.metadata_str("full_name"))
        .or_else(|| identity.metadata_str("name"))
        .or_else(|| {
            identity
                .email
                .as_deref()
                .and_then(|e| e.split('@').next())
                .map(str::trim)
                .filter(|local| !local.is_empty())
        })
        .unwrap_or(FALLBACK_NAME)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(email: Option<&str>, metadata: serde_json::Value) -> Identity {
        let mut identity = Identity::new("u1", email);
        identity.user_metadata = metadata;
        identity
    }

    #[test]
    fn test_display_name_prefers_explicit() {
        let id = identity(Some("a@acme.com"), serde_json::json!({ "full_name": "Ada L" }));
        assert_eq!(display_name(&id, Some("  Countess ")), "Countess");
        assert_eq!(display_name(&id, Some("   ")), "Ada L");
    }

    #[test]
    fn test_display_name_metadata_order() {
        let id = identity(
            Some("a@acme.com"),
            serde_json::json!({ "full_name": "", "name": "Ada" }),
        );
        assert_eq!(display_name(&id, None), "Ada");
    }

    #[test]
    fn test_display_name_falls_back_to_email_then_constant() {
        assert_eq!(
            display_name(&identity(Some("ada@acme.com"), serde_json::Value::Null), None),
            "ada"
        );
        assert_eq!(
            display_name(&identity(Some("@acme.com"), serde_json::Value::Null), None),
            "Member"
        );
        assert_eq!(
            display_name(&identity(None, serde_json::Value::Null), None),
            "Member"
        );
    }
}
