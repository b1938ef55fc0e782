//! Organization onboarding.

use super::Context;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use member_auth::ReconcileTrigger;
use roster_backend::MemberRole;

/// Join the organization behind `join_code`.
pub async fn provision(
    ctx: &Context,
    join_code: &str,
    role: MemberRole,
    name: Option<&str>,
    format: &OutputFormat,
) -> Result<()> {
    let store = ctx.session_store();
    store.reconcile(ReconcileTrigger::UserInitiated).await;
    let Some(identity) = store.identity() else {
        anyhow::bail!("Not logged in. Run 'roster login' first");
    };

    let outcome = match ctx
        .provisioner()
        .provision_named(&identity, join_code, role, name)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            output::print_error(&format!("Provisioning failed: {}", e), format);
            return Ok(());
        }
    };

    let created = outcome.was_created();
    let profile = outcome.into_profile();
    match format {
        OutputFormat::Text => {
            if created {
                println!("Joined {} as {}", profile.organization.name, profile.role);
            } else {
                println!("Already a member of {}", profile.organization.name);
            }
            output::print_row("Name", &profile.name);
            output::print_row("Member ID", &profile.id);
        }
        OutputFormat::Json => output::print_json(&serde_json::json!({
            "created": created,
            "profile": profile,
        })),
    }
    Ok(())
}
