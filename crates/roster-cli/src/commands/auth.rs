//! Authentication commands.

use super::Context;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use member_auth::{ReconcileTrigger, SessionState, SessionStore};
use std::io::{self, Write};

/// Prompt for email and a hidden password. `None` if either is blank.
fn prompt_credentials(format: &OutputFormat) -> Result<Option<(String, String)>> {
    print!("Email: ");
    io::stdout().flush()?;
    let mut email = String::new();
    io::stdin().read_line(&mut email)?;
    let email = email.trim().to_string();

    if email.is_empty() {
        output::print_error("Email is required", format);
        return Ok(None);
    }

    let password = rpassword::prompt_password("Password: ")?;
    if password.is_empty() {
        output::print_error("Password is required", format);
        return Ok(None);
    }

    Ok(Some((email, password)))
}

fn report_signed_in(store: &SessionStore, email: &str, format: &OutputFormat) {
    match store.state() {
        SessionState::Authenticated => {
            output::print_success(&format!("Logged in as {}", email), format)
        }
        SessionState::NeedsProvisioning => output::print_success(
            &format!(
                "Logged in as {}. Join your organization with 'roster provision --join-code <code>'",
                email
            ),
            format,
        ),
        state => output::print_success(
            &format!(
                "Logged in as {}, but the profile could not be loaded ({})",
                email, state
            ),
            format,
        ),
    }
}

/// Create an account with email and password.
pub async fn signup(ctx: &Context, format: &OutputFormat) -> Result<()> {
    let Some((email, password)) = prompt_credentials(format)? else {
        return Ok(());
    };

    println!("Creating account...");
    let store = ctx.session_store();
    match store.sign_up(&email, &password).await {
        Ok(_) => report_signed_in(&store, &email, format),
        Err(e) => output::print_error(&format!("Sign-up failed: {}", e), format),
    }
    Ok(())
}

/// Login with email and password.
pub async fn login(ctx: &Context, format: &OutputFormat) -> Result<()> {
    if let Some(session) = ctx.auth.cached_session().filter(|s| s.is_valid()) {
        let who = session
            .identity
            .email
            .unwrap_or_else(|| session.identity.id.clone());
        output::print_success(&format!("Already logged in as {}", who), format);
        return Ok(());
    }

    let Some((email, password)) = prompt_credentials(format)? else {
        return Ok(());
    };

    println!("Logging in...");
    let store = ctx.session_store();
    match store.sign_in(&email, &password).await {
        Ok(_) => report_signed_in(&store, &email, format),
        Err(e) => output::print_error(&format!("Login failed: {}", e), format),
    }
    Ok(())
}

/// Logout and clear session.
pub async fn logout(ctx: &Context, format: &OutputFormat) -> Result<()> {
    ctx.session_store().sign_out().await?;
    output::print_success("Logged out successfully", format);
    Ok(())
}

/// Check authentication and membership status.
pub async fn status(ctx: &Context, format: &OutputFormat) -> Result<()> {
    let store = ctx.session_store();
    store.reconcile(ReconcileTrigger::UserInitiated).await;
    let snapshot = store.snapshot();

    match format {
        OutputFormat::Text => {
            output::print_heading("Session");
            output::print_row("State", &snapshot.state.to_string());
            if let Some(identity) = &snapshot.identity {
                output::print_row("User ID", &identity.id);
                if let Some(email) = &identity.email {
                    output::print_row("Email", email);
                }
            }
            if let Some(profile) = &snapshot.profile {
                output::print_row("Name", &profile.name);
                output::print_row("Organization", &profile.organization.name);
                output::print_row("Role", &profile.role.to_string());
            }
            if let Some(reason) = &snapshot.degraded {
                output::print_row("Degraded", &format!("{:?}", reason));
            }
        }
        OutputFormat::Json => {
            output::print_json(&serde_json::json!({
                "state": snapshot.state,
                "logged_in": snapshot.state.has_identity(),
                "user_id": snapshot.identity.as_ref().map(|i| i.id.clone()),
                "email": snapshot.identity.as_ref().and_then(|i| i.email.clone()),
                "profile": snapshot.profile,
                "degraded": snapshot.degraded,
            }));
        }
    }
    Ok(())
}
