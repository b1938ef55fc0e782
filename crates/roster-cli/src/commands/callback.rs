//! Federated login completion.
//!
//! The redirect URL is pasted on the command line; the terminal plays the
//! part of the page that received it.

use super::Context;
use crate::output::{self, OutputFormat};
use anyhow::{Context as _, Result};
use member_auth::{CallbackHost, CallbackState, OAuthCallbackResolver, ResolverConfig, Route};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Callback host that reports to the terminal.
struct TerminalHost {
    url: Mutex<Url>,
    route: Mutex<Option<Route>>,
    format: OutputFormat,
}

impl CallbackHost for TerminalHost {
    fn current_url(&self) -> Url {
        self.url.lock().clone()
    }

    fn replace_url(&self, url: &Url) {
        *self.url.lock() = url.clone();
    }

    fn show_error(&self, message: &str) {
        output::print_error(message, &self.format);
    }

    fn navigate(&self, route: Route) {
        *self.route.lock() = Some(route);
    }
}

fn next_step(route: Option<Route>) -> &'static str {
    match route {
        Some(Route::Dashboard) => "Logged in",
        Some(Route::Provisioning) => {
            "Logged in. Join your organization with 'roster provision --join-code <code>'"
        }
        Some(Route::SignIn) | None => "Run 'roster login' to try again",
    }
}

/// Exchange the credentials carried by a redirect URL.
///
/// `raw_url` may be a full URL or just the `#...` / `?...` part, which is
/// resolved against the configured redirect target.
pub async fn callback(ctx: &Context, raw_url: &str, format: &OutputFormat) -> Result<()> {
    let url = ctx
        .config
        .resolve_redirect(raw_url)
        .context("Invalid redirect URL")?;
    let host = Arc::new(TerminalHost {
        url: Mutex::new(url),
        route: Mutex::new(None),
        format: *format,
    });

    let resolver = OAuthCallbackResolver::with_config(
        ctx.auth.clone(),
        ctx.client.clone(),
        host.clone(),
        ResolverConfig {
            // Nothing to keep on screen between steps.
            error_redirect_delay: Duration::ZERO,
            ..ResolverConfig::default()
        },
    );

    let state = resolver.resolve().await;
    let route = *host.route.lock();
    match state {
        CallbackState::Idle => {
            output::print_error("URL carries no login credentials or error", format)
        }
        CallbackState::Resolved => output::print_success(next_step(route), format),
        _ => {
            if let OutputFormat::Text = format {
                println!("{}", next_step(route));
            }
        }
    }
    Ok(())
}
