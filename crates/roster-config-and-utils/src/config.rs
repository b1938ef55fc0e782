//! Configuration management.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use url::Url;

/// Default Supabase URL (can be overridden at compile time via SUPABASE_URL env var).
pub const DEFAULT_SUPABASE_URL: &str = match option_env!("SUPABASE_URL") {
    Some(url) => url,
    None => "https://roster-dev.supabase.co",
};

/// Default Supabase publishable key (can be overridden at compile time via SUPABASE_PUBLISHABLE_KEY env var).
pub const DEFAULT_SUPABASE_PUBLISHABLE_KEY: &str = match option_env!("SUPABASE_PUBLISHABLE_KEY") {
    Some(key) => key,
    None => "roster-dev-publishable-key",
};

/// Storage bucket holding member photos.
pub const DEFAULT_PHOTO_BUCKET: &str = "photos";

/// Where federated login sends the browser back to.
pub const DEFAULT_REDIRECT_URL: &str = "http://localhost:3000/auth/callback";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Roster configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Supabase project URL.
    #[serde(default = "default_supabase_url")]
    pub supabase_url: String,
    /// Supabase publishable API key (public, safe to expose).
    #[serde(default = "default_supabase_publishable_key")]
    pub supabase_publishable_key: String,
    /// Storage bucket for photo objects.
    #[serde(default = "default_photo_bucket")]
    pub photo_bucket: String,
    /// Federated-login redirect target.
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_supabase_url() -> String {
    DEFAULT_SUPABASE_URL.to_string()
}

fn default_supabase_publishable_key() -> String {
    DEFAULT_SUPABASE_PUBLISHABLE_KEY.to_string()
}

fn default_photo_bucket() -> String {
    DEFAULT_PHOTO_BUCKET.to_string()
}

fn default_redirect_url() -> String {
    DEFAULT_REDIRECT_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            supabase_url: default_supabase_url(),
            supabase_publishable_key: default_supabase_publishable_key(),
            photo_bucket: default_photo_bucket(),
            redirect_url: default_redirect_url(),
        }
    }
}

impl Config {
    /// Load configuration from `paths.config_file()` if present, then apply
    /// environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| CoreError::MalformedConfig {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let path = paths.config_file();
        let written = serde_json::to_string_pretty(self)
            .map_err(io::Error::from)
            .and_then(|content| std::fs::write(&path, content));
        written.map_err(|source| CoreError::Write { path, source })
    }

    /// Apply `ROSTER_*` overrides. Blank values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let value = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(level) = value("ROSTER_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = value("ROSTER_SUPABASE_URL") {
            self.supabase_url = url;
        }
        if let Some(key) = value("ROSTER_SUPABASE_PUBLISHABLE_KEY") {
            self.supabase_publishable_key = key;
        }
        if let Some(bucket) = value("ROSTER_PHOTO_BUCKET") {
            self.photo_bucket = bucket;
        }
        if let Some(redirect) = value("ROSTER_REDIRECT_URL") {
            self.redirect_url = redirect;
        }
    }

    /// Get the Supabase URL as a parsed URL.
    pub fn supabase_url(&self) -> CoreResult<Url> {
        Url::parse(&self.supabase_url).map_err(|source| CoreError::InvalidUrl {
            field: "supabase_url",
            source,
        })
    }

    /// Get the redirect URL as a parsed URL.
    pub fn redirect_url(&self) -> CoreResult<Url> {
        Url::parse(&self.redirect_url).map_err(|source| CoreError::InvalidUrl {
            field: "redirect_url",
            source,
        })
    }

    /// Resolve a pasted redirect against `redirect_url`.
    ///
    /// Absolute URLs are returned as-is; a bare `#fragment` or `?query` is
    /// attached to the configured redirect target.
    pub fn resolve_redirect(&self, raw: &str) -> CoreResult<Url> {
        self.redirect_url()?
            .join(raw.trim())
            .map_err(|source| CoreError::InvalidUrl {
                field: "redirect_url",
                source,
            })
    }

    /// Reject configurations that cannot reach a backend.
    pub fn validate(&self) -> CoreResult<()> {
        self.supabase_url()?;
        self.redirect_url()?;
        if self.supabase_publishable_key.trim().is_empty() {
            return Err(CoreError::InvalidSetting {
                field: "supabase_publishable_key",
                reason: "must not be empty".to_string(),
            });
        }
        if self.photo_bucket.trim().is_empty() {
            return Err(CoreError::InvalidSetting {
                field: "photo_bucket",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.supabase_url, DEFAULT_SUPABASE_URL);
        assert_eq!(config.photo_bucket, "photos");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_load_from_file_fills_missing_fields() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, r#"{ "log_level": "debug" }"#).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.photo_bucket, DEFAULT_PHOTO_BUCKET);
        assert_eq!(config.redirect_url, DEFAULT_REDIRECT_URL);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config {
            photo_bucket: "member-photos".to_string(),
            ..Config::default()
        };
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.redirect_url, DEFAULT_REDIRECT_URL);
    }

    #[test]
    fn test_config_load_rejects_malformed_file() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        std::fs::write(paths.config_file(), "{ not json").unwrap();

        assert!(matches!(Config::load(&paths), Err(CoreError::MalformedConfig { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(env(&[
            ("ROSTER_LOG_LEVEL", "trace"),
            ("ROSTER_SUPABASE_URL", "https://acme.supabase.co"),
            ("ROSTER_PHOTO_BUCKET", "  "),
            ("ROSTER_REDIRECT_URL", "https://app.test/auth/callback"),
        ]));
        assert_eq!(config.redirect_url, "https://app.test/auth/callback");

        assert_eq!(config.log_level, "trace");
        assert_eq!(config.supabase_url, "https://acme.supabase.co");
        assert_eq!(config.photo_bucket, DEFAULT_PHOTO_BUCKET);
    }

    #[test]
    fn test_resolve_redirect_against_configured_target() {
        let config = Config {
            redirect_url: "https://app.test/auth/callback".to_string(),
            ..Config::default()
        };

        assert_eq!(
            config
                .resolve_redirect("#access_token=at&refresh_token=rt")
                .unwrap()
                .as_str(),
            "https://app.test/auth/callback#access_token=at&refresh_token=rt"
        );
        assert_eq!(
            config.resolve_redirect("?error=access_denied").unwrap().as_str(),
            "https://app.test/auth/callback?error=access_denied"
        );
        assert_eq!(
            config
                .resolve_redirect("https://other.test/cb#access_token=at")
                .unwrap()
                .as_str(),
            "https://other.test/cb#access_token=at"
        );
    }

    #[test]
    fn test_validate_rejects_bad_redirect_url() {
        let config = Config {
            redirect_url: "callback".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
        assert!(config.resolve_redirect("#access_token=at").is_err());
    }

    #[test]
    fn test_config_invalid_url() {
        let config = Config {
            supabase_url: "not a valid url".to_string(),
            ..Config::default()
        };
        assert!(config.supabase_url().is_err());
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidUrl {
                field: "supabase_url",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_bucket() {
        let config = Config {
            photo_bucket: String::new(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::InvalidSetting {
                field: "photo_bucket",
                ..
            })));
    }
}
