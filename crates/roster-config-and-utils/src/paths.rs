//! File system paths for Roster.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

const BASE_DIR_NAME: &str = ".roster";
const LOG_FILE_NAME: &str = "roster.jsonl";

/// Manages file system paths under `~/.roster`.
#[derive(Debug, Clone)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.roster`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir().ok_or(CoreError::NoHomeDirectory)?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.roster).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.roster/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the persisted session path (~/.roster/session.json).
    pub fn session_file(&self) -> PathBuf {
        self.base_dir.join("session.json")
    }

    /// Get the logs directory (~/.roster/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the JSONL log file path (~/.roster/logs/roster.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE_NAME)
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        for dir in [self.base_dir.clone(), self.logs_dir()] {
            std::fs::create_dir_all(&dir)
                .map_err(|source| CoreError::Write { path: dir, source })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_with_base_dir() {
        let base = PathBuf::from("/tmp/test-roster");
        let paths = Paths::with_base_dir(base.clone());

        assert_eq!(paths.base_dir(), &base);
        assert_eq!(paths.config_file(), base.join("config.json"));
        assert_eq!(paths.session_file(), base.join("session.json"));
        assert_eq!(paths.logs_dir(), base.join("logs"));
        assert_eq!(paths.log_file(), base.join("logs/roster.jsonl"));
    }

    #[test]
    fn test_paths_default() {
        let paths = Paths::new().unwrap();
        let home = dirs::home_dir().unwrap();

        assert_eq!(paths.base_dir(), &home.join(".roster"));
    }

    #[test]
    fn test_ensure_dirs_creates_directories() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("roster");
        let paths = Paths::with_base_dir(base.clone());

        paths.ensure_dirs().unwrap();

        assert!(base.is_dir());
        assert!(paths.logs_dir().is_dir());
    }

    #[test]
    fn test_ensure_dirs_names_the_blocked_path() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("roster");
        std::fs::write(&base, "not a directory").unwrap();
        let paths = Paths::with_base_dir(base.clone());

        match paths.ensure_dirs() {
            Err(CoreError::Write { path, .. }) => assert_eq!(path, base),
            other => panic!("expected a write error, got {other:?}"),
        }
    }

    #[test]
    fn test_ensure_dirs_is_idempotent() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().join("roster"));

        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();
    }
}
