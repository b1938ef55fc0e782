//! Errors raised while loading settings and preparing local files.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Error type for configuration, path and logging setup.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A setting holds a value no backend call can use.
    #[error("invalid setting `{field}`: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("invalid URL in `{field}`: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("malformed config file {}: {source}", .path.display())]
    MalformedConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("home directory not found")]
    NoHomeDirectory,
}

pub type CoreResult<T> = Result<T, CoreError>;
