//! Core configuration and utilities for Roster.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_LOG_LEVEL, DEFAULT_PHOTO_BUCKET, DEFAULT_REDIRECT_URL, DEFAULT_SUPABASE_URL,
    DEFAULT_SUPABASE_PUBLISHABLE_KEY,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_with, parse_level, LogConfig};
pub use paths::Paths;
