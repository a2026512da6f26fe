//! Error types for configuration loading.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading deployment configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read a configuration file from disk.
    #[error("Failed to read config file at {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse TOML configuration.
    #[error("Failed to parse TOML file at {path}: {source}")]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Type alias for Result with ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;
