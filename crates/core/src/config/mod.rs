//! Deployment configuration loading and parameter resolution.

pub mod error;
pub mod loader;
pub mod models;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, resolve_parameters, resolve_parameters_from_env, ParameterOverrides};
pub use models::ConfigFile;
