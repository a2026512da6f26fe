//! Loading and merging of deployment parameters.
//!
//! Parameter precedence, lowest to highest: `provision.toml`, process
//! environment (the same variable names the deployed application reads),
//! explicit overrides (CLI flags). The merged result is a
//! [`DeploymentParameters`] that still may be incomplete; callers run
//! `missing_required()` before triggering a run.

use crate::config::error::{ConfigError, ConfigResult};
use crate::config::models::ConfigFile;
use pv_protocol::DeploymentParameters;
use std::path::Path;

/// Environment variable names recognized during merging.
///
/// These mirror the settings surface of the deployed application, so an
/// operator who already exported them for local testing needs no flags.
const ENV_REGION: &str = "AZURE_REGION";
const ENV_OPENAI_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
const ENV_OPENAI_KEY: &str = "AZURE_OPENAI_KEY";
const ENV_OPENAI_DEPLOYMENT: &str = "AZURE_OPENAI_DEPLOYMENT";
const ENV_STORAGE_CONNECTION: &str = "AZURE_STORAGE_CONNECTION_STRING";
const ENV_TENANT_ID: &str = "ENTRA_TENANT_ID";

/// Explicit overrides, typically from CLI flags. All optional.
#[derive(Debug, Clone, Default)]
pub struct ParameterOverrides {
    pub target_name: Option<String>,
    pub region: Option<String>,
    pub openai_endpoint: Option<String>,
    pub openai_key: Option<String>,
    pub openai_deployment: Option<String>,
    pub storage_connection: Option<String>,
    pub tenant_id: Option<String>,
}

/// Load `provision.toml` from `path`.
///
/// A missing file is not an error; it yields an empty [`ConfigFile`] so
/// that env and flag values alone can drive a deployment.
pub fn load_config(path: &Path) -> ConfigResult<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }

    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&raw).map_err(|source| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merge file, environment, and overrides into deployment parameters.
///
/// `env` is injected as a lookup so tests can run without touching the
/// process environment.
pub fn resolve_parameters(
    file: &ConfigFile,
    overrides: &ParameterOverrides,
    env: impl Fn(&str) -> Option<String>,
) -> DeploymentParameters {
    let pick = |flag: &Option<String>, var: &str, file_value: &Option<String>| {
        flag.clone()
            .or_else(|| env(var))
            .or_else(|| file_value.clone())
    };

    DeploymentParameters {
        target_name: overrides
            .target_name
            .clone()
            .or_else(|| file.target_name.clone())
            .unwrap_or_default(),
        region: pick(&overrides.region, ENV_REGION, &file.region).unwrap_or_default(),
        openai_endpoint: pick(
            &overrides.openai_endpoint,
            ENV_OPENAI_ENDPOINT,
            &file.openai.endpoint,
        )
        .unwrap_or_default(),
        openai_key: pick(&overrides.openai_key, ENV_OPENAI_KEY, &file.openai.key)
            .unwrap_or_default(),
        openai_deployment: pick(
            &overrides.openai_deployment,
            ENV_OPENAI_DEPLOYMENT,
            &file.openai.deployment,
        )
        .unwrap_or_else(|| "gpt-4o-mini".to_string()),
        storage_connection: pick(
            &overrides.storage_connection,
            ENV_STORAGE_CONNECTION,
            &file.storage.connection_string,
        ),
        tenant_id: pick(&overrides.tenant_id, ENV_TENANT_ID, &file.tenant_id),
    }
}

/// Convenience wrapper over [`resolve_parameters`] using the real process
/// environment.
pub fn resolve_parameters_from_env(
    file: &ConfigFile,
    overrides: &ParameterOverrides,
) -> DeploymentParameters {
    resolve_parameters(file, overrides, |var| std::env::var(var).ok())
}
