//! Deployment configuration file models.
//!
//! Operators can keep stable deployment settings in a `provision.toml`
//! next to the application source instead of passing everything as flags:
//!
//! ```toml
//! target-name = "refresh"
//! region = "eastus2"
//!
//! [openai]
//! endpoint = "https://example.openai.azure.com"
//! deployment = "gpt-4o-mini"
//!
//! [storage]
//! connection-string = "DefaultEndpointsProtocol=..."
//! ```
//!
//! Every field is optional here; required-parameter enforcement happens in
//! one place, `DeploymentParameters::missing_required`, after file, env,
//! and flag values have been merged.

use serde::Deserialize;

/// Root of `provision.toml`. All fields optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigFile {
    /// Target name all resource names are derived from.
    pub target_name: Option<String>,

    /// Cloud region for created resources.
    pub region: Option<String>,

    /// Optional tenant id override.
    pub tenant_id: Option<String>,

    #[serde(default)]
    pub openai: OpenAiSection,

    #[serde(default)]
    pub storage: StorageSection,
}

/// `[openai]` section: service endpoint and credential material.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OpenAiSection {
    pub endpoint: Option<String>,
    pub key: Option<String>,
    pub deployment: Option<String>,
}

/// `[storage]` section: optional blob storage connection descriptor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageSection {
    pub connection_string: Option<String>,
}
