//! Descriptors for the external resources the pipeline needs.

use std::collections::BTreeMap;

/// Desired state of one external resource, with a stable name derived
/// from the run's target name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceDescriptor {
    /// Identity-provider application registration.
    ///
    /// `preauthorized_clients` and `scopes` are settable sub-entry sets:
    /// each reconciliation pass submits the full desired set
    /// (replace-on-write), never an incremental diff.
    AppRegistration {
        display_name: String,
        scopes: Vec<String>,
        preauthorized_clients: Vec<String>,
    },

    /// Container for all other resources of one target.
    ResourceGroup { name: String, region: String },

    /// Storage account backing the function app.
    StorageAccount {
        name: String,
        resource_group: String,
        region: String,
    },

    /// The serverless compute resource the application code deploys to.
    ///
    /// `app_settings` is a settable sub-entry set, submitted whole on
    /// every pass like the app registration's allow-list.
    FunctionApp {
        name: String,
        resource_group: String,
        region: String,
        storage_account: String,
        app_settings: Vec<(String, String)>,
    },
}

impl ResourceDescriptor {
    /// The resource's externally visible name.
    pub fn name(&self) -> &str {
        match self {
            Self::AppRegistration { display_name, .. } => display_name,
            Self::ResourceGroup { name, .. } => name,
            Self::StorageAccount { name, .. } => name,
            Self::FunctionApp { name, .. } => name,
        }
    }

    /// Short human-readable kind for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AppRegistration { .. } => "app registration",
            Self::ResourceGroup { .. } => "resource group",
            Self::StorageAccount { .. } => "storage account",
            Self::FunctionApp { .. } => "function app",
        }
    }

    /// Artifacts a reconciled resource contributes to the run.
    pub fn artifacts_for(&self, handle: &ResourceHandle) -> Vec<(String, String)> {
        match self {
            Self::AppRegistration { .. } => {
                let mut out = Vec::new();
                if let Some(client_id) = handle.properties.get("client_id") {
                    out.push(("client_id".to_string(), client_id.clone()));
                }
                if let Some(tenant_id) = handle.properties.get("tenant_id") {
                    out.push(("tenant_id".to_string(), tenant_id.clone()));
                }
                out
            }
            Self::ResourceGroup { name, .. } => {
                vec![("resource_group".to_string(), name.clone())]
            }
            Self::StorageAccount { name, .. } => {
                vec![("storage_account".to_string(), name.clone())]
            }
            Self::FunctionApp { name, .. } => vec![
                ("function_app".to_string(), name.clone()),
                (
                    "endpoint_url".to_string(),
                    handle
                        .properties
                        .get("default_host_name")
                        .map(|host| format!("https://{host}"))
                        .unwrap_or_else(|| format!("https://{name}.azurewebsites.net")),
                ),
            ],
        }
    }
}

/// Opaque reference to an existing resource plus selected properties
/// (client id, tenant id, host name, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceHandle {
    /// Provider-assigned identifier.
    pub id: String,

    /// Selected properties extracted from the provider's response.
    pub properties: BTreeMap<String, String>,
}

impl ResourceHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
