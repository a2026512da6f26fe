//! `az` CLI adapter for [`CloudClient`].
//!
//! Each operation is a one-shot `az ... --output json` invocation whose
//! stdout is parsed with serde_json. The adapter never retries; a failed
//! invocation surfaces as a [`CloudError`] and fails the current stage.

use crate::reconcile::client::{CloudClient, CloudError};
use crate::reconcile::resource::{ResourceDescriptor, ResourceHandle};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

/// Cloud client backed by the `az` command-line tool.
pub struct AzCli {
    program: String,
}

impl Default for AzCli {
    fn default() -> Self {
        Self::new("az")
    }
}

impl AzCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run `az` with `args`, returning parsed JSON stdout.
    ///
    /// Empty stdout (some mutating commands print nothing) parses to
    /// `Value::Null`.
    async fn invoke(&self, args: &[String]) -> Result<Value, CloudError> {
        let command = format!("{} {}", self.program, args.join(" "));
        debug!(%command, "invoking provider CLI");

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| CloudError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CloudError::CommandFailed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(stdout.trim()).map_err(|source| CloudError::Parse { command, source })
    }

    /// Like [`invoke`](Self::invoke), but maps the provider's not-found
    /// failure to `Ok(None)`.
    async fn invoke_optional(&self, args: &[String]) -> Result<Option<Value>, CloudError> {
        match self.invoke(args).await {
            Ok(value) => Ok(Some(value)),
            Err(CloudError::CommandFailed { stderr, .. })
                if stderr.contains("ResourceNotFound")
                    || stderr.contains("ResourceGroupNotFound")
                    || stderr.contains("was not found") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Tenant of the logged-in account; the identity registration's
    /// tenant id artifact comes from here.
    async fn tenant_id(&self) -> Result<String, CloudError> {
        let value = self
            .invoke(&args(["account", "show", "--output", "json"]))
            .await?;
        str_field(&value, "tenantId")
            .ok_or(CloudError::MissingField {
                command: format!("{} account show", self.program),
                field: "tenantId",
            })
    }

    fn app_registration_handle(&self, value: &Value, tenant_id: String) -> Option<ResourceHandle> {
        let object_id = str_field(value, "id")?;
        let client_id = str_field(value, "appId")?;
        Some(
            ResourceHandle::new(object_id)
                .with_property("client_id", client_id)
                .with_property("tenant_id", tenant_id),
        )
    }
}

#[async_trait]
impl CloudClient for AzCli {
    async fn show(
        &self,
        resource: &ResourceDescriptor,
    ) -> Result<Option<ResourceHandle>, CloudError> {
        match resource {
            ResourceDescriptor::AppRegistration { display_name, .. } => {
                let value = self
                    .invoke(&args([
                        "ad", "app", "list",
                        "--display-name", display_name.as_str(),
                        "--query", "[0]",
                        "--output", "json",
                    ]))
                    .await?;
                if value.is_null() {
                    return Ok(None);
                }
                let tenant_id = self.tenant_id().await?;
                Ok(self.app_registration_handle(&value, tenant_id))
            }
            ResourceDescriptor::ResourceGroup { name, .. } => {
                let exists = self
                    .invoke(&args(["group", "exists", "--name", name.as_str()]))
                    .await?;
                if exists.as_bool() != Some(true) {
                    return Ok(None);
                }
                let value = self
                    .invoke(&args(["group", "show", "--name", name.as_str(), "--output", "json"]))
                    .await?;
                Ok(Some(handle_from(&value)))
            }
            ResourceDescriptor::StorageAccount {
                name,
                resource_group,
                ..
            } => {
                let value = self
                    .invoke_optional(&args([
                        "storage", "account", "show",
                        "--name", name.as_str(),
                        "--resource-group", resource_group.as_str(),
                        "--output", "json",
                    ]))
                    .await?;
                Ok(value.map(|v| handle_from(&v)))
            }
            ResourceDescriptor::FunctionApp {
                name,
                resource_group,
                ..
            } => {
                let value = self
                    .invoke_optional(&args([
                        "functionapp", "show",
                        "--name", name.as_str(),
                        "--resource-group", resource_group.as_str(),
                        "--output", "json",
                    ]))
                    .await?;
                Ok(value.map(|v| {
                    let mut handle = handle_from(&v);
                    if let Some(host) = str_field(&v, "defaultHostName") {
                        handle = handle.with_property("default_host_name", host);
                    }
                    handle
                }))
            }
        }
    }

    async fn create(&self, resource: &ResourceDescriptor) -> Result<ResourceHandle, CloudError> {
        match resource {
            ResourceDescriptor::AppRegistration { display_name, .. } => {
                let value = self
                    .invoke(&args([
                        "ad", "app", "create",
                        "--display-name", display_name.as_str(),
                        "--sign-in-audience", "AzureADMyOrg",
                        "--output", "json",
                    ]))
                    .await?;
                let tenant_id = self.tenant_id().await?;
                self.app_registration_handle(&value, tenant_id)
                    .ok_or(CloudError::MissingField {
                        command: format!("{} ad app create", self.program),
                        field: "appId",
                    })
            }
            ResourceDescriptor::ResourceGroup { name, region } => {
                let value = self
                    .invoke(&args([
                        "group", "create",
                        "--name", name.as_str(),
                        "--location", region.as_str(),
                        "--output", "json",
                    ]))
                    .await?;
                Ok(handle_from(&value))
            }
            ResourceDescriptor::StorageAccount {
                name,
                resource_group,
                region,
            } => {
                let value = self
                    .invoke(&args([
                        "storage", "account", "create",
                        "--name", name.as_str(),
                        "--resource-group", resource_group.as_str(),
                        "--location", region.as_str(),
                        "--sku", "Standard_LRS",
                        "--output", "json",
                    ]))
                    .await?;
                Ok(handle_from(&value))
            }
            ResourceDescriptor::FunctionApp {
                name,
                resource_group,
                region,
                storage_account,
                ..
            } => {
                let value = self
                    .invoke(&args([
                        "functionapp", "create",
                        "--name", name.as_str(),
                        "--resource-group", resource_group.as_str(),
                        "--consumption-plan-location", region.as_str(),
                        "--storage-account", storage_account.as_str(),
                        "--runtime", "python",
                        "--functions-version", "4",
                        "--os-type", "Linux",
                        "--output", "json",
                    ]))
                    .await?;
                let mut handle = handle_from(&value);
                if let Some(host) = str_field(&value, "defaultHostName") {
                    handle = handle.with_property("default_host_name", host);
                }
                Ok(handle)
            }
        }
    }

    async fn apply(
        &self,
        resource: &ResourceDescriptor,
        handle: &ResourceHandle,
    ) -> Result<(), CloudError> {
        match resource {
            ResourceDescriptor::AppRegistration {
                scopes,
                preauthorized_clients,
                ..
            } => {
                // Full desired set on every pass. A scope id persists once
                // assigned; new scopes get a fresh id.
                let scope_id = handle
                    .properties
                    .get("scope_id")
                    .cloned()
                    .unwrap_or_else(|| Uuid::new_v4().to_string());

                let api = json!({
                    "oauth2PermissionScopes": scopes.iter().map(|scope| json!({
                        "id": scope_id,
                        "value": scope,
                        "type": "User",
                        "isEnabled": true,
                        "adminConsentDisplayName": scope,
                        "adminConsentDescription": scope,
                    })).collect::<Vec<_>>(),
                    "preAuthorizedApplications": preauthorized_clients.iter().map(|client| json!({
                        "appId": client,
                        "delegatedPermissionIds": [scope_id],
                    })).collect::<Vec<_>>(),
                });

                self.invoke(&args([
                    "ad", "app", "update",
                    "--id", handle.id.as_str(),
                    "--set", format!("api={api}").as_str(),
                ]))
                .await?;
                Ok(())
            }
            ResourceDescriptor::FunctionApp {
                name,
                resource_group,
                app_settings,
                ..
            } => {
                if app_settings.is_empty() {
                    return Ok(());
                }
                let mut cli_args = args([
                    "functionapp", "config", "appsettings", "set",
                    "--name", name.as_str(),
                    "--resource-group", resource_group.as_str(),
                    "--settings",
                ]);
                for (key, value) in app_settings {
                    cli_args.push(format!("{key}={value}"));
                }
                self.invoke(&cli_args).await?;
                Ok(())
            }
            // No settable sub-entry sets on these.
            ResourceDescriptor::ResourceGroup { .. } | ResourceDescriptor::StorageAccount { .. } => {
                Ok(())
            }
        }
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

fn str_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}

fn handle_from(value: &Value) -> ResourceHandle {
    ResourceHandle::new(str_field(value, "id").unwrap_or_default())
}
