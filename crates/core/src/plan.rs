//! The canonical provisioning plan for a target.
//!
//! A plan is the static, ordered stage list plus per-stage actions. Every
//! resource name is derived from the run's target name, so the same target
//! always maps to the same resources and re-runs reconcile instead of
//! duplicating.
//!
//! Values produced by earlier stages are referenced with `{artifact_key}`
//! placeholders (e.g. the function app's `ENTRA_CLIENT_ID` setting refers
//! to `{client_id}` captured by the identity stage); the sequencer
//! resolves them against the artifact store right before the stage runs.

use crate::reconcile::ResourceDescriptor;
use crate::supervise::CommandSpec;
use pv_protocol::DeploymentParameters;
use std::collections::BTreeMap;
use std::path::Path;

/// Client ids of the host applications allowed to call the deployed API
/// with SSO tokens (Teams desktop/web, Office hosts). Submitted whole on
/// every identity reconciliation (replace-on-write).
pub const PRE_AUTHORIZED_CLIENTS: [&str; 4] = [
    "1fec8e78-bce4-4aaf-ab1b-5451cc387264", // Teams desktop/mobile
    "5e3ce6c0-2b1f-4285-8d4b-75ee78787346", // Teams web
    "4765445b-32c6-49b0-83e6-1d93765276ca", // Office web
    "d3590ed6-52b3-4102-aeff-aad2292ab01c", // Office desktop / Outlook
];

/// The delegated scope the deployed API exposes.
pub const API_SCOPE: &str = "access_as_user";

/// What a stage does when it becomes active.
#[derive(Debug, Clone)]
pub enum StageAction {
    /// Ensure each resource exists, creating only what is absent.
    Reconcile(Vec<ResourceDescriptor>),

    /// Run one supervised external command. `covers` is the number of
    /// pipeline stages (starting at this one) the command spans; markers
    /// in its output advance through them.
    Command { spec: CommandSpec, covers: usize },
}

/// One planned stage: wire-visible identity plus its action.
#[derive(Debug, Clone)]
pub struct PlannedStage {
    pub id: String,
    pub message: String,
    pub action: StageAction,
}

/// The full plan for one deployment run.
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    pub target_name: String,
    pub stages: Vec<PlannedStage>,
    /// External tools that must be on PATH before stage 1 starts.
    pub required_tools: Vec<String>,
}

/// Resource group name for a target.
pub fn resource_group_name(target: &str) -> String {
    format!("{target}-rg")
}

/// Function app name for a target.
pub fn function_app_name(target: &str) -> String {
    format!("{target}-func")
}

/// App registration display name for a target.
pub fn app_registration_name(target: &str) -> String {
    format!("{target}-app")
}

/// Storage account name for a target.
///
/// Storage account names allow only 3-24 lowercase alphanumerics, so the
/// target is sanitized and truncated before the `st` suffix.
pub fn storage_account_name(target: &str) -> String {
    let mut base: String = target
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    base.truncate(22);
    if base.is_empty() {
        base.push_str("app");
    }
    format!("{base}st")
}

/// Build the canonical four-stage plan for `params`.
///
/// `workspace` is the directory holding the application source; the
/// supervised publish and package commands run there.
pub fn provision_plan(params: &DeploymentParameters, workspace: &Path) -> ProvisionPlan {
    let target = params.target_name.as_str();
    let resource_group = resource_group_name(target);
    let storage_account = storage_account_name(target);
    let function_app = function_app_name(target);

    let mut app_settings = vec![
        (
            "AZURE_OPENAI_ENDPOINT".to_string(),
            params.openai_endpoint.clone(),
        ),
        ("AZURE_OPENAI_KEY".to_string(), params.openai_key.clone()),
        (
            "AZURE_OPENAI_DEPLOYMENT".to_string(),
            params.openai_deployment.clone(),
        ),
        ("ENTRA_CLIENT_ID".to_string(), "{client_id}".to_string()),
        ("ENTRA_TENANT_ID".to_string(), "{tenant_id}".to_string()),
    ];
    if let Some(connection) = &params.storage_connection {
        app_settings.push((
            "AZURE_STORAGE_CONNECTION_STRING".to_string(),
            connection.clone(),
        ));
    }

    let stages = vec![
        PlannedStage {
            id: "identity".to_string(),
            message: "Registering application identity".to_string(),
            action: StageAction::Reconcile(vec![ResourceDescriptor::AppRegistration {
                display_name: app_registration_name(target),
                scopes: vec![API_SCOPE.to_string()],
                preauthorized_clients: PRE_AUTHORIZED_CLIENTS
                    .iter()
                    .map(|c| (*c).to_string())
                    .collect(),
            }]),
        },
        PlannedStage {
            id: "infrastructure".to_string(),
            message: "Creating cloud resources".to_string(),
            action: StageAction::Reconcile(vec![
                ResourceDescriptor::ResourceGroup {
                    name: resource_group.clone(),
                    region: params.region.clone(),
                },
                ResourceDescriptor::StorageAccount {
                    name: storage_account.clone(),
                    resource_group: resource_group.clone(),
                    region: params.region.clone(),
                },
                ResourceDescriptor::FunctionApp {
                    name: function_app.clone(),
                    resource_group,
                    region: params.region.clone(),
                    storage_account,
                    app_settings,
                },
            ]),
        },
        PlannedStage {
            id: "code-deploy".to_string(),
            message: "Deploying application code".to_string(),
            action: StageAction::Command {
                spec: CommandSpec::new("func")
                    .args(["azure", "functionapp", "publish"])
                    .arg(function_app)
                    .arg("--python")
                    .working_dir(workspace),
                covers: 1,
            },
        },
        PlannedStage {
            id: "package".to_string(),
            message: "Building app package".to_string(),
            action: StageAction::Command {
                spec: CommandSpec::new("bash")
                    .arg("scripts/package.sh")
                    .arg(target)
                    .working_dir(workspace)
                    .env("PROVISION_CLIENT_ID", "{client_id}")
                    .env("PROVISION_TENANT_ID", "{tenant_id}")
                    .env("PROVISION_ENDPOINT_URL", "{endpoint_url}"),
                covers: 1,
            },
        },
    ];

    ProvisionPlan {
        target_name: target.to_string(),
        stages,
        required_tools: vec!["az".to_string(), "func".to_string()],
    }
}

/// Replace `{key}` placeholders with captured artifact values.
///
/// Unknown placeholders are left untouched; the stage that needs them
/// will fail visibly rather than silently receive an empty string.
pub fn resolve_placeholders(input: &str, artifacts: &BTreeMap<String, String>) -> String {
    let mut out = input.to_string();
    for (key, value) in artifacts {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

impl StageAction {
    /// A copy of this action with artifact placeholders resolved.
    pub fn resolved(&self, artifacts: &BTreeMap<String, String>) -> StageAction {
        match self {
            StageAction::Reconcile(resources) => StageAction::Reconcile(
                resources
                    .iter()
                    .map(|resource| match resource {
                        ResourceDescriptor::FunctionApp {
                            name,
                            resource_group,
                            region,
                            storage_account,
                            app_settings,
                        } => ResourceDescriptor::FunctionApp {
                            name: name.clone(),
                            resource_group: resource_group.clone(),
                            region: region.clone(),
                            storage_account: storage_account.clone(),
                            app_settings: app_settings
                                .iter()
                                .map(|(k, v)| (k.clone(), resolve_placeholders(v, artifacts)))
                                .collect(),
                        },
                        other => other.clone(),
                    })
                    .collect(),
            ),
            StageAction::Command { spec, covers } => {
                let mut resolved = spec.clone();
                resolved.args = resolved
                    .args
                    .iter()
                    .map(|arg| resolve_placeholders(arg, artifacts))
                    .collect();
                resolved.env = resolved
                    .env
                    .iter()
                    .map(|(k, v)| (k.clone(), resolve_placeholders(v, artifacts)))
                    .collect();
                StageAction::Command {
                    spec: resolved,
                    covers: *covers,
                }
            }
        }
    }
}
