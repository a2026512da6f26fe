//! Deployment run state and parameter models.
//!
//! A DeploymentRun is one invocation of the full provisioning pipeline for
//! a target name. Runs are not resumable; a fresh run starts from stage 1
//! and relies on idempotent reconciliation to make re-runs safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;
use uuid::Uuid;

use crate::stage_models::StageState;

/// Overall status of a deployment run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// The pipeline is executing.
    Running,

    /// Every stage completed and the terminal event was emitted.
    Succeeded,

    /// A stage failed or the run was cancelled.
    Failed,
}

/// Named parameters supplied by the operator when triggering a run.
///
/// The field names mirror the settings surface of the deployed application
/// (`AZURE_OPENAI_*`, `ENTRA_TENANT_ID`, `AZURE_STORAGE_CONNECTION_STRING`).
/// All resource names are derived from `target_name`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentParameters {
    /// Target name every cloud resource name is derived from.
    pub target_name: String,

    /// Cloud region for created resources (e.g., "eastus2").
    pub region: String,

    /// Azure OpenAI endpoint URL the deployed app will call.
    pub openai_endpoint: String,

    /// Azure OpenAI API key.
    pub openai_key: String,

    /// Model deployment name. Defaults to "gpt-4o-mini" when omitted.
    #[serde(default = "default_openai_deployment")]
    pub openai_deployment: String,

    /// Optional blob storage connection string. Blob storage is an
    /// optional feature of the deployed app, so this is not required.
    #[serde(default)]
    pub storage_connection: Option<String>,

    /// Optional tenant id override. When absent the tenant is discovered
    /// during identity reconciliation.
    #[serde(default)]
    pub tenant_id: Option<String>,
}

fn default_openai_deployment() -> String {
    "gpt-4o-mini".to_string()
}

impl DeploymentParameters {
    /// Names of required parameters that are missing or empty.
    ///
    /// The sequencer rejects a run before spawning anything if this is
    /// non-empty (fail-fast, no partial resource creation).
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.target_name.trim().is_empty() {
            missing.push("targetName");
        }
        if self.region.trim().is_empty() {
            missing.push("region");
        }
        if self.openai_endpoint.trim().is_empty() {
            missing.push("openaiEndpoint");
        }
        if self.openai_key.trim().is_empty() {
            missing.push("openaiKey");
        }
        missing
    }
}

/// Snapshot of a deployment run: stage states plus captured artifacts.
#[derive(Serialize, Deserialize, Debug, Clone, TS)]
pub struct RunState {
    /// Unique identifier for this run.
    #[ts(type = "string")]
    pub id: Uuid,

    /// The target name this run provisions.
    pub target_name: String,

    /// Overall run status.
    pub status: RunStatus,

    /// Ordered stage states, index = ordinal - 1.
    pub stages: Vec<StageState>,

    /// Artifacts captured so far, keyed by stable artifact name.
    pub artifacts: BTreeMap<String, String>,
}

impl RunState {
    /// Create a fresh Running state for a target with the given stages.
    pub fn new(target_name: impl Into<String>, stages: Vec<StageState>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_name: target_name.into(),
            status: RunStatus::Running,
            stages,
            artifacts: BTreeMap::new(),
        }
    }
}

/// Persisted record of a successful run's artifacts.
///
/// Written once at run end and read back by the packaging step, which needs
/// the same identifiers without re-running earlier stages. A record always
/// contains the artifacts of exactly one run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    /// Target the run provisioned.
    pub target_name: String,

    /// The run that produced these artifacts.
    #[ts(type = "string")]
    pub run_id: Uuid,

    /// When the run completed.
    #[ts(type = "string")]
    pub completed_at: DateTime<Utc>,

    /// All artifacts captured during the run.
    pub artifacts: BTreeMap<String, String>,
}
