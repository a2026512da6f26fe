//! Fixtures: deployment parameters, synthetic plans, and a helper that
//! drives the engine to its terminal event and collects the stream.

use pv_core::engine::{Engine, EngineConfig};
use pv_core::plan::{PlannedStage, ProvisionPlan, StageAction};
use pv_core::reconcile::{CloudClient, ResourceDescriptor};
use pv_core::supervise::CommandSpec;
use pv_protocol::{DeploymentParameters, Event, RunState, StageState};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub fn test_params() -> DeploymentParameters {
    DeploymentParameters {
        target_name: "refresh".to_string(),
        region: "eastus2".to_string(),
        openai_endpoint: "https://example.openai.azure.com".to_string(),
        openai_key: "key".to_string(),
        openai_deployment: "gpt-4o-mini".to_string(),
        storage_connection: None,
        tenant_id: None,
    }
}

pub fn identity_stage() -> PlannedStage {
    PlannedStage {
        id: "identity".to_string(),
        message: "Registering application identity".to_string(),
        action: StageAction::Reconcile(vec![ResourceDescriptor::AppRegistration {
            display_name: "refresh-app".to_string(),
            scopes: vec!["access_as_user".to_string()],
            preauthorized_clients: vec!["1fec8e78-bce4-4aaf-ab1b-5451cc387264".to_string()],
        }]),
    }
}

pub fn infrastructure_stage() -> PlannedStage {
    PlannedStage {
        id: "infrastructure".to_string(),
        message: "Creating cloud resources".to_string(),
        action: StageAction::Reconcile(vec![
            ResourceDescriptor::ResourceGroup {
                name: "refresh-rg".to_string(),
                region: "eastus2".to_string(),
            },
            ResourceDescriptor::StorageAccount {
                name: "refreshst".to_string(),
                resource_group: "refresh-rg".to_string(),
                region: "eastus2".to_string(),
            },
        ]),
    }
}

/// A command stage running `script` under `sh -c`, spanning `covers`
/// stages.
pub fn shell_stage(id: &str, script: &str, covers: usize) -> PlannedStage {
    PlannedStage {
        id: id.to_string(),
        message: format!("Running {id}"),
        action: StageAction::Command {
            spec: CommandSpec::new("sh").arg("-c").arg(script),
            covers,
        },
    }
}

/// A plan with no external tool requirements, so preflight always passes
/// on a build machine.
pub fn plan_of(stages: Vec<PlannedStage>) -> ProvisionPlan {
    ProvisionPlan {
        target_name: "refresh".to_string(),
        stages,
        required_tools: vec!["sh".to_string()],
    }
}

pub fn state_for(plan: &ProvisionPlan) -> Arc<Mutex<RunState>> {
    let stages = plan
        .stages
        .iter()
        .enumerate()
        .map(|(i, s)| StageState::new(s.id.clone(), i + 1, s.message.clone()))
        .collect();
    Arc::new(Mutex::new(RunState::new(plan.target_name.clone(), stages)))
}

/// Run `plan` to its terminal event and return the collected event
/// stream plus the final run state.
///
/// The event channel buffer exceeds any test's frame count, so the
/// engine can run to completion before the stream is drained.
pub async fn execute_collect(
    cloud: Arc<dyn CloudClient>,
    plan: ProvisionPlan,
    state_dir: &Path,
) -> (Vec<Event>, RunState) {
    let engine = Engine::new(
        cloud,
        EngineConfig {
            state_dir: state_dir.to_path_buf(),
            grace: Duration::from_secs(2),
        },
    );
    let state = state_for(&plan);
    let (events_tx, mut events_rx) = mpsc::channel(256);
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    tokio::time::timeout(
        Duration::from_secs(30),
        engine.execute(plan, test_params(), state.clone(), cancel_rx, events_tx),
    )
    .await
    .expect("engine run timed out");

    let mut events = Vec::new();
    while let Ok(event) = events_rx.try_recv() {
        events.push(event);
    }
    let final_state = state.lock().unwrap().clone();
    (events, final_state)
}
