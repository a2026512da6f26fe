use pv_protocol::*;
use std::collections::BTreeMap;
use uuid::Uuid;

#[test]
fn test_stage_status_wire_format() {
    assert_eq!(serde_json::to_value(StageStatus::Pending).unwrap(), "PENDING");
    assert_eq!(serde_json::to_value(StageStatus::Active).unwrap(), "ACTIVE");
    assert_eq!(
        serde_json::to_value(StageStatus::Completed).unwrap(),
        "COMPLETED"
    );
    assert_eq!(serde_json::to_value(StageStatus::Failed).unwrap(), "FAILED");
}

#[test]
fn test_run_state_serialization() {
    let stages = vec![
        StageState::new("identity", 1, "Registering application identity"),
        StageState::new("infrastructure", 2, "Creating cloud resources"),
    ];
    let state = RunState::new("refresh", stages);

    let json = serde_json::to_string(&state).expect("Failed to serialize RunState");
    let back: RunState = serde_json::from_str(&json).expect("Failed to deserialize RunState");

    assert_eq!(back.id, state.id);
    assert_eq!(back.target_name, "refresh");
    assert_eq!(back.status, RunStatus::Running);
    assert_eq!(back.stages.len(), 2);
    assert_eq!(back.stages[0].status, StageStatus::Pending);
}

#[test]
fn test_event_completion_frame() {
    let mut artifacts = BTreeMap::new();
    artifacts.insert("client_id".to_string(), "11111111-2222".to_string());
    artifacts.insert(
        "endpoint_url".to_string(),
        "https://refresh-func.azurewebsites.net".to_string(),
    );

    let event = Event::RunCompleted {
        run_id: Uuid::new_v4(),
        artifacts,
    };

    let json = serde_json::to_value(&event).expect("Failed to serialize Event");
    assert_eq!(json["type"], "runCompleted");
    assert_eq!(json["payload"]["artifacts"]["client_id"], "11111111-2222");

    let back: Event = serde_json::from_value(json).expect("Failed to deserialize Event");
    assert!(back.is_terminal());
}

#[test]
fn test_op_start_run_serialization() {
    let op = Op::StartRun {
        parameters: DeploymentParameters {
            target_name: "refresh".to_string(),
            region: "eastus2".to_string(),
            openai_endpoint: "https://example.openai.azure.com".to_string(),
            openai_key: "secret".to_string(),
            openai_deployment: "gpt-4o-mini".to_string(),
            storage_connection: None,
            tenant_id: None,
        },
    };

    let json = serde_json::to_value(&op).expect("Failed to serialize Op");
    assert_eq!(json["type"], "startRun");
    assert_eq!(json["payload"]["parameters"]["targetName"], "refresh");
}

#[test]
fn test_artifact_record_round_trip() {
    let mut artifacts = BTreeMap::new();
    artifacts.insert("resource_group".to_string(), "refresh-rg".to_string());
    artifacts.insert("package_path".to_string(), "dist/refresh.zip".to_string());

    let record = ArtifactRecord {
        target_name: "refresh".to_string(),
        run_id: Uuid::new_v4(),
        completed_at: chrono::Utc::now(),
        artifacts,
    };

    let json = serde_json::to_string(&record).expect("Failed to serialize ArtifactRecord");
    let back: ArtifactRecord =
        serde_json::from_str(&json).expect("Failed to deserialize ArtifactRecord");
    assert_eq!(back, record);
}
