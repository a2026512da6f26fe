//! Integration tests for the stage sequencer.
//!
//! These drive the engine with a scripted cloud client and shell commands
//! standing in for the provider CLIs, and verify:
//! - the stage frames form a strict sequential order
//! - markers and artifact shapes in command output are acted on
//! - failures and fatal diagnostics produce exactly one terminal frame
//! - a disconnected observer or a cancel request stops the child promptly

mod common;

use common::*;
use pv_core::artifacts::{load_record, record_path};
use pv_core::engine::{Engine, EngineConfig};
use pv_core::reconcile::MockCloud;
use pv_protocol::{Event, RunStatus, StageStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[tokio::test]
async fn test_full_run_emits_ordered_stages_and_completes() {
    let dir = tempfile::tempdir().unwrap();
    let plan = plan_of(vec![
        identity_stage(),
        shell_stage(
            "code-deploy",
            "echo 'publishing'; \
             echo '[3/3] Building app package'; \
             echo 'Invoke url: https://refresh-func.azurewebsites.net/api'; \
             echo 'Package path: dist/refresh-appPackage.zip'",
            2,
        ),
        // Covered by the command above; never spawns anything itself.
        shell_stage("package", "true", 1),
    ]);

    let (events, state) = execute_collect(Arc::new(MockCloud::empty()), plan, dir.path()).await;

    assert!(matches!(events[0], Event::RunStarted { .. }));
    assert_stage_sequence(&events);
    assert_single_terminal(&events);
    assert_eq!(
        completed_stage_ids(&events),
        vec!["identity", "code-deploy", "package"]
    );

    assert_eq!(state.status, RunStatus::Succeeded);
    assert!(state.stages.iter().all(|s| s.status == StageStatus::Completed));

    // Identity reconciliation and command output both contributed.
    assert!(captured_artifact(&events, "client_id").is_some());
    assert_eq!(
        captured_artifact(&events, "endpoint_url").as_deref(),
        Some("https://refresh-func.azurewebsites.net/api")
    );

    // The terminal frame carries the aggregated artifact map.
    let Some(Event::RunCompleted { artifacts, .. }) = events.last() else {
        panic!("expected runCompleted, got {:?}", events.last());
    };
    assert_eq!(
        artifacts.get("package_path").map(String::as_str),
        Some("dist/refresh-appPackage.zip")
    );

    // And the record was persisted for the packaging step.
    let record = load_record(&record_path(dir.path(), "refresh")).unwrap();
    assert_eq!(record.artifacts, *artifacts);
}

#[tokio::test]
async fn test_stage_marker_activates_covered_stage_before_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let plan = plan_of(vec![
        shell_stage(
            "code-deploy",
            "echo '[2/2] packaging'; echo 'Package path: dist/refresh.zip'",
            2,
        ),
        shell_stage("package", "true", 1),
    ]);

    let (events, _) = execute_collect(Arc::new(MockCloud::empty()), plan, dir.path()).await;

    let package_active = position(&events, |e| {
        matches!(e, Event::StageUpdate { stage_id, status: StageStatus::Active, .. } if stage_id == "package")
    })
    .expect("package stage never activated");
    let artifact = position(&events, |e| {
        matches!(e, Event::ArtifactCaptured { key, .. } if key == "package_path")
    })
    .expect("package_path never captured");

    // The marker advanced the pipeline before the artifact on the next
    // line was captured, so the artifact belongs to the new stage.
    assert!(package_active < artifact);
}

#[tokio::test]
async fn test_nonzero_exit_fails_the_active_stage() {
    let dir = tempfile::tempdir().unwrap();
    let plan = plan_of(vec![
        identity_stage(),
        shell_stage("code-deploy", "echo 'starting'; exit 2", 1),
    ]);

    let (events, state) = execute_collect(Arc::new(MockCloud::empty()), plan, dir.path()).await;

    assert_stage_sequence(&events);
    assert_single_terminal(&events);
    assert_eq!(completed_stage_ids(&events), vec!["identity"]);

    let Some(Event::RunError {
        stage_id, message, ..
    }) = events.last()
    else {
        panic!("expected runError, got {:?}", events.last());
    };
    assert_eq!(stage_id, "code-deploy");
    assert!(message.contains("code 2"), "message: {message}");
    assert_eq!(state.status, RunStatus::Failed);

    // No record is written for a failed run.
    assert!(!record_path(dir.path(), "refresh").exists());
}

#[tokio::test]
async fn test_fatal_stderr_terminates_a_running_child() {
    let dir = tempfile::tempdir().unwrap();
    let plan = plan_of(vec![shell_stage(
        "code-deploy",
        "echo 'ERROR: authentication failed' >&2; sleep 30",
        1,
    )]);

    let started = tokio::time::Instant::now();
    let (events, state) = execute_collect(Arc::new(MockCloud::empty()), plan, dir.path()).await;

    // Terminated well before the sleep would have finished.
    assert!(started.elapsed() < Duration::from_secs(15));
    assert_stage_sequence(&events);
    assert_single_terminal(&events);
    let Some(Event::RunError { message, .. }) = events.last() else {
        panic!("expected runError, got {:?}", events.last());
    };
    assert!(message.contains("ERROR"), "message: {message}");
    assert_eq!(state.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_benign_stderr_does_not_fail_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let plan = plan_of(vec![shell_stage(
        "code-deploy",
        "echo 'Connecting to service...' >&2; echo done",
        1,
    )]);

    let (events, state) = execute_collect(Arc::new(MockCloud::empty()), plan, dir.path()).await;

    assert_eq!(state.status, RunStatus::Succeeded);
    assert_stage_sequence(&events);
    // The stderr line was still forwarded as a log frame.
    assert!(events.iter().any(|e| matches!(
        e,
        Event::LogLine { text, .. } if text == "Connecting to service..."
    )));
}

#[tokio::test]
async fn test_missing_tool_fails_before_any_side_effect() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockCloud::empty());
    let mut plan = plan_of(vec![identity_stage()]);
    plan.required_tools = vec!["nonexistent-provider-cli".to_string()];

    let (events, state) = execute_collect(mock.clone(), plan, dir.path()).await;

    assert_stage_sequence(&events);
    assert_single_terminal(&events);
    assert_eq!(state.status, RunStatus::Failed);
    assert!(mock.created_names().is_empty(), "nothing may be created");

    // No stage ever became Active, so no stage frame may appear; the
    // failure is carried by the terminal frame alone.
    assert!(
        !events.iter().any(|e| matches!(e, Event::StageUpdate { .. })),
        "preflight failure emitted a stage frame: {events:?}"
    );
    let Some(Event::RunError { stage_id, .. }) = events.last() else {
        panic!("expected runError, got {:?}", events.last());
    };
    assert_eq!(stage_id, "identity");
}

#[tokio::test]
async fn test_cancel_before_first_stage_emits_only_run_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(
        Arc::new(MockCloud::empty()),
        EngineConfig {
            state_dir: dir.path().to_path_buf(),
            grace: Duration::from_secs(2),
        },
    );
    let plan = plan_of(vec![identity_stage()]);
    let state = state_for(&plan);

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    cancel_tx.send(true).unwrap();

    engine
        .execute(plan, test_params(), state, cancel_rx, events_tx)
        .await;

    let mut events = Vec::new();
    while let Ok(event) = events_rx.try_recv() {
        events.push(event);
    }

    // The first stage stayed Pending; only RunStarted and the terminal
    // frame are on the stream.
    assert_stage_sequence(&events);
    assert_single_terminal(&events);
    assert!(matches!(events[0], Event::RunStarted { .. }));
    assert_eq!(events.len(), 2, "unexpected frames: {events:?}");
    assert!(matches!(events[1], Event::RunError { .. }));
}

#[tokio::test]
async fn test_record_persist_failure_never_refails_a_completed_stage() {
    let dir = tempfile::tempdir().unwrap();
    // A plain file where the state directory should go makes the record
    // write fail after every stage completed.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let state_dir = blocker.join("state");

    let plan = plan_of(vec![shell_stage("package", "true", 1)]);
    let (events, state) = execute_collect(Arc::new(MockCloud::empty()), plan, &state_dir).await;

    assert_stage_sequence(&events);
    assert_single_terminal(&events);
    assert_eq!(state.status, RunStatus::Failed);

    // The stage completed and stays completed; the persistence failure
    // surfaces only as the terminal frame.
    assert_eq!(completed_stage_ids(&events), vec!["package"]);
    assert!(
        !events.iter().any(|e| matches!(
            e,
            Event::StageUpdate {
                status: StageStatus::Failed,
                ..
            }
        )),
        "a completed stage was re-failed: {events:?}"
    );
    assert!(matches!(events.last(), Some(Event::RunError { .. })));
}

#[tokio::test]
async fn test_observer_disconnect_terminates_the_child() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(
        Arc::new(MockCloud::empty()),
        EngineConfig {
            state_dir: dir.path().to_path_buf(),
            grace: Duration::from_secs(2),
        },
    );
    let plan = plan_of(vec![shell_stage(
        "code-deploy",
        "while true; do echo tick; sleep 0.1; done",
        1,
    )]);
    let state = state_for(&plan);

    let (events_tx, mut events_rx) = mpsc::channel(8);
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let task = {
        let state = state.clone();
        tokio::spawn(async move {
            engine
                .execute(plan, test_params(), state, cancel_rx, events_tx)
                .await;
        })
    };

    // Wait until the command stage is producing output, then walk away.
    loop {
        let event = events_rx.recv().await.expect("stream ended early");
        if matches!(event, Event::LogLine { .. }) {
            break;
        }
    }
    drop(events_rx);

    tokio::time::timeout(Duration::from_secs(15), task)
        .await
        .expect("engine did not stop after disconnect")
        .unwrap();
    assert_eq!(state.lock().unwrap().status, RunStatus::Failed);
}

#[tokio::test]
async fn test_cancel_request_stops_the_run_with_a_terminal_frame() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(
        Arc::new(MockCloud::empty()),
        EngineConfig {
            state_dir: dir.path().to_path_buf(),
            grace: Duration::from_secs(2),
        },
    );
    let plan = plan_of(vec![shell_stage("code-deploy", "sleep 30", 1)]);
    let state = state_for(&plan);

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let task = {
        let state = state.clone();
        tokio::spawn(async move {
            engine
                .execute(plan, test_params(), state, cancel_rx, events_tx)
                .await;
        })
    };

    // Let the stage activate, then cancel.
    loop {
        let event = events_rx.recv().await.expect("stream ended early");
        if matches!(
            event,
            Event::StageUpdate {
                status: StageStatus::Active,
                ..
            }
        ) {
            break;
        }
    }
    cancel_tx.send(true).unwrap();

    let mut events = Vec::new();
    while let Some(event) = events_rx.recv().await {
        events.push(event);
    }
    tokio::time::timeout(Duration::from_secs(15), task)
        .await
        .expect("engine did not stop after cancel")
        .unwrap();

    assert_single_terminal(&events);
    let Some(Event::RunError { message, .. }) = events.last() else {
        panic!("expected runError, got {:?}", events.last());
    };
    assert!(message.contains("cancelled"), "message: {message}");
}
