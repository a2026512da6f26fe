//! Run lifecycle management.
//!
//! The manager accepts trigger operations, validates parameters, spawns
//! one engine task per run, and tracks live run snapshots. Runs for
//! different targets are fully independent: each has its own state, its
//! own artifact store inside the engine task, and its own event stream.
//!
//! Two concurrent runs for the SAME target are not serialized here; they
//! would race on the provider. Operators are expected to trigger one run
//! per target at a time.

use crate::engine::{Engine, EngineConfig};
use crate::package::find_package;
use crate::plan::provision_plan;
use crate::reconcile::CloudClient;
use pv_protocol::{DeploymentParameters, Event, Op, RunState, StageState};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::info;
use uuid::Uuid;

/// Event stream buffer per run. The supervisor's line channel is
/// unbounded, so this only smooths bursts toward the observer.
const EVENT_BUFFER: usize = 256;

/// Handle returned to the observer that triggered a run.
pub struct RunHandle {
    pub run_id: Uuid,
    /// Ordered progress frames; closes after the terminal frame.
    pub events: mpsc::Receiver<Event>,
}

/// What a dispatched operation produced.
pub enum OpOutcome {
    /// A run was triggered; consume its event stream.
    Stream(RunHandle),

    /// Snapshot of the requested run, if known.
    State(Option<RunState>),

    /// Whether the cancel request reached a live run.
    Cancelled(bool),

    /// Location of the built package, if any.
    Package(Option<std::path::PathBuf>),

    /// Every run was asked to stop.
    ShuttingDown,
}

struct RunEntry {
    state: Arc<Mutex<RunState>>,
    cancel: watch::Sender<bool>,
}

/// Accepts runs and tracks their snapshots.
pub struct RunManager {
    engine: Arc<Engine>,
    workspace: PathBuf,
    runs: Arc<Mutex<HashMap<Uuid, RunEntry>>>,
}

impl RunManager {
    /// `workspace` is the directory holding the application source that
    /// command stages run in.
    pub fn new(cloud: Arc<dyn CloudClient>, config: EngineConfig, workspace: PathBuf) -> Self {
        Self {
            engine: Arc::new(Engine::new(cloud, config)),
            workspace,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Trigger a deployment run.
    ///
    /// Parameters are validated before anything is spawned: a missing
    /// required parameter yields a stream carrying a single `RunError`
    /// frame and no run is registered.
    pub fn start_run(&self, params: DeploymentParameters) -> RunHandle {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let missing = params.missing_required();
        if !missing.is_empty() {
            let run_id = Uuid::new_v4();
            // try_send cannot fail on a fresh buffered channel.
            let _ = events_tx.try_send(Event::RunError {
                run_id,
                stage_id: "parameters".to_string(),
                message: format!("Missing required parameters: {}", missing.join(", ")),
            });
            return RunHandle {
                run_id,
                events: events_rx,
            };
        }

        let plan = provision_plan(&params, &self.workspace);
        let stages = plan
            .stages
            .iter()
            .enumerate()
            .map(|(i, s)| StageState::new(s.id.clone(), i + 1, s.message.clone()))
            .collect();
        let state = Arc::new(Mutex::new(RunState::new(plan.target_name.clone(), stages)));
        let run_id = lock_state(&state).id;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                run_id,
                RunEntry {
                    state: state.clone(),
                    cancel: cancel_tx,
                },
            );

        info!(%run_id, target = %plan.target_name, "run accepted");

        let engine = self.engine.clone();
        let runs = self.runs.clone();
        tokio::spawn(async move {
            engine
                .execute(plan, params, state, cancel_rx, events_tx)
                .await;
            // The terminal frame is out; drop the entry so the registry
            // does not grow without bound. Final artifacts live in the
            // terminal frame and the on-disk record.
            runs.lock().unwrap_or_else(|e| e.into_inner()).remove(&run_id);
        });

        RunHandle {
            run_id,
            events: events_rx,
        }
    }

    /// Snapshot of a live run's current state.
    ///
    /// Finished runs are pruned once their terminal frame is delivered,
    /// so this returns `None` for completed and unknown runs alike.
    pub fn run_state(&self, run_id: Uuid) -> Option<RunState> {
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&run_id)
            .map(|entry| lock_state(&entry.state).clone())
    }

    /// Request cooperative cancellation. Returns false for unknown runs.
    pub fn cancel_run(&self, run_id: Uuid) -> bool {
        match self
            .runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&run_id)
        {
            Some(entry) => entry.cancel.send(true).is_ok(),
            None => false,
        }
    }

    /// Dispatch one observer operation.
    ///
    /// This is the single entry point a transport (web bridge, CLI) needs.
    pub fn dispatch(&self, op: Op) -> OpOutcome {
        match op {
            Op::StartRun { parameters } => OpOutcome::Stream(self.start_run(parameters)),
            Op::CancelRun { run_id } => OpOutcome::Cancelled(self.cancel_run(run_id)),
            Op::GetRunState { run_id } => OpOutcome::State(self.run_state(run_id)),
            Op::FindPackage { target_name } => {
                OpOutcome::Package(find_package(&target_name, &self.workspace))
            }
            Op::Shutdown => {
                self.cancel_all();
                OpOutcome::ShuttingDown
            }
        }
    }

    /// Cancel every active run (shutdown path).
    pub fn cancel_all(&self) {
        for entry in self
            .runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
        {
            let _ = entry.cancel.send(true);
        }
    }
}

fn lock_state(state: &Arc<Mutex<RunState>>) -> std::sync::MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}
