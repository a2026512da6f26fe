//! The stage sequencer: drives a plan from stage 1 to completion.
//!
//! The engine owns the strict stage ordering of a run. A stage becomes
//! Active only after every earlier stage Completed; when a stage completes
//! and the next activates, the Completed frame is emitted before the next
//! Active frame, so an observer never sees two stages Active at once.
//!
//! Reconcile stages go through the [`Reconciler`](crate::reconcile);
//! command stages spawn a supervised child whose output is classified line
//! by line. One command may span several stages: stage markers in its
//! output advance the pipeline through the stages it covers, and a clean
//! exit completes whatever covered stages remain.
//!
//! Every event send doubles as a liveness probe of the observer. When the
//! stream's receiver is gone the run is cancelled: the child is terminated
//! gracefully and no further frames are produced.

use crate::artifacts::{record_path, ArtifactStore};
use crate::classify::{Classifier, Signal};
use crate::plan::{ProvisionPlan, StageAction};
use crate::reconcile::{CloudClient, Reconciler};
use crate::supervise::{CommandSpec, Supervisor};
use pv_protocol::{DeploymentParameters, Event, RunState, RunStatus, StageStatus};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

/// Engine-level settings shared by all runs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory artifact records are written to.
    pub state_dir: PathBuf,

    /// How long a terminated child gets to exit before SIGKILL.
    pub grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".provision"),
            grace: Duration::from_secs(5),
        }
    }
}

/// How a stage (or the whole run) ended.
enum StageEnd {
    /// This many stages completed; continue with the next one.
    Advanced(usize),

    /// The run is over (failure, cancellation, or disconnect). All state
    /// and event bookkeeping has already happened.
    Halt,
}

/// Executes provisioning plans.
pub struct Engine {
    reconciler: Reconciler,
    classifier: Classifier,
    config: EngineConfig,
}

impl Engine {
    pub fn new(cloud: Arc<dyn CloudClient>, config: EngineConfig) -> Self {
        Self {
            reconciler: Reconciler::new(cloud),
            classifier: Classifier::new(),
            config,
        }
    }

    /// Drive `plan` to a terminal event.
    ///
    /// `state` is the shared snapshot observers poll; it is kept current
    /// as stages progress. Flipping `cancel` to true requests cooperative
    /// cancellation. Exactly one terminal frame is sent on `events` unless
    /// the observer disconnects first, in which case the run stops with no
    /// further frames.
    pub async fn execute(
        &self,
        plan: ProvisionPlan,
        params: DeploymentParameters,
        state: Arc<Mutex<RunState>>,
        cancel: watch::Receiver<bool>,
        events: mpsc::Sender<Event>,
    ) {
        let run_id = lock(&state).id;
        let mut ctx = RunCtx {
            run_id,
            state: &state,
            events: &events,
            artifacts: ArtifactStore::new(),
        };

        if !ctx
            .emit(Event::RunStarted {
                run_id,
                target_name: plan.target_name.clone(),
            })
            .await
        {
            set_run_status(&state, RunStatus::Failed);
            return;
        }

        // An operator-supplied tenant takes precedence over discovery;
        // first-write-wins in the store keeps it.
        if let Some(tenant) = &params.tenant_id {
            if !ctx.capture("tenant_id", tenant, "parameters").await {
                set_run_status(&state, RunStatus::Failed);
                return;
            }
        }

        if matches!(self.preflight(&plan, &mut ctx).await, StageEnd::Halt) {
            return;
        }

        let mut index = 0;
        while index < plan.stages.len() {
            if *cancel.borrow() {
                // The next stage never became Active; no stage frame.
                let stage_id = plan.stages[index].id.clone();
                ctx.abort(&stage_id, "Run cancelled").await;
                return;
            }

            let stage = &plan.stages[index];
            set_stage(&state, index, StageStatus::Active, &stage.message);
            if !ctx
                .emit(Event::StageUpdate {
                    run_id,
                    stage_id: stage.id.clone(),
                    status: StageStatus::Active,
                    message: stage.message.clone(),
                })
                .await
            {
                set_run_status(&state, RunStatus::Failed);
                return;
            }

            let action = stage.action.resolved(&ctx.artifacts.snapshot());
            let end = match action {
                StageAction::Reconcile(resources) => {
                    self.reconcile_stage(&plan, index, resources, &mut ctx).await
                }
                StageAction::Command { spec, covers } => {
                    self.command_stage(&plan, index, spec, covers, cancel.clone(), &mut ctx)
                        .await
                }
            };

            match end {
                StageEnd::Advanced(count) => index += count,
                StageEnd::Halt => return,
            }
        }

        self.finish(&plan, &mut ctx).await;
    }

    /// Verify the external tools the plan depends on are reachable before
    /// touching anything. A missing tool fails the run before stage 1
    /// ever activates, so no stage frame is emitted.
    async fn preflight(&self, plan: &ProvisionPlan, ctx: &mut RunCtx<'_>) -> StageEnd {
        for tool in &plan.required_tools {
            if let Err(e) = which::which(tool) {
                warn!(%tool, error = %e, "required tool not found on PATH");
                let stage_id = plan.stages[0].id.clone();
                ctx.abort(&stage_id, format!("Required tool '{tool}' not found"))
                    .await;
                return StageEnd::Halt;
            }
        }
        StageEnd::Advanced(0)
    }

    async fn reconcile_stage(
        &self,
        plan: &ProvisionPlan,
        index: usize,
        resources: Vec<crate::reconcile::ResourceDescriptor>,
        ctx: &mut RunCtx<'_>,
    ) -> StageEnd {
        let stage = &plan.stages[index];

        for resource in &resources {
            if !ctx
                .log(&stage.id, format!("Reconciling {} '{}'", resource.kind(), resource.name()))
                .await
            {
                set_run_status(ctx.state, RunStatus::Failed);
                return StageEnd::Halt;
            }

            let outcome = match self.reconciler.ensure_exists(resource).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    ctx.fail(index, &stage.id, e.to_string()).await;
                    return StageEnd::Halt;
                }
            };

            let verb = if outcome.existing { "Reusing" } else { "Created" };
            if !ctx
                .log(&stage.id, format!("{verb} {} '{}'", resource.kind(), resource.name()))
                .await
            {
                set_run_status(ctx.state, RunStatus::Failed);
                return StageEnd::Halt;
            }

            for (key, value) in resource.artifacts_for(&outcome.handle) {
                if !ctx.capture(&key, &value, &stage.id).await {
                    set_run_status(ctx.state, RunStatus::Failed);
                    return StageEnd::Halt;
                }
            }
        }

        if !ctx.complete_stage(plan, index).await {
            return StageEnd::Halt;
        }
        StageEnd::Advanced(1)
    }

    /// Run one supervised command that covers `covers` stages starting at
    /// `first`. Stage markers in the output advance through the covered
    /// range; a clean exit completes whatever remains of it.
    async fn command_stage(
        &self,
        plan: &ProvisionPlan,
        first: usize,
        spec: CommandSpec,
        covers: usize,
        mut cancel: watch::Receiver<bool>,
        ctx: &mut RunCtx<'_>,
    ) -> StageEnd {
        let last = (first + covers).min(plan.stages.len());
        let mut current = first;

        let mut running = match Supervisor::spawn(&spec) {
            Ok(running) => running,
            Err(e) => {
                let stage_id = plan.stages[first].id.clone();
                ctx.fail(first, &stage_id, e.to_string()).await;
                return StageEnd::Halt;
            }
        };

        let mut cancel_open = true;
        loop {
            let line = if cancel_open {
                tokio::select! {
                    changed = cancel.changed() => {
                        match changed {
                            Ok(()) if *cancel.borrow() => {
                                running.terminate(self.config.grace).await;
                                let stage_id = plan.stages[current].id.clone();
                                ctx.fail(current, &stage_id, "Run cancelled").await;
                                return StageEnd::Halt;
                            }
                            Ok(()) => continue,
                            // Sender gone; cancellation can no longer arrive.
                            Err(_) => {
                                cancel_open = false;
                                continue;
                            }
                        }
                    }
                    line = running.next_line() => line,
                }
            } else {
                running.next_line().await
            };

            let Some(line) = line else {
                break; // Both pipes closed; the child is exiting.
            };

            let stage_id = plan.stages[current].id.clone();
            if !ctx.log(&stage_id, line.text.clone()).await {
                running.terminate(self.config.grace).await;
                set_run_status(ctx.state, RunStatus::Failed);
                return StageEnd::Halt;
            }

            for signal in self.classifier.classify(line.source, &line.text) {
                match signal {
                    Signal::StageReached(ordinal) => {
                        // Ordinals are 1-based over the whole pipeline.
                        let reached = ordinal.saturating_sub(1);
                        if reached > current && reached < last {
                            while current < reached {
                                if !ctx.complete_stage(plan, current).await {
                                    running.terminate(self.config.grace).await;
                                    return StageEnd::Halt;
                                }
                                current += 1;
                                let next = &plan.stages[current];
                                set_stage(ctx.state, current, StageStatus::Active, &next.message);
                                if !ctx
                                    .emit(Event::StageUpdate {
                                        run_id: ctx.run_id,
                                        stage_id: next.id.clone(),
                                        status: StageStatus::Active,
                                        message: next.message.clone(),
                                    })
                                    .await
                                {
                                    running.terminate(self.config.grace).await;
                                    set_run_status(ctx.state, RunStatus::Failed);
                                    return StageEnd::Halt;
                                }
                            }
                        }
                    }
                    Signal::ArtifactFound { key, value } => {
                        let owner = plan.stages[current].id.clone();
                        if !ctx.capture(&key, &value, &owner).await {
                            running.terminate(self.config.grace).await;
                            set_run_status(ctx.state, RunStatus::Failed);
                            return StageEnd::Halt;
                        }
                    }
                    Signal::FatalPattern(text) => {
                        running.terminate(self.config.grace).await;
                        let stage_id = plan.stages[current].id.clone();
                        ctx.fail(current, &stage_id, text).await;
                        return StageEnd::Halt;
                    }
                    Signal::Benign => {}
                }
            }
        }

        let code = match running.wait().await {
            Ok(code) => code,
            Err(e) => {
                let stage_id = plan.stages[current].id.clone();
                ctx.fail(current, &stage_id, e.to_string()).await;
                return StageEnd::Halt;
            }
        };

        if code != 0 {
            let stage_id = plan.stages[current].id.clone();
            ctx.fail(
                current,
                &stage_id,
                format!("Command '{}' exited with code {code}", spec.program),
            )
            .await;
            return StageEnd::Halt;
        }

        // Clean exit completes the rest of the covered range in order.
        let already_active = current;
        while current < last {
            if current > already_active {
                let stage = &plan.stages[current];
                set_stage(ctx.state, current, StageStatus::Active, &stage.message);
                if !ctx
                    .emit(Event::StageUpdate {
                        run_id: ctx.run_id,
                        stage_id: stage.id.clone(),
                        status: StageStatus::Active,
                        message: stage.message.clone(),
                    })
                    .await
                {
                    set_run_status(ctx.state, RunStatus::Failed);
                    return StageEnd::Halt;
                }
            }
            if !ctx.complete_stage(plan, current).await {
                return StageEnd::Halt;
            }
            current += 1;
        }

        StageEnd::Advanced(last - first)
    }

    /// All stages completed: persist the artifact record and emit the
    /// terminal completion frame.
    async fn finish(&self, plan: &ProvisionPlan, ctx: &mut RunCtx<'_>) {
        let path = record_path(&self.config.state_dir, &plan.target_name);
        if let Err(e) = ctx.artifacts.persist(&path, &plan.target_name, ctx.run_id) {
            warn!(error = %e, "failed to persist artifact record");
            // Every stage already completed; never re-transition one.
            let last = plan.stages.len().saturating_sub(1);
            let stage_id = plan.stages[last].id.clone();
            ctx.abort(&stage_id, e.to_string()).await;
            return;
        }

        set_run_status(ctx.state, RunStatus::Succeeded);
        let artifacts = ctx.artifacts.snapshot();
        info!(run_id = %ctx.run_id, target = %plan.target_name, "run completed");
        ctx.emit(Event::RunCompleted {
            run_id: ctx.run_id,
            artifacts,
        })
        .await;
    }
}

/// Per-run bookkeeping shared by the stage handlers.
struct RunCtx<'a> {
    run_id: Uuid,
    state: &'a Mutex<RunState>,
    events: &'a mpsc::Sender<Event>,
    artifacts: ArtifactStore,
}

impl RunCtx<'_> {
    /// Send one frame. `false` means the observer is gone and the run
    /// must stop without further frames.
    async fn emit(&self, event: Event) -> bool {
        self.events.send(event).await.is_ok()
    }

    async fn log(&self, stage_id: &str, text: String) -> bool {
        self.emit(Event::LogLine {
            run_id: self.run_id,
            stage_id: stage_id.to_string(),
            text,
        })
        .await
    }

    /// Capture an artifact and, if the store accepted it, mirror it into
    /// the run snapshot and the event stream.
    async fn capture(&mut self, key: &str, value: &str, owner: &str) -> bool {
        if !self.artifacts.capture(key, value, owner) {
            return true; // Conflicting write dropped; not a stream failure.
        }
        lock(self.state)
            .artifacts
            .insert(key.to_string(), value.to_string());
        self.emit(Event::ArtifactCaptured {
            run_id: self.run_id,
            key: key.to_string(),
            value: value.to_string(),
        })
        .await
    }

    /// Mark stage `index` Completed in state and on the stream.
    async fn complete_stage(&mut self, plan: &ProvisionPlan, index: usize) -> bool {
        let stage = &plan.stages[index];
        set_stage(self.state, index, StageStatus::Completed, &stage.message);
        if self
            .emit(Event::StageUpdate {
                run_id: self.run_id,
                stage_id: stage.id.clone(),
                status: StageStatus::Completed,
                message: stage.message.clone(),
            })
            .await
        {
            true
        } else {
            set_run_status(self.state, RunStatus::Failed);
            false
        }
    }

    /// Fail the run without a stage frame.
    ///
    /// For failures outside any Active stage: a stage that never started
    /// (preflight, cancel before activation) or a failure after the last
    /// stage already completed (record persistence). Stage frames stay a
    /// strict `Active -> Completed|Failed` sequence; only the terminal
    /// `RunError` is emitted.
    async fn abort(&mut self, stage_id: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(run_id = %self.run_id, stage_id, %message, "run failed");

        set_run_status(self.state, RunStatus::Failed);
        self.emit(Event::RunError {
            run_id: self.run_id,
            stage_id: stage_id.to_string(),
            message,
        })
        .await;
    }

    /// Fail the run at the currently Active stage `index`: state, stage
    /// frame, terminal frame.
    async fn fail(&mut self, index: usize, stage_id: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(run_id = %self.run_id, stage_id, %message, "run failed");

        set_stage(self.state, index, StageStatus::Failed, &message);
        set_run_status(self.state, RunStatus::Failed);

        if !self
            .emit(Event::StageUpdate {
                run_id: self.run_id,
                stage_id: stage_id.to_string(),
                status: StageStatus::Failed,
                message: message.clone(),
            })
            .await
        {
            return;
        }
        self.emit(Event::RunError {
            run_id: self.run_id,
            stage_id: stage_id.to_string(),
            message,
        })
        .await;
    }
}

fn lock(state: &Mutex<RunState>) -> std::sync::MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

fn set_stage(state: &Mutex<RunState>, index: usize, status: StageStatus, message: &str) {
    let mut guard = lock(state);
    if let Some(stage) = guard.stages.get_mut(index) {
        stage.status = status;
        stage.message = message.to_string();
    }
}

fn set_run_status(state: &Mutex<RunState>, status: RunStatus) {
    lock(state).status = status;
}
