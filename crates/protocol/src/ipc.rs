//! Trigger and progress-stream protocol.
//!
//! This module defines the message types exchanged between a remote
//! observer (web client) and the orchestrator core.
//!
//! The protocol follows an Operation/Event pattern:
//! - `Op`: commands sent from the observer to the core
//! - `Event`: ordered progress frames sent from the core to the observer
//!
//! The event channel is one-directional and ordered. For one run it carries
//! exactly one terminal frame (`RunCompleted` or `RunError`), after which
//! the channel is closed. No replay is offered across reconnects; a
//! disconnected observer cancels its run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;
use uuid::Uuid;

use crate::run_models::DeploymentParameters;
use crate::stage_models::StageStatus;

/// Operations sent from the observer to the core.
///
/// Uses tagged enum serialization for TypeScript compatibility:
/// ```json
/// {
///   "type": "startRun",
///   "payload": { "parameters": { "targetName": "refresh", ... } }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Op {
    /// Trigger a new deployment run.
    ///
    /// Rejected synchronously with a `RunError` frame if a required
    /// parameter is missing; nothing is spawned in that case.
    StartRun { parameters: DeploymentParameters },

    /// Cancel a running deployment.
    ///
    /// Cancellation is cooperative: the child process receives a graceful
    /// termination signal and partially-created resources are left for the
    /// next run's reconciler to discover.
    CancelRun {
        #[ts(type = "string")]
        run_id: Uuid,
    },

    /// Request the current snapshot of a run.
    GetRunState {
        #[ts(type = "string")]
        run_id: Uuid,
    },

    /// Locate a previously built app package for a target.
    FindPackage { target_name: String },

    /// Shut down the orchestrator, cancelling all active runs.
    Shutdown,
}

/// Progress frames sent from the core to the observer.
///
/// Ordering invariant: within one run, for a given stage id,
/// `StageUpdate(ACTIVE)` precedes every `LogLine` for that stage, which
/// precede `StageUpdate(COMPLETED|FAILED)`. When one stage completes and
/// the next activates, the `COMPLETED` frame is emitted first, so an
/// observer never sees two stages Active at once.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Event {
    /// A new deployment run has been accepted.
    RunStarted {
        #[ts(type = "string")]
        run_id: Uuid,
        target_name: String,
    },

    /// A stage changed status.
    StageUpdate {
        #[ts(type = "string")]
        run_id: Uuid,
        stage_id: String,
        status: StageStatus,
        message: String,
    },

    /// One raw output line from the active stage's child process.
    ///
    /// Every line is forwarded regardless of classification; lines that
    /// match no known pattern are still delivered as plain text.
    LogLine {
        #[ts(type = "string")]
        run_id: Uuid,
        stage_id: String,
        text: String,
    },

    /// A named artifact value was captured from stage output.
    ArtifactCaptured {
        #[ts(type = "string")]
        run_id: Uuid,
        key: String,
        value: String,
    },

    /// Terminal frame: the run failed at the given stage.
    RunError {
        #[ts(type = "string")]
        run_id: Uuid,
        stage_id: String,
        message: String,
    },

    /// Terminal frame: every stage completed. Carries the aggregated
    /// artifact map (endpoint URL, resource group, client id, tenant id,
    /// package path).
    RunCompleted {
        #[ts(type = "string")]
        run_id: Uuid,
        artifacts: BTreeMap<String, String>,
    },
}

impl Event {
    /// True for the frames that terminate a run's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::RunCompleted { .. } | Event::RunError { .. })
    }
}
