//! Stage state models for the provisioning pipeline.
//!
//! A deployment run is an ordered list of stages. These types describe the
//! wire-visible state of one stage; the stage actions themselves (which
//! command to run, which resources to reconcile) live in `pv-core`.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Lifecycle status of a single pipeline stage.
///
/// Stages progress Pending -> Active -> Completed during a normal run.
/// A Failed stage terminates the run; stages after it stay Pending forever.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    /// Stage has not started yet.
    Pending,

    /// Stage is currently executing. At most one stage per run is Active.
    Active,

    /// Stage finished successfully.
    Completed,

    /// Stage failed; no later stage will be started.
    Failed,
}

/// Wire-visible state of one pipeline stage.
///
/// `id` is a stable symbolic name ("identity", "infrastructure", ...);
/// `ordinal` is the 1-based position in the pipeline. Status is mutated
/// only by the sequencer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct StageState {
    /// Stable symbolic stage name, unique within a run.
    pub id: String,

    /// 1-based position of the stage in the pipeline.
    pub ordinal: usize,

    /// Current lifecycle status.
    pub status: StageStatus,

    /// Human-readable description shown to the observer.
    pub message: String,
}

impl StageState {
    /// Create a new Pending stage.
    pub fn new(id: impl Into<String>, ordinal: usize, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ordinal,
            status: StageStatus::Pending,
            message: message.into(),
        }
    }
}
