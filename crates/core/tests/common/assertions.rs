//! Event-sequence assertions shared across the integration tests.

use pv_protocol::{Event, StageStatus};

/// Exactly one terminal frame, and it is the last frame.
pub fn assert_single_terminal(events: &[Event]) {
    let terminal_count = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminal_count, 1, "expected exactly one terminal frame");
    assert!(
        events.last().is_some_and(Event::is_terminal),
        "terminal frame must be last, got: {:?}",
        events.last()
    );
}

/// The stage frames form a strict sequence: at most one stage Active at a
/// time, each Completed/Failed frame matching the stage that was Active.
pub fn assert_stage_sequence(events: &[Event]) {
    let mut active: Option<&str> = None;
    for event in events {
        let Event::StageUpdate {
            stage_id, status, ..
        } = event
        else {
            continue;
        };
        match status {
            StageStatus::Active => {
                assert!(
                    active.is_none(),
                    "stage '{stage_id}' activated while '{}' still active",
                    active.unwrap_or_default()
                );
                active = Some(stage_id);
            }
            StageStatus::Completed | StageStatus::Failed => {
                assert_eq!(
                    active,
                    Some(stage_id.as_str()),
                    "stage '{stage_id}' finished while not active"
                );
                active = None;
            }
            StageStatus::Pending => panic!("stream never carries PENDING"),
        }
    }
}

/// Ids of stages that reached Completed, in stream order.
pub fn completed_stage_ids(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::StageUpdate {
                stage_id,
                status: StageStatus::Completed,
                ..
            } => Some(stage_id.clone()),
            _ => None,
        })
        .collect()
}

/// The captured value for an artifact key, if any frame carried it.
pub fn captured_artifact(events: &[Event], wanted: &str) -> Option<String> {
    events.iter().find_map(|e| match e {
        Event::ArtifactCaptured { key, value, .. } if key == wanted => Some(value.clone()),
        _ => None,
    })
}

/// Index of the first frame matching `predicate`.
pub fn position(events: &[Event], predicate: impl Fn(&Event) -> bool) -> Option<usize> {
    events.iter().position(predicate)
}
