use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::graph::NodeId;
use crate::state::{EntropyRecord, ProjectStatus, RunState};

/// Implementation attempts allowed for one task before a forced pivot.
pub const MAX_IMPLEMENTATION_TURNS: u32 = 10;

/// Identical consecutive errors for one task that trigger a pivot.
pub const CONSECUTIVE_ERROR_PIVOT_THRESHOLD: u32 = 3;

/// Identical consecutive outputs for one task that count as a stuck loop.
pub const ENTROPY_LOOP_THRESHOLD: u32 = 3;

/// Count one successful implementation attempt and check the budget.
///
/// Returns `true` when the budget is exhausted and the pivot was scheduled.
pub fn record_implementation_turn(state: &mut RunState) -> bool {
    state.implementation_turns += 1;
    check_turn_budget(state)
}

/// Flag `strategy_pivot` and schedule the pivot node once the budget is spent.
pub fn check_turn_budget(state: &mut RunState) -> bool {
    if state.implementation_turns >= MAX_IMPLEMENTATION_TURNS {
        schedule_pivot(state);
        true
    } else {
        false
    }
}

pub fn reset_turn_budget(state: &mut RunState) {
    state.implementation_turns = 0;
}

pub(crate) fn schedule_pivot(state: &mut RunState) {
    state.set_status(ProjectStatus::StrategyPivot);
    state.pending_recovery = Some(NodeId::PivotAgent);
}

/// Lowercase hex SHA-256 of an agent output.
pub fn hash_output(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Record the hash of one implementation output for `task_id`.
///
/// One record is kept per task. A matching hash bumps its repeat count; a new
/// hash starts the count again at 1. Returns the current repeat count.
pub fn record_entropy(state: &mut RunState, task_id: &str, content: &str) -> u32 {
    let output_hash = hash_output(content);
    match state.entropy.iter_mut().rev().find(|r| r.task_id == task_id) {
        Some(record) if record.output_hash == output_hash => {
            record.repeat_count += 1;
            record.repeat_count
        }
        Some(record) => {
            *record = EntropyRecord {
                output_hash,
                first_seen_at: Utc::now(),
                task_id: task_id.to_string(),
                repeat_count: 1,
            };
            1
        }
        None => {
            state.entropy.push(EntropyRecord {
                output_hash,
                first_seen_at: Utc::now(),
                task_id: task_id.to_string(),
                repeat_count: 1,
            });
            1
        }
    }
}

/// True when the latest output for `task_id` has repeated enough to call it a loop.
pub fn detect_entropy(state: &RunState, task_id: &str) -> bool {
    state
        .entropy
        .iter()
        .rev()
        .find(|r| r.task_id == task_id)
        .is_some_and(|r| r.repeat_count >= ENTROPY_LOOP_THRESHOLD)
}
