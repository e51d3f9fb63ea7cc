use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::budget::{CONSECUTIVE_ERROR_PIVOT_THRESHOLD, reset_turn_budget};
use super::classify::classify_error;
use super::masking::SecretMasker;
use crate::graph::NodeId;
use crate::state::{ErrorRecord, ProjectStatus, RunState, TaskStatus};

/// An unhandled condition raised by a node, before it becomes an [`ErrorRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub source_node: NodeId,
    pub message: String,
    /// Error chain or backtrace text, stored as the record's stack.
    pub detail: Option<String>,
}

impl NodeFailure {
    pub fn new(source_node: NodeId, message: impl Into<String>) -> Self {
        Self {
            source_node,
            message: message.into(),
            detail: None,
        }
    }

    pub fn from_error(source_node: NodeId, err: &anyhow::Error) -> Self {
        Self {
            source_node,
            message: err.to_string(),
            detail: Some(format!("{:?}", err)),
        }
    }
}

/// A task left `in_progress` by a run that died mid-task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleTask {
    pub task_id: String,
    pub name: String,
    pub status: TaskStatus,
    pub epic_id: String,
}

/// 1 for the new error, plus each immediately preceding history entry with
/// the same task and masked message.
pub fn count_consecutive_errors(
    history: &[ErrorRecord],
    masked_message: &str,
    task_id: Option<&str>,
) -> u32 {
    let repeats = history
        .iter()
        .rev()
        .take_while(|e| e.task_id.as_deref() == task_id && e.message == masked_message)
        .count();
    1 + repeats as u32
}

pub fn build_error_record(
    failure: &NodeFailure,
    masker: &dyn SecretMasker,
    history: &[ErrorRecord],
    task_id: Option<&str>,
) -> ErrorRecord {
    let message = masker.mask(&failure.message).masked;
    let stack = failure.detail.as_deref().map(|d| masker.mask(d).masked);
    let consecutive_count = count_consecutive_errors(history, &message, task_id);
    let now = Utc::now();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    ErrorRecord {
        id: format!("err-{}-{}", now.timestamp_millis(), &suffix[..8]),
        captured_at: now,
        source_node: failure.source_node,
        classification: classify_error(&message),
        message,
        stack,
        consecutive_count,
        task_id: task_id.map(str::to_string),
    }
}

/// Error node transition: record the failure, fail the in-progress active task and set
/// status `error`. The only place error records are created.
pub fn handle_error(state: &mut RunState, failure: &NodeFailure, masker: &dyn SecretMasker) {
    let task_id = state.active_task_id.clone();
    let record = build_error_record(failure, masker, &state.error_history, task_id.as_deref());
    warn!(
        node = %record.source_node,
        class = record.classification.as_str(),
        consecutive = record.consecutive_count,
        task = ?record.task_id,
        "Node failed: {}",
        record.message
    );
    state.error_history.push(record);

    if let Some(task) = state.active_task_mut()
        && task.status == TaskStatus::InProgress
    {
        task.status = TaskStatus::Failed;
    }
    state.set_status(ProjectStatus::Error);
    state.pending_recovery = None;
}

/// Pivot after three identical consecutive errors, otherwise retry.
pub fn route_after_error(state: &RunState) -> NodeId {
    match state.error_history.last() {
        Some(last) if last.consecutive_count >= CONSECUTIVE_ERROR_PIVOT_THRESHOLD => {
            NodeId::PivotAgent
        }
        Some(last) => retry_target(last.source_node),
        None => NodeId::Implement,
    }
}

/// Node re-entered when retrying a failure raised by `source`.
pub fn retry_target(source: NodeId) -> NodeId {
    match source {
        NodeId::Research => NodeId::Research,
        NodeId::Design | NodeId::ApproveDesign => NodeId::Design,
        NodeId::Distill | NodeId::ApproveTaskDag => NodeId::Distill,
        NodeId::Implement | NodeId::Verify | NodeId::Error | NodeId::PivotAgent => {
            NodeId::Implement
        }
    }
}

/// Pivot node transition. Alternative-strategy generation belongs to the caller.
pub fn apply_pivot(state: &mut RunState) {
    info!(
        task = ?state.active_task_id,
        turns = state.implementation_turns,
        "Strategy pivot"
    );
    reset_turn_budget(state);
    state.set_status(ProjectStatus::StrategyPivot);
    state.pending_recovery = None;
}

/// Tasks stuck `in_progress`, which only a crashed run leaves behind.
pub fn find_stale_or_dirty_states(state: &RunState) -> Vec<StaleTask> {
    state
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::InProgress)
        .map(|t| StaleTask {
            task_id: t.id.clone(),
            name: t.name.clone(),
            status: t.status,
            epic_id: t.epic_id.clone(),
        })
        .collect()
}
