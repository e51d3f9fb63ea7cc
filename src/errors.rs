//! Typed error hierarchy for the pipewright engine.
//!
//! One enum per subsystem:
//! - `DagError` - rejected task graphs (never persisted, never retried)
//! - `CheckpointError` - checkpoint store failures
//! - `RecoveryError` - recovery queries and relational rollback
//! - `EngineError` - failures that escape a run and reach the caller

use thiserror::Error;

use crate::dag::PhaseViolation;
use crate::state::Gate;

/// A generated task graph that must not reach storage.
#[derive(Debug, Error)]
pub enum DagError {
    #[error("Dependency cycle detected: {}", cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    #[error("{} phase-order violation(s): {}", violations.len(), join_violations(violations))]
    PhaseViolations { violations: Vec<PhaseViolation> },
}

fn join_violations(violations: &[PhaseViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl DagError {
    /// Taxonomy tag used in error records and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cycle { .. } => "dag_cycle",
            Self::PhaseViolations { .. } => "phase_violation",
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to (de)serialize checkpoint payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checkpoint store lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("Snapshot {checkpoint_id} not found for project {project_id}")]
    SnapshotNotFound {
        project_id: i64,
        checkpoint_id: String,
    },

    #[error("Recovery database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("Recovery store lock poisoned")]
    LockPoisoned,
}

/// Errors surfaced to whoever drives the engine. Node failures never show up
/// here; they are routed to the error node instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Checkpoint write failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("No checkpoint exists for thread {thread_id}")]
    NoCheckpoint { thread_id: String },

    #[error("Thread {thread_id} is not suspended at an approval gate")]
    NotSuspended { thread_id: String },

    #[error("Thread {thread_id} is suspended at gate {gate}; resume it instead")]
    AwaitingApproval { thread_id: String, gate: Gate },

    #[error("Thread {thread_id} already has checkpoints; use continue_run or resume")]
    ThreadExists { thread_id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
