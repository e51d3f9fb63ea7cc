use anyhow::Result;
use async_trait::async_trait;

use crate::state::{
    AgentLogRecord, DocumentRecord, EpicRecord, RequirementRecord, RunState, TaskRecord,
};

/// A complete plan produced by the distill step. Installed wholesale once
/// the task graph passes validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistillPlan {
    pub requirements: Vec<RequirementRecord>,
    pub epics: Vec<EpicRecord>,
    pub tasks: Vec<TaskRecord>,
}

/// Result of one implementation turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutput {
    /// Raw agent output; hashed for loop detection.
    pub content: String,
    /// Think/act/observe entries to flush into the agent log.
    pub logs: Vec<AgentLogRecord>,
}

impl TurnOutput {
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            logs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub passed: bool,
    pub notes: Option<String>,
}

impl VerifyOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            notes: None,
        }
    }

    pub fn fail(notes: &str) -> Self {
        Self {
            passed: false,
            notes: Some(notes.to_string()),
        }
    }
}

/// The content-producing collaborators behind each working node.
///
/// Implementations talk to models or tools; the engine only sees their
/// results. Any `Err` is routed to the error node.
#[async_trait]
pub trait PipelineAgents: Send + Sync {
    async fn research(&self, state: &RunState) -> Result<Vec<DocumentRecord>>;

    /// Produce design documents. Prior rejection feedback is available in
    /// `state.hitl_decisions`.
    async fn design(&self, state: &RunState) -> Result<Vec<DocumentRecord>>;

    async fn distill(&self, state: &RunState) -> Result<DistillPlan>;

    async fn implement(&self, state: &RunState, task: &TaskRecord) -> Result<TurnOutput>;

    async fn verify(&self, state: &RunState, task: &TaskRecord) -> Result<VerifyOutcome>;
}
