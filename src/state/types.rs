use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::*;
use crate::graph::NodeId;

/// Project metadata carried through every transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    pub project_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectConfig {
    pub fn new(project_id: i64, name: &str) -> Self {
        let now = Utc::now();
        Self {
            project_id,
            name: name.to_string(),
            description: String::new(),
            status: ProjectStatus::Initializing,
            created_at: now,
            updated_at: now,
        }
    }

    /// Thread identifier under which the run's checkpoints are stored.
    pub fn thread_id(&self) -> String {
        self.project_id.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub id: String,
    /// Free-form document kind, e.g. `research`, `prd`, `architecture`.
    pub kind: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub status: DocumentStatus,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequirementRecord {
    pub id: String,
    /// Reference into the source document, e.g. `REQ-001`.
    pub external_ref: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub status: RequirementStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpicRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: EpicStatus,
    pub phase_number: u32,
    #[serde(default)]
    pub satisfied_requirement_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    pub epic_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_role: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub phase: RefinementPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit_hash: Option<String>,
}

impl TaskRecord {
    pub fn new(id: &str, epic_id: &str) -> Self {
        Self {
            id: id.to_string(),
            epic_id: epic_id.to_string(),
            name: id.to_string(),
            description: String::new(),
            status: TaskStatus::Pending,
            assigned_role: String::new(),
            depends_on: Vec::new(),
            phase: RefinementPhase::default(),
            git_commit_hash: None,
        }
    }
}

/// One captured execution failure. Message and stack are stored masked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    pub id: String,
    pub captured_at: DateTime<Utc>,
    pub source_node: NodeId,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub classification: ErrorClass,
    pub consecutive_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntropyRecord {
    pub output_hash: String,
    pub first_seen_at: DateTime<Utc>,
    pub task_id: String,
    pub repeat_count: u32,
}

/// Externally supplied decision for a suspended approval gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResumeSignal {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    pub approved_at: DateTime<Utc>,
}

impl ResumeSignal {
    pub fn approve() -> Self {
        Self {
            approved: true,
            feedback: None,
            approved_by: None,
            approved_at: Utc::now(),
        }
    }

    pub fn reject(feedback: &str) -> Self {
        Self {
            approved: false,
            feedback: Some(feedback.to_string()),
            approved_by: None,
            approved_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HitlDecisionRecord {
    pub gate: Gate,
    pub signal: ResumeSignal,
    pub decided_at: DateTime<Utc>,
}

/// One agent turn awaiting persistence into the business log table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentLogRecord {
    pub id: String,
    pub task_id: String,
    pub turn_index: u32,
    pub agent_role: String,
    #[serde(default)]
    pub thought: String,
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
}

/// The complete snapshot threaded through every node and persisted in each
/// checkpoint. Holds plain data only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    pub project: ProjectConfig,
    #[serde(default)]
    pub documents: Vec<DocumentRecord>,
    #[serde(default)]
    pub requirements: Vec<RequirementRecord>,
    #[serde(default)]
    pub epics: Vec<EpicRecord>,
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
    #[serde(default)]
    pub pending_logs: Vec<AgentLogRecord>,
    #[serde(default)]
    pub entropy: Vec<EntropyRecord>,
    #[serde(default)]
    pub error_history: Vec<ErrorRecord>,
    #[serde(default)]
    pub active_epic_id: Option<String>,
    #[serde(default)]
    pub active_task_id: Option<String>,
    pub status: ProjectStatus,
    #[serde(default)]
    pub hitl_decisions: Vec<HitlDecisionRecord>,
    #[serde(default)]
    pub pending_gate: Option<Gate>,
    #[serde(default)]
    pub implementation_turns: u32,
    #[serde(default)]
    pub pending_recovery: Option<NodeId>,
}

impl RunState {
    pub fn new(project: ProjectConfig) -> Self {
        let status = project.status;
        Self {
            project,
            documents: Vec::new(),
            requirements: Vec::new(),
            epics: Vec::new(),
            tasks: Vec::new(),
            pending_logs: Vec::new(),
            entropy: Vec::new(),
            error_history: Vec::new(),
            active_epic_id: None,
            active_task_id: None,
            status,
            hitl_decisions: Vec::new(),
            pending_gate: None,
            implementation_turns: 0,
            pending_recovery: None,
        }
    }

    /// Set the run status, mirroring it into the project metadata.
    pub fn set_status(&mut self, status: ProjectStatus) {
        self.status = status;
        self.project.status = status;
        self.project.updated_at = Utc::now();
    }

    pub fn active_task(&self) -> Option<&TaskRecord> {
        let id = self.active_task_id.as_deref()?;
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn active_task_mut(&mut self) -> Option<&mut TaskRecord> {
        let id = self.active_task_id.clone()?;
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut TaskRecord> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn epic_mut(&mut self, id: &str) -> Option<&mut EpicRecord> {
        self.epics.iter_mut().find(|e| e.id == id)
    }
}
