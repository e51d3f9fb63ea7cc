use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::agents::{DistillPlan, TurnOutput, VerifyOutcome};
use crate::dag;
use crate::robustness::{
    detect_entropy, record_entropy, record_implementation_turn, reset_turn_budget, schedule_pivot,
};
use crate::state::{
    DocumentRecord, DocumentStatus, EpicStatus, Gate, ProjectStatus, RequirementStatus, RunState,
    TaskStatus,
};
use crate::tracker::WorkspaceReport;

/// Pipeline node identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Research,
    Design,
    ApproveDesign,
    Distill,
    ApproveTaskDag,
    Implement,
    Verify,
    Error,
    PivotAgent,
}

impl NodeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Design => "design",
            Self::ApproveDesign => "approve_design",
            Self::Distill => "distill",
            Self::ApproveTaskDag => "approve_task_dag",
            Self::Implement => "implement",
            Self::Verify => "verify",
            Self::Error => "error",
            Self::PivotAgent => "pivot_agent",
        }
    }

    /// The approval gate this node suspends at, if it is a gate node.
    pub fn gate(&self) -> Option<Gate> {
        match self {
            Self::ApproveDesign => Some(Gate::DesignApproval),
            Self::ApproveTaskDag => Some(Gate::DagApproval),
            _ => None,
        }
    }

    pub fn for_gate(gate: Gate) -> Self {
        match gate {
            Gate::DesignApproval => Self::ApproveDesign,
            Gate::DagApproval => Self::ApproveTaskDag,
        }
    }
}

impl FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "research" => Ok(Self::Research),
            "design" => Ok(Self::Design),
            "approve_design" => Ok(Self::ApproveDesign),
            "distill" => Ok(Self::Distill),
            "approve_task_dag" => Ok(Self::ApproveTaskDag),
            "implement" => Ok(Self::Implement),
            "verify" => Ok(Self::Verify),
            "error" => Ok(Self::Error),
            "pivot_agent" => Ok(Self::PivotAgent),
            _ => Err(format!("Invalid node: {}", s)),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Generation nodes ──────────────────────────────────────────────────

/// Supersede live documents of the same kind as any new document, then
/// append the new ones.
pub fn merge_documents(state: &mut RunState, new_docs: Vec<DocumentRecord>) {
    let mut documents = state.documents.clone();
    for doc in documents.iter_mut() {
        if doc.status != DocumentStatus::Superseded && new_docs.iter().any(|n| n.kind == doc.kind) {
            doc.status = DocumentStatus::Superseded;
        }
    }
    documents.extend(new_docs);
    state.documents = documents;
}

pub fn apply_research(state: &mut RunState, docs: Vec<DocumentRecord>) {
    merge_documents(state, docs);
    state.set_status(ProjectStatus::Researching);
}

pub fn apply_design(state: &mut RunState, docs: Vec<DocumentRecord>) {
    merge_documents(state, docs);
    state.set_status(ProjectStatus::Specifying);
}

/// Whether distill must ask for a fresh plan rather than advance the
/// existing one: there is no plan yet, or the task graph was just rejected.
pub fn needs_replan(state: &RunState) -> bool {
    if state.tasks.is_empty() {
        return true;
    }
    state
        .hitl_decisions
        .last()
        .is_some_and(|d| d.gate == Gate::DagApproval && !d.signal.approved)
}

/// Validate and install a new plan, replacing requirements, epics and tasks
/// wholesale. A rejected graph leaves the state untouched.
pub fn apply_plan(state: &mut RunState, plan: DistillPlan) -> Result<()> {
    dag::validate_task_graph(&plan.tasks)?;
    for task in &plan.tasks {
        if !plan.epics.iter().any(|e| e.id == task.epic_id) {
            bail!("Task {} references unknown epic {}", task.id, task.epic_id);
        }
    }

    info!(
        requirements = plan.requirements.len(),
        epics = plan.epics.len(),
        tasks = plan.tasks.len(),
        "Installing task plan"
    );
    state.requirements = plan.requirements;
    state.epics = plan.epics;
    state.tasks = plan.tasks;
    state.active_epic_id = None;
    state.active_task_id = None;
    reset_turn_budget(state);
    Ok(())
}

/// Complete every open epic whose tasks are all completed and mark the
/// requirements it covers as satisfied.
pub fn settle_epics(state: &mut RunState) {
    let mut satisfied = Vec::new();
    for epic in state.epics.iter_mut().filter(|e| !e.status.is_terminal()) {
        let all_done = state
            .tasks
            .iter()
            .filter(|t| t.epic_id == epic.id)
            .all(|t| t.status == TaskStatus::Completed);
        if all_done {
            debug!(epic = %epic.id, "Epic completed");
            epic.status = EpicStatus::Completed;
            satisfied.extend(epic.satisfied_requirement_ids.iter().cloned());
        }
    }
    for req in state.requirements.iter_mut() {
        if satisfied.contains(&req.id) {
            req.status = RequirementStatus::Satisfied;
        }
    }
    if let Some(active) = state.active_epic_id.as_deref()
        && state
            .epics
            .iter()
            .any(|e| e.id == active && e.status.is_terminal())
    {
        state.active_epic_id = None;
    }
}

/// Point the run at the next open epic, lowest phase number first.
pub fn activate_next_epic(state: &mut RunState) {
    settle_epics(state);
    if state.active_epic_id.is_some() {
        return;
    }
    let next = state
        .epics
        .iter()
        .filter(|e| !e.status.is_terminal())
        .min_by_key(|e| e.phase_number)
        .map(|e| e.id.clone());
    if let Some(id) = next {
        if let Some(epic) = state.epic_mut(&id) {
            epic.status = EpicStatus::Active;
        }
        for req in state.requirements.iter_mut() {
            if req.status == RequirementStatus::Pending
                && state
                    .epics
                    .iter()
                    .any(|e| e.id == id && e.satisfied_requirement_ids.contains(&req.id))
            {
                req.status = RequirementStatus::Active;
            }
        }
        info!(epic = %id, "Epic activated");
        state.active_epic_id = Some(id);
    }
}

// ── Implementation loop ───────────────────────────────────────────────

/// Outcome of picking work for the implement node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSelection {
    /// Continue the current task (retry or crash-resumed).
    Continue(String),
    /// A new task became active; the turn budget was reset.
    Started(String),
    /// Every epic is finished; nothing to implement.
    NothingLeft,
}

/// Keep a retried task, or activate the next pending task of the active
/// epic whose dependencies are complete.
pub fn select_task(state: &mut RunState) -> Result<TaskSelection> {
    if let Some(task) = state.active_task_mut()
        && matches!(task.status, TaskStatus::InProgress | TaskStatus::Failed)
    {
        task.status = TaskStatus::InProgress;
        return Ok(TaskSelection::Continue(task.id.clone()));
    }

    if state.active_epic_id.is_none() {
        activate_next_epic(state);
    }
    let Some(epic_id) = state.active_epic_id.clone() else {
        return Ok(TaskSelection::NothingLeft);
    };

    let next = state
        .tasks
        .iter()
        .filter(|t| t.epic_id == epic_id && t.status == TaskStatus::Pending)
        .find(|t| {
            t.depends_on.iter().all(|dep| {
                state
                    .tasks
                    .iter()
                    .find(|o| &o.id == dep)
                    .is_none_or(|o| o.status == TaskStatus::Completed)
            })
        })
        .map(|t| t.id.clone());

    let Some(task_id) = next else {
        bail!("No runnable task in epic {}", epic_id);
    };
    if let Some(task) = state.task_mut(&task_id) {
        task.status = TaskStatus::InProgress;
    }
    state.active_task_id = Some(task_id.clone());
    reset_turn_budget(state);
    info!(task = %task_id, epic = %epic_id, "Task started");
    Ok(TaskSelection::Started(task_id))
}

/// Record one successful implementation turn: buffer logs, hash the output
/// for loop detection and charge the turn budget. Either a detected loop or
/// an exhausted budget schedules the pivot.
pub fn apply_turn(state: &mut RunState, task_id: &str, output: TurnOutput) {
    state.pending_logs.extend(output.logs);
    let repeats = record_entropy(state, task_id, &output.content);
    state.set_status(ProjectStatus::Implementing);

    if detect_entropy(state, task_id) {
        warn!(task = %task_id, repeats, "Identical output repeated; forcing pivot");
        schedule_pivot(state);
    }
    if record_implementation_turn(state) {
        warn!(task = %task_id, turns = state.implementation_turns, "Turn budget exhausted");
    }
}

/// Apply the verifier's verdict and, on a pass, the workspace check and
/// commit hash. `workspace` is `None` when no guard is configured.
pub fn apply_verification(
    state: &mut RunState,
    task_id: &str,
    verdict: &VerifyOutcome,
    workspace: Option<(&WorkspaceReport, Option<String>)>,
) {
    if !verdict.passed {
        info!(task = %task_id, notes = ?verdict.notes, "Verification failed");
        if let Some(task) = state.task_mut(task_id) {
            task.status = TaskStatus::Failed;
        }
        return;
    }

    let mut commit_hash = None;
    if let Some((report, hash)) = workspace {
        if !report.passed {
            warn!(task = %task_id, violations = ?report.violations, "Workspace verification failed");
            state.set_status(ProjectStatus::SecurityPause);
            return;
        }
        commit_hash = hash;
    }

    if let Some(task) = state.task_mut(task_id) {
        task.status = TaskStatus::Completed;
        task.git_commit_hash = commit_hash;
    }
    settle_epics(state);
    state.set_status(ProjectStatus::Implementing);
}
