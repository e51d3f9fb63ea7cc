use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Pipeline-level status surfaced to operators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Initializing,
    Researching,
    Specifying,
    Planning,
    Implementing,
    Completed,
    Failed,
    PausedForApproval,
    Error,
    StrategyPivot,
    SecurityPause,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Researching => "researching",
            Self::Specifying => "specifying",
            Self::Planning => "planning",
            Self::Implementing => "implementing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::PausedForApproval => "paused_for_approval",
            Self::Error => "error",
            Self::StrategyPivot => "strategy_pivot",
            Self::SecurityPause => "security_pause",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(Self::Initializing),
            "researching" => Ok(Self::Researching),
            "specifying" => Ok(Self::Specifying),
            "planning" => Ok(Self::Planning),
            "implementing" => Ok(Self::Implementing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "paused_for_approval" => Ok(Self::PausedForApproval),
            "error" => Ok(Self::Error),
            "strategy_pivot" => Ok(Self::StrategyPivot),
            "security_pause" => Ok(Self::SecurityPause),
            _ => Err(format!("Invalid project status: {}", s)),
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
    /// Set only by recovery auditing on business rows left `in_progress`.
    Resumed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Resumed => "resumed",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "blocked" => Ok(Self::Blocked),
            "resumed" => Ok(Self::Resumed),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EpicStatus {
    #[default]
    Pending,
    Active,
    Completed,
    Failed,
}

impl EpicStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and failed epics no longer need work scheduled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for EpicStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid epic status: {}", s)),
        }
    }
}

impl fmt::Display for EpicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequirementStatus {
    #[default]
    Pending,
    Active,
    Satisfied,
    Blocked,
}

impl RequirementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Satisfied => "satisfied",
            Self::Blocked => "blocked",
        }
    }
}

impl FromStr for RequirementStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "satisfied" => Ok(Self::Satisfied),
            "blocked" => Ok(Self::Blocked),
            _ => Err(format!("Invalid requirement status: {}", s)),
        }
    }
}

impl fmt::Display for RequirementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Draft,
    Approved,
    Superseded,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Approved => "approved",
            Self::Superseded => "superseded",
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "approved" => Ok(Self::Approved),
            "superseded" => Ok(Self::Superseded),
            _ => Err(format!("Invalid document status: {}", s)),
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution error classification used for retry decisions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Logic,
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Logic => "logic",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for ErrorClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(Self::Transient),
            "logic" => Ok(Self::Logic),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid error class: {}", s)),
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Refinement phase of a task. Dependencies may only point at the same or an
/// earlier phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefinementPhase {
    Expansion,
    Compression,
    Decomposition,
    #[default]
    Execution,
    Verification,
}

impl RefinementPhase {
    pub const ORDER: [RefinementPhase; 5] = [
        Self::Expansion,
        Self::Compression,
        Self::Decomposition,
        Self::Execution,
        Self::Verification,
    ];

    /// Position in the canonical phase order.
    pub fn index(&self) -> usize {
        match self {
            Self::Expansion => 0,
            Self::Compression => 1,
            Self::Decomposition => 2,
            Self::Execution => 3,
            Self::Verification => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expansion => "expansion",
            Self::Compression => "compression",
            Self::Decomposition => "decomposition",
            Self::Execution => "execution",
            Self::Verification => "verification",
        }
    }
}

impl FromStr for RefinementPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expansion" => Ok(Self::Expansion),
            "compression" => Ok(Self::Compression),
            "decomposition" => Ok(Self::Decomposition),
            "execution" => Ok(Self::Execution),
            "verification" => Ok(Self::Verification),
            _ => Err(format!("Invalid refinement phase: {}", s)),
        }
    }
}

impl fmt::Display for RefinementPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-approval suspension points in the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    DesignApproval,
    DagApproval,
}

impl Gate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DesignApproval => "design_approval",
            Self::DagApproval => "dag_approval",
        }
    }
}

impl FromStr for Gate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "design_approval" => Ok(Self::DesignApproval),
            "dag_approval" => Ok(Self::DagApproval),
            _ => Err(format!("Invalid gate: {}", s)),
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
