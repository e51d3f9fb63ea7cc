//! Serializable run state and the entity records it carries.
//!
//! Nothing in here has behavior beyond lookups: nodes receive a `RunState`,
//! produce a new one, and the engine hands it to the checkpoint store whole.

pub mod status;
pub mod types;

pub use status::{
    DocumentStatus, EpicStatus, ErrorClass, Gate, ProjectStatus, RefinementPhase,
    RequirementStatus, TaskStatus,
};
pub use types::{
    AgentLogRecord, DocumentRecord, EntropyRecord, EpicRecord, ErrorRecord, HitlDecisionRecord,
    ProjectConfig, RequirementRecord, ResumeSignal, RunState, TaskRecord,
};
