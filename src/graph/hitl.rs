use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::nodes::NodeId;
use crate::state::{
    DocumentStatus, Gate, HitlDecisionRecord, ProjectStatus, ResumeSignal, RunState,
};

/// Returned to the caller when a run suspends at an approval gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptPayload {
    pub gate: Gate,
    pub message: String,
    pub status: ProjectStatus,
}

impl InterruptPayload {
    pub fn for_gate(gate: Gate) -> Self {
        let message = match gate {
            Gate::DesignApproval => {
                "Review the design documents and approve to continue to task planning."
            }
            Gate::DagApproval => {
                "Review the generated task graph and approve to start implementation."
            }
        };
        Self {
            gate,
            message: message.to_string(),
            status: ProjectStatus::PausedForApproval,
        }
    }
}

/// Gate node transition: mark the run paused at `gate`.
pub fn enter_gate(state: &mut RunState, gate: Gate) -> InterruptPayload {
    state.pending_gate = Some(gate);
    state.set_status(ProjectStatus::PausedForApproval);
    info!(gate = %gate, "Suspended for approval");
    InterruptPayload::for_gate(gate)
}

/// Record the human decision for the pending gate and move the status on.
/// Approving the design also approves its draft documents.
pub fn apply_resume(state: &mut RunState, gate: Gate, signal: ResumeSignal) {
    let approved = signal.approved;
    state.hitl_decisions.push(HitlDecisionRecord {
        gate,
        signal,
        decided_at: Utc::now(),
    });
    state.pending_gate = None;

    let status = match (gate, approved) {
        (Gate::DesignApproval, true) => {
            for doc in state.documents.iter_mut() {
                if doc.status == DocumentStatus::Draft {
                    doc.status = DocumentStatus::Approved;
                }
            }
            ProjectStatus::Planning
        }
        (Gate::DesignApproval, false) => ProjectStatus::Specifying,
        (Gate::DagApproval, true) => ProjectStatus::Implementing,
        (Gate::DagApproval, false) => ProjectStatus::Planning,
    };
    info!(gate = %gate, approved, status = %status, "Gate decision applied");
    state.set_status(status);
}

/// Most recent decision recorded for `gate`.
pub fn last_decision(state: &RunState, gate: Gate) -> Option<&HitlDecisionRecord> {
    state.hitl_decisions.iter().rev().find(|d| d.gate == gate)
}

/// Where a gate leads once resumed. With no decision on record the gate
/// takes its rejecting branch.
pub fn route_after_gate(state: &RunState, gate: Gate) -> NodeId {
    let approved = last_decision(state, gate).is_some_and(|d| d.signal.approved);
    match (gate, approved) {
        (Gate::DesignApproval, true) => NodeId::Distill,
        (Gate::DesignApproval, false) => NodeId::Design,
        (Gate::DagApproval, true) => NodeId::Implement,
        (Gate::DagApproval, false) => NodeId::Distill,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DocumentRecord, ProjectConfig};

    fn state() -> RunState {
        RunState::new(ProjectConfig::new(1, "hitl"))
    }

    #[test]
    fn test_enter_gate_pauses() {
        let mut state = state();
        let payload = enter_gate(&mut state, Gate::DesignApproval);
        assert_eq!(payload.gate, Gate::DesignApproval);
        assert_eq!(payload.status, ProjectStatus::PausedForApproval);
        assert_eq!(state.pending_gate, Some(Gate::DesignApproval));
        assert_eq!(state.status, ProjectStatus::PausedForApproval);
    }

    #[test]
    fn test_payload_serializes_status_string() {
        let json = serde_json::to_value(InterruptPayload::for_gate(Gate::DagApproval)).unwrap();
        assert_eq!(json["status"], "paused_for_approval");
        assert_eq!(json["gate"], "dag_approval");
    }

    #[test]
    fn test_design_approval_routes_to_distill() {
        let mut state = state();
        state.documents.push(DocumentRecord {
            id: "prd".into(),
            kind: "prd".into(),
            title: "PRD".into(),
            content: String::new(),
            status: DocumentStatus::Draft,
            version: 1,
        });
        enter_gate(&mut state, Gate::DesignApproval);
        apply_resume(&mut state, Gate::DesignApproval, ResumeSignal::approve());

        assert_eq!(state.status, ProjectStatus::Planning);
        assert!(state.pending_gate.is_none());
        assert_eq!(state.documents[0].status, DocumentStatus::Approved);
        assert_eq!(route_after_gate(&state, Gate::DesignApproval), NodeId::Distill);
    }

    #[test]
    fn test_design_rejection_routes_back_to_design() {
        let mut state = state();
        apply_resume(&mut state, Gate::DesignApproval, ResumeSignal::reject("more detail"));
        assert_eq!(state.status, ProjectStatus::Specifying);
        assert_eq!(route_after_gate(&state, Gate::DesignApproval), NodeId::Design);
    }

    #[test]
    fn test_dag_gate_routes() {
        let mut state = state();
        apply_resume(&mut state, Gate::DagApproval, ResumeSignal::approve());
        assert_eq!(state.status, ProjectStatus::Implementing);
        assert_eq!(route_after_gate(&state, Gate::DagApproval), NodeId::Implement);

        apply_resume(&mut state, Gate::DagApproval, ResumeSignal::reject("too coarse"));
        assert_eq!(state.status, ProjectStatus::Planning);
        assert_eq!(route_after_gate(&state, Gate::DagApproval), NodeId::Distill);
    }

    #[test]
    fn test_missing_decision_takes_rejecting_route() {
        let mut state = state();
        assert_eq!(route_after_gate(&state, Gate::DesignApproval), NodeId::Design);
        assert_eq!(route_after_gate(&state, Gate::DagApproval), NodeId::Distill);

        // a decision for the other gate does not count
        apply_resume(&mut state, Gate::DesignApproval, ResumeSignal::approve());
        assert_eq!(route_after_gate(&state, Gate::DagApproval), NodeId::Distill);
    }
}
