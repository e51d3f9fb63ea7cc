use super::nodes::NodeId;
use crate::robustness::route_after_error;
use crate::state::{Gate, ProjectStatus, RunState, TaskStatus};

/// What the dispatcher does after a node step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Goto(NodeId),
    /// Stop at a gate until a resume signal arrives.
    Suspend(Gate),
    /// Stop without finishing; continuing re-enters `resume_at`.
    Halt { resume_at: NodeId },
    End,
}

/// Routing table: the edge taken out of `node` given the state it produced.
pub fn route(node: NodeId, state: &RunState) -> Transition {
    match node {
        NodeId::Research => Transition::Goto(NodeId::Design),
        NodeId::Design => Transition::Goto(NodeId::ApproveDesign),
        NodeId::ApproveDesign => Transition::Suspend(Gate::DesignApproval),
        NodeId::Distill => Transition::Goto(NodeId::ApproveTaskDag),
        NodeId::ApproveTaskDag => Transition::Suspend(Gate::DagApproval),
        NodeId::Implement => route_after_implement(state),
        NodeId::Verify => route_after_verify(state),
        NodeId::Error => Transition::Goto(route_after_error(state)),
        NodeId::PivotAgent => Transition::End,
    }
}

pub fn route_after_implement(state: &RunState) -> Transition {
    if state.pending_recovery == Some(NodeId::PivotAgent) {
        Transition::Goto(NodeId::PivotAgent)
    } else {
        Transition::Goto(NodeId::Verify)
    }
}

/// A failed active task is retried first; then any unfinished epic sends
/// the run back to distill for its next unit of work; otherwise the run is
/// done. A workspace violation halts before any of that.
pub fn route_after_verify(state: &RunState) -> Transition {
    if state.status == ProjectStatus::SecurityPause {
        return Transition::Halt {
            resume_at: NodeId::Verify,
        };
    }
    if state
        .active_task()
        .is_some_and(|t| t.status == TaskStatus::Failed)
    {
        return Transition::Goto(NodeId::Implement);
    }
    if state.epics.iter().any(|e| !e.status.is_terminal()) {
        return Transition::Goto(NodeId::Distill);
    }
    Transition::End
}
