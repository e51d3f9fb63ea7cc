//! Task dependency graph validation.
//!
//! A generated task list must pass two checks before any of it reaches the
//! run state or storage:
//!
//! 1. **Acyclicity** - dependent → dependency edges form a DAG
//!    ([`detect_cycles`], [`validate`]).
//! 2. **Phase order** - no task depends on a task in a later refinement
//!    phase ([`check_phase_order`], [`validate_phase_order`]).
//!
//! ## Example
//!
//! ```
//! use pipewright::dag;
//! use pipewright::state::TaskRecord;
//!
//! let mut a = TaskRecord::new("a", "epic-1");
//! let mut b = TaskRecord::new("b", "epic-1");
//! a.depends_on = vec!["b".into()];
//! b.depends_on = vec!["a".into()];
//!
//! let report = dag::detect_cycles(&[a, b]);
//! assert!(report.has_cycle);
//! ```

mod cycle;
mod phase_order;

pub use cycle::{
    CycleReport, DependencyGraph, detect_cycles, detect_cycles_in_adjacency, validate,
    validate_adjacency,
};
pub use phase_order::{PhaseViolation, check_phase_order, validate_phase_order};

use crate::errors::DagError;
use crate::state::{RefinementPhase, TaskRecord};

/// Anything with an id and a list of dependency ids.
pub trait TaskNode {
    fn node_id(&self) -> &str;
    fn dependency_ids(&self) -> &[String];
}

/// A task node that also belongs to a refinement phase.
pub trait PhaseTaskNode: TaskNode {
    fn refinement_phase(&self) -> RefinementPhase;
}

impl TaskNode for TaskRecord {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn dependency_ids(&self) -> &[String] {
        &self.depends_on
    }
}

impl PhaseTaskNode for TaskRecord {
    fn refinement_phase(&self) -> RefinementPhase {
        self.phase
    }
}

/// Run both checks. Cycles are reported ahead of phase violations.
pub fn validate_task_graph<T: PhaseTaskNode>(tasks: &[T]) -> Result<(), DagError> {
    validate(tasks)?;
    validate_phase_order(tasks)
}
