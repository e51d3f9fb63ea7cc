use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use super::PhaseTaskNode;
use crate::errors::DagError;
use crate::state::RefinementPhase;

/// A dependency that points forward in the refinement order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseViolation {
    pub task_id: String,
    pub task_phase: RefinementPhase,
    pub dependency_id: String,
    pub dependency_phase: RefinementPhase,
}

impl fmt::Display for PhaseViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) depends on {} ({})",
            self.task_id, self.task_phase, self.dependency_id, self.dependency_phase
        )
    }
}

/// Collect every dependency whose phase comes after its dependent's phase.
///
/// Dependencies on ids outside `tasks` carry no phase and are skipped.
pub fn check_phase_order<T: PhaseTaskNode>(tasks: &[T]) -> Vec<PhaseViolation> {
    let phases: HashMap<&str, RefinementPhase> = tasks
        .iter()
        .map(|t| (t.node_id(), t.refinement_phase()))
        .collect();

    let mut violations = Vec::new();
    for task in tasks {
        let task_phase = task.refinement_phase();
        for dep in task.dependency_ids() {
            let Some(&dep_phase) = phases.get(dep.as_str()) else {
                continue;
            };
            if dep_phase.index() > task_phase.index() {
                violations.push(PhaseViolation {
                    task_id: task.node_id().to_string(),
                    task_phase,
                    dependency_id: dep.clone(),
                    dependency_phase: dep_phase,
                });
            }
        }
    }
    violations
}

/// Fails with every violation at once, never just the first.
pub fn validate_phase_order<T: PhaseTaskNode>(tasks: &[T]) -> Result<(), DagError> {
    let violations = check_phase_order(tasks);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(DagError::PhaseViolations { violations })
    }
}
