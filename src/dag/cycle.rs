use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use super::TaskNode;
use crate::errors::DagError;

/// Result of a cycle scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub has_cycle: bool,
    /// Closed path: the first id is repeated at the end.
    pub cycle: Option<Vec<String>>,
}

impl CycleReport {
    fn acyclic() -> Self {
        Self {
            has_cycle: false,
            cycle: None,
        }
    }

    fn found(cycle: Vec<String>) -> Self {
        Self {
            has_cycle: true,
            cycle: Some(cycle),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Dependent → dependency edges over every referenced id.
///
/// Ids are kept in first-seen order so traversal (and therefore the reported
/// cycle) is deterministic for a given input.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    order: Vec<String>,
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn from_tasks<T: TaskNode>(tasks: &[T]) -> Self {
        let mut graph = Self::default();
        for task in tasks {
            graph.add_node(task.node_id(), task.dependency_ids());
        }
        graph
    }

    pub fn from_adjacency(adjacency: &BTreeMap<String, Vec<String>>) -> Self {
        let mut graph = Self::default();
        for (id, deps) in adjacency {
            graph.add_node(id, deps);
        }
        graph
    }

    fn add_node(&mut self, id: &str, deps: &[String]) {
        self.touch(id);
        for dep in deps {
            self.touch(dep);
        }
        if let Some(edges) = self.edges.get_mut(id) {
            edges.extend(deps.iter().cloned());
        }
    }

    fn touch(&mut self, id: &str) {
        if !self.edges.contains_key(id) {
            self.edges.insert(id.to_string(), Vec::new());
            self.order.push(id.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterative three-color depth-first search. Returns the first cycle found.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks: HashMap<&str, Mark> = self
            .order
            .iter()
            .map(|id| (id.as_str(), Mark::Unvisited))
            .collect();

        for start in &self.order {
            if marks.get(start.as_str()) != Some(&Mark::Unvisited) {
                continue;
            }

            // (node, index of the next dependency to visit)
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            marks.insert(start.as_str(), Mark::InProgress);

            while let Some(&(node, next_idx)) = stack.last() {
                let deps = self.edges.get(node).map(Vec::as_slice).unwrap_or(&[]);
                let Some(dep) = deps.get(next_idx) else {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }

                let dep = dep.as_str();
                match marks.get(dep).copied().unwrap_or(Mark::Unvisited) {
                    Mark::InProgress => {
                        let from = stack.iter().position(|(id, _)| *id == dep).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[from..].iter().map(|(id, _)| id.to_string()).collect();
                        cycle.push(dep.to_string());
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        marks.insert(dep, Mark::InProgress);
                        stack.push((dep, 0));
                    }
                    Mark::Done => {}
                }
            }
        }

        None
    }
}

pub fn detect_cycles<T: TaskNode>(tasks: &[T]) -> CycleReport {
    report(DependencyGraph::from_tasks(tasks))
}

pub fn detect_cycles_in_adjacency(adjacency: &BTreeMap<String, Vec<String>>) -> CycleReport {
    report(DependencyGraph::from_adjacency(adjacency))
}

fn report(graph: DependencyGraph) -> CycleReport {
    match graph.find_cycle() {
        Some(cycle) => CycleReport::found(cycle),
        None => CycleReport::acyclic(),
    }
}

/// Fails with [`DagError::Cycle`] when the task dependencies contain a cycle.
pub fn validate<T: TaskNode>(tasks: &[T]) -> Result<(), DagError> {
    into_result(detect_cycles(tasks))
}

pub fn validate_adjacency(adjacency: &BTreeMap<String, Vec<String>>) -> Result<(), DagError> {
    into_result(detect_cycles_in_adjacency(adjacency))
}

fn into_result(report: CycleReport) -> Result<(), DagError> {
    match report.cycle {
        Some(cycle) => Err(DagError::Cycle { cycle }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TaskRecord;

    fn task(id: &str, deps: Vec<&str>) -> TaskRecord {
        let mut t = TaskRecord::new(id, "epic-1");
        t.depends_on = deps.into_iter().map(String::from).collect();
        t
    }

    fn assert_closed_cycle(cycle: &[String]) {
        assert!(cycle.len() >= 2, "cycle too short: {:?}", cycle);
        assert_eq!(cycle.first(), cycle.last());
    }

    #[test]
    fn test_acyclic_list_passes() {
        let tasks = vec![
            task("a", vec![]),
            task("b", vec!["a"]),
            task("c", vec!["a", "b"]),
            task("d", vec!["c"]),
        ];
        let report = detect_cycles(&tasks);
        assert!(!report.has_cycle);
        assert!(report.cycle.is_none());
        assert!(validate(&tasks).is_ok());
    }

    #[test]
    fn test_mutual_dependency_is_a_cycle() {
        let tasks = vec![task("A", vec!["B"]), task("B", vec!["A"])];
        let report = detect_cycles(&tasks);
        assert!(report.has_cycle);
        let cycle = report.cycle.unwrap();
        assert_closed_cycle(&cycle);
        assert!(cycle.contains(&"A".to_string()));
        assert!(cycle.contains(&"B".to_string()));
    }

    #[test]
    fn test_self_loop_is_one_node_cycle() {
        let tasks = vec![task("solo", vec!["solo"])];
        let report = detect_cycles(&tasks);
        assert_eq!(report.cycle, Some(vec!["solo".to_string(), "solo".to_string()]));
    }

    #[test]
    fn test_cycle_path_excludes_nodes_off_the_cycle() {
        // entry -> b -> c -> b ; entry is not on the cycle.
        let tasks = vec![
            task("entry", vec!["b"]),
            task("b", vec!["c"]),
            task("c", vec!["b"]),
        ];
        let cycle = detect_cycles(&tasks).cycle.unwrap();
        assert_closed_cycle(&cycle);
        assert!(!cycle.contains(&"entry".to_string()));
        assert_eq!(cycle.len(), 3);
    }

    #[test]
    fn test_cycle_in_disconnected_component_fails_whole_check() {
        let tasks = vec![
            task("a", vec![]),
            task("b", vec!["a"]),
            task("x", vec!["z"]),
            task("y", vec!["x"]),
            task("z", vec!["y"]),
        ];
        let err = validate(&tasks).unwrap_err();
        match err {
            DagError::Cycle { cycle } => {
                assert_closed_cycle(&cycle);
                for id in ["x", "y", "z"] {
                    assert!(cycle.contains(&id.to_string()));
                }
            }
            other => panic!("Expected Cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_dependency_only_ids_are_leaves() {
        let tasks = vec![task("a", vec!["external-1", "external-2"])];
        let graph = DependencyGraph::from_tasks(&tasks);
        assert_eq!(graph.len(), 3);
        assert!(validate(&tasks).is_ok());
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let n = 50_000;
        let tasks: Vec<TaskRecord> = (0..n)
            .map(|i| {
                let id = format!("t{}", i);
                if i == 0 {
                    task(&id, vec![])
                } else {
                    let prev = format!("t{}", i - 1);
                    task(&id, vec![prev.as_str()])
                }
            })
            .collect();
        assert!(validate(&tasks).is_ok());
    }

    #[test]
    fn test_adjacency_map_variant() {
        let mut adjacency = BTreeMap::new();
        adjacency.insert("a".to_string(), vec!["b".to_string()]);
        adjacency.insert("b".to_string(), vec!["c".to_string()]);
        assert!(validate_adjacency(&adjacency).is_ok());

        adjacency.insert("c".to_string(), vec!["a".to_string()]);
        let report = detect_cycles_in_adjacency(&adjacency);
        assert!(report.has_cycle);
        assert_closed_cycle(&report.cycle.unwrap());
    }

    #[test]
    fn test_empty_graph() {
        let tasks: Vec<TaskRecord> = vec![];
        assert!(DependencyGraph::from_tasks(&tasks).is_empty());
        assert!(!detect_cycles(&tasks).has_cycle);
    }
}
