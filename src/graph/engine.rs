use std::sync::Arc;

use anyhow::anyhow;
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, info};

use super::agents::PipelineAgents;
use super::hitl::{InterruptPayload, apply_resume, enter_gate, route_after_gate};
use super::nodes::{
    NodeId, TaskSelection, activate_next_epic, apply_design, apply_plan, apply_research,
    apply_turn, apply_verification, needs_replan, select_task,
};
use super::routing::{Transition, route};
use crate::errors::{CheckpointError, EngineError};
use crate::robustness::{
    NodeFailure, PatternMasker, SecretMasker, apply_pivot, handle_error, reset_turn_budget,
};
use crate::state::{ProjectStatus, ResumeSignal, RunState, TaskStatus};
use crate::store::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSource, CheckpointStore,
    CheckpointTuple, PendingWrite, ProjectRepository,
};
use crate::tracker::WorkspaceGuard;

/// How a call into the engine stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every epic finished.
    Completed,
    /// Waiting at an approval gate; call [`GraphEngine::resume`].
    Suspended(InterruptPayload),
    /// The pivot node ran; the run needs a human strategy decision.
    Escalated,
    /// Workspace verification failed; fix the workspace and continue.
    Halted,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub state: RunState,
    /// Addresses the checkpoint committed last.
    pub config: CheckpointConfig,
}

/// Drives a run through the pipeline nodes, committing a checkpoint after
/// every step.
pub struct GraphEngine {
    store: CheckpointStore,
    agents: Arc<dyn PipelineAgents>,
    workspace: Option<Arc<dyn WorkspaceGuard>>,
    sync_tables: bool,
    masker: Arc<dyn SecretMasker>,
    namespace: String,
}

impl GraphEngine {
    pub fn new(store: CheckpointStore, agents: Arc<dyn PipelineAgents>) -> Self {
        Self {
            store,
            agents,
            workspace: None,
            sync_tables: false,
            masker: Arc::new(PatternMasker),
            namespace: String::new(),
        }
    }

    /// Verify and commit the workspace when a task passes verification.
    pub fn with_workspace(mut self, workspace: Arc<dyn WorkspaceGuard>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    /// Mirror state into the business tables of the checkpoint database,
    /// in the same transaction as each checkpoint.
    pub fn with_business_tables(mut self) -> Self {
        self.sync_tables = true;
        self
    }

    /// Mask error records and pending writes with `masker`.
    pub fn with_masker(mut self, masker: Arc<dyn SecretMasker>) -> Self {
        self.store = CheckpointStore::with_masker(self.store.db().clone(), masker.clone());
        self.masker = masker;
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn config_for_thread(&self, thread_id: &str) -> CheckpointConfig {
        CheckpointConfig::for_thread(thread_id).with_namespace(&self.namespace)
    }

    /// Latest committed checkpoint of a thread.
    pub fn latest(&self, thread_id: &str) -> Result<Option<CheckpointTuple>, EngineError> {
        Ok(self.store.get_tuple(&self.config_for_thread(thread_id))?)
    }

    // ── Entry points ──────────────────────────────────────────────────

    /// Start a new run from `initial`. The thread id is the project id.
    pub async fn invoke(&self, initial: RunState) -> Result<RunReport, EngineError> {
        let thread_id = initial.project.thread_id();
        let config = self.config_for_thread(&thread_id);
        if self.store.get_tuple(&config)?.is_some() {
            return Err(EngineError::ThreadExists { thread_id });
        }

        info!(thread = %thread_id, "Starting run");
        let mut state = initial;
        let config = self.commit(
            &config,
            None,
            &mut state,
            Some(NodeId::Research),
            CheckpointSource::Input,
            0,
            None,
        )
        .await?;
        self.drive(config, state, NodeId::Research, 0).await
    }

    /// Apply a human decision to a run suspended at a gate and continue it.
    pub async fn resume(
        &self,
        thread_id: &str,
        signal: ResumeSignal,
    ) -> Result<RunReport, EngineError> {
        let tuple = self.require_latest(thread_id)?;
        let Some(gate) = tuple.checkpoint.state.pending_gate else {
            return Err(EngineError::NotSuspended {
                thread_id: thread_id.to_string(),
            });
        };

        let mut state = tuple.checkpoint.state.clone();
        let prev = state.clone();
        apply_resume(&mut state, gate, signal);
        let next = route_after_gate(&state, gate);
        let step = tuple.metadata.step + 1;
        let config = self.commit(
            &tuple.config,
            Some(&prev),
            &mut state,
            Some(next),
            CheckpointSource::Resume,
            step,
            Some(NodeId::for_gate(gate)),
        )
        .await?;
        self.drive(config, state, next, step).await
    }

    /// Continue a run from its latest checkpoint, e.g. after a crash or a
    /// security pause.
    pub async fn continue_run(&self, thread_id: &str) -> Result<RunReport, EngineError> {
        let tuple = self.require_latest(thread_id)?;
        let state = tuple.checkpoint.state;
        if let Some(gate) = state.pending_gate {
            return Err(EngineError::AwaitingApproval {
                thread_id: thread_id.to_string(),
                gate,
            });
        }

        let Some(node) = tuple.checkpoint.next_node else {
            let outcome = if state.status == ProjectStatus::StrategyPivot {
                RunOutcome::Escalated
            } else {
                RunOutcome::Completed
            };
            return Ok(RunReport {
                outcome,
                state,
                config: tuple.config,
            });
        };

        info!(thread = %thread_id, node = %node, "Continuing run");
        self.drive(tuple.config, state, node, tuple.metadata.step).await
    }

    /// Put a task the dead run left behind back to `pending` so it restarts
    /// from scratch instead of being resumed.
    pub async fn reset_stale_task(
        &self,
        thread_id: &str,
        task_id: &str,
    ) -> Result<RunState, EngineError> {
        let tuple = self.require_latest(thread_id)?;
        let mut state = tuple.checkpoint.state.clone();
        let prev = state.clone();

        let task = state
            .task_mut(task_id)
            .ok_or_else(|| anyhow!("Task {} not found in thread {}", task_id, thread_id))?;
        task.status = TaskStatus::Pending;
        if state.active_task_id.as_deref() == Some(task_id) {
            state.active_task_id = None;
            reset_turn_budget(&mut state);
        }

        let next = match tuple.checkpoint.next_node {
            Some(NodeId::Verify) => Some(NodeId::Implement),
            other => other,
        };
        info!(thread = %thread_id, task = %task_id, "Stale task reset to pending");
        self.commit(
            &tuple.config,
            Some(&prev),
            &mut state,
            next,
            CheckpointSource::Update,
            tuple.metadata.step + 1,
            None,
        )
        .await?;
        Ok(state)
    }

    fn require_latest(&self, thread_id: &str) -> Result<CheckpointTuple, EngineError> {
        self.latest(thread_id)?
            .ok_or_else(|| EngineError::NoCheckpoint {
                thread_id: thread_id.to_string(),
            })
    }

    // ── Dispatcher ────────────────────────────────────────────────────

    async fn drive(
        &self,
        mut config: CheckpointConfig,
        mut state: RunState,
        mut node: NodeId,
        mut step: i64,
    ) -> Result<RunReport, EngineError> {
        loop {
            step += 1;
            let prev = state.clone();
            let (executed, transition) = self.step(node, &mut state).await;
            if transition == Transition::End && executed != NodeId::PivotAgent {
                state.set_status(ProjectStatus::Completed);
            }

            let next_node = match transition {
                Transition::Goto(next) => Some(next),
                Transition::Suspend(gate) => Some(NodeId::for_gate(gate)),
                Transition::Halt { resume_at } => Some(resume_at),
                Transition::End => None,
            };
            config = self.commit(
                &config,
                Some(&prev),
                &mut state,
                next_node,
                CheckpointSource::Loop,
                step,
                Some(executed),
            )
            .await?;
            debug!(step, node = %executed, next = ?next_node, "Step committed");

            let outcome = match transition {
                Transition::Goto(next) => {
                    node = next;
                    continue;
                }
                Transition::Suspend(gate) => RunOutcome::Suspended(InterruptPayload::for_gate(gate)),
                Transition::Halt { .. } => RunOutcome::Halted,
                Transition::End if executed == NodeId::PivotAgent => RunOutcome::Escalated,
                Transition::End => RunOutcome::Completed,
            };
            info!(thread = %config.thread_id, outcome = ?outcome, "Run stopped");
            return Ok(RunReport {
                outcome,
                state,
                config,
            });
        }
    }

    /// Run one node. A failing node hands its partial state to the error
    /// node in the same step, so the committed checkpoint is the error
    /// node's.
    async fn step(&self, node: NodeId, state: &mut RunState) -> (NodeId, Transition) {
        match self.execute(node, state).await {
            Ok(()) => (node, route(node, state)),
            Err(err) => {
                let failure = NodeFailure::from_error(node, &err);
                handle_error(state, &failure, self.masker.as_ref());
                (NodeId::Error, route(NodeId::Error, state))
            }
        }
    }

    async fn execute(&self, node: NodeId, state: &mut RunState) -> anyhow::Result<()> {
        match node {
            NodeId::Research => {
                let docs = self.agents.research(state).await?;
                apply_research(state, docs);
            }
            NodeId::Design => {
                let docs = self.agents.design(state).await?;
                apply_design(state, docs);
            }
            NodeId::ApproveDesign | NodeId::ApproveTaskDag => {
                if let Some(gate) = node.gate() {
                    enter_gate(state, gate);
                }
            }
            NodeId::Distill => {
                if needs_replan(state) {
                    let plan = self.agents.distill(state).await?;
                    apply_plan(state, plan)?;
                }
                activate_next_epic(state);
                state.set_status(ProjectStatus::Planning);
            }
            NodeId::Implement => {
                let task_id = match select_task(state)? {
                    TaskSelection::Continue(id) | TaskSelection::Started(id) => id,
                    TaskSelection::NothingLeft => return Ok(()),
                };
                let task = state
                    .active_task()
                    .cloned()
                    .ok_or_else(|| anyhow!("Active task {} vanished", task_id))?;
                let output = self.agents.implement(state, &task).await?;
                apply_turn(state, &task_id, output);
            }
            NodeId::Verify => {
                let Some(task) = state
                    .active_task()
                    .filter(|t| t.status == TaskStatus::InProgress)
                    .cloned()
                else {
                    return Ok(());
                };
                let verdict = self.agents.verify(state, &task).await?;
                match (&self.workspace, verdict.passed) {
                    (Some(guard), true) => {
                        let report = guard.verify_workspace()?;
                        let hash = if report.passed {
                            Some(guard.commit(&format!("task: complete {}", task.name))?)
                        } else {
                            None
                        };
                        apply_verification(state, &task.id, &verdict, Some((&report, hash)));
                    }
                    _ => apply_verification(state, &task.id, &verdict, None),
                }
            }
            NodeId::Error => {}
            NodeId::PivotAgent => apply_pivot(state),
        }
        Ok(())
    }

    // ── Persistence ───────────────────────────────────────────────────

    /// Record the channels the step changed as pending writes against the
    /// parent checkpoint, sync business tables, then commit the new
    /// checkpoint. All three land in one transaction.
    #[allow(clippy::too_many_arguments)]
    async fn commit(
        &self,
        parent: &CheckpointConfig,
        prev: Option<&RunState>,
        state: &mut RunState,
        next_node: Option<NodeId>,
        source: CheckpointSource,
        step: i64,
        node: Option<NodeId>,
    ) -> Result<CheckpointConfig, EngineError> {
        let writes = match prev {
            Some(prev) if parent.checkpoint_id.is_some() => {
                changed_channels(prev, state).map_err(anyhow::Error::from)?
            }
            _ => Vec::new(),
        };

        // logs reach the checkpoint only when no table takes them
        let mut snapshot = state.clone();
        if self.sync_tables {
            snapshot.pending_logs.clear();
        }
        let step_commit = StepCommit {
            parent: parent.clone(),
            writes,
            writer: node.map(|n| n.as_str()).unwrap_or("update"),
            synced: self.sync_tables.then(|| state.clone()),
            checkpoint: Checkpoint::new(snapshot, next_node),
            metadata: CheckpointMetadata { source, step, node },
        };

        let store = self.store.clone();
        let next = self
            .store
            .db()
            .call(move |conn| Ok(step_commit.apply(conn, &store)))
            .await??;
        if self.sync_tables {
            state.pending_logs.clear();
        }
        Ok(next)
    }
}

/// Everything one step persists.
struct StepCommit {
    parent: CheckpointConfig,
    writes: Vec<PendingWrite>,
    writer: &'static str,
    synced: Option<RunState>,
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
}

impl StepCommit {
    fn apply(
        self,
        conn: &Connection,
        store: &CheckpointStore,
    ) -> Result<CheckpointConfig, EngineError> {
        let tx = conn.unchecked_transaction().map_err(CheckpointError::from)?;
        if !self.writes.is_empty() {
            store.put_writes_in(&tx, &self.parent, &self.writes, self.writer)?;
        }
        if let Some(state) = &self.synced {
            ProjectRepository::sync_in(&tx, state)?;
        }
        let next = store.put_in(&tx, &self.parent, &self.checkpoint, &self.metadata)?;
        tx.commit().map_err(CheckpointError::from)?;
        Ok(next)
    }
}

/// Top-level state fields whose serialized value differs between `prev`
/// and `next`.
fn changed_channels(prev: &RunState, next: &RunState) -> serde_json::Result<Vec<PendingWrite>> {
    let (Value::Object(before), Value::Object(after)) =
        (serde_json::to_value(prev)?, serde_json::to_value(next)?)
    else {
        return Ok(Vec::new());
    };
    Ok(after
        .into_iter()
        .filter(|(channel, value)| before.get(channel) != Some(value))
        .map(|(channel, value)| PendingWrite::new(&channel, value))
        .collect())
}
