use rusqlite::params;
use serde::Serialize;
use tracing::info;

use crate::errors::RecoveryError;
use crate::robustness::{StaleTask, find_stale_or_dirty_states};
use crate::store::{CheckpointConfig, CheckpointStore, CheckpointTuple};

/// Everything needed to resume a run from its latest checkpoint.
#[derive(Debug, Clone)]
pub struct RecoveryInfo {
    pub thread_id: String,
    pub checkpoint_id: String,
    /// Config addressing the checkpoint to resume from.
    pub config: CheckpointConfig,
    pub tuple: CheckpointTuple,
    /// Tasks the dead run left `in_progress`; each needs a resume-or-discard choice.
    pub stale_tasks: Vec<StaleTask>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoverySummary {
    pub thread_id: String,
    pub checkpoint_count: u64,
    pub latest_checkpoint_id: Option<String>,
}

/// Checkpoint queries and crash-recovery handles, scoped by thread.
pub struct RecoveryManager {
    store: CheckpointStore,
    namespace: String,
}

impl RecoveryManager {
    pub fn new(store: CheckpointStore) -> Self {
        Self {
            store,
            namespace: String::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    fn config(&self, run_id: &str) -> CheckpointConfig {
        CheckpointConfig::for_thread(run_id).with_namespace(&self.namespace)
    }

    pub fn has_checkpoint(&self, run_id: &str) -> Result<bool, RecoveryError> {
        Ok(self.get_checkpoint_count(run_id)? > 0)
    }

    pub fn get_checkpoint_count(&self, run_id: &str) -> Result<u64, RecoveryError> {
        Ok(self.store.count(run_id)?)
    }

    pub fn get_latest_checkpoint(
        &self,
        run_id: &str,
    ) -> Result<Option<CheckpointTuple>, RecoveryError> {
        Ok(self.store.get_tuple(&self.config(run_id))?)
    }

    /// Resume handle for the latest checkpoint, or `None` when the run has
    /// never committed one.
    pub fn recover_project(&self, run_id: &str) -> Result<Option<RecoveryInfo>, RecoveryError> {
        let Some(tuple) = self.get_latest_checkpoint(run_id)? else {
            info!(thread = %run_id, "No checkpoint to recover");
            return Ok(None);
        };
        let checkpoint_id = tuple.checkpoint.id.clone();
        let stale_tasks = find_stale_or_dirty_states(&tuple.checkpoint.state);
        info!(
            thread = %run_id,
            checkpoint = %checkpoint_id,
            stale = stale_tasks.len(),
            "Recovered run from checkpoint"
        );
        Ok(Some(RecoveryInfo {
            thread_id: run_id.to_string(),
            config: self.config(run_id).at(&checkpoint_id),
            checkpoint_id,
            tuple,
            stale_tasks,
        }))
    }

    pub fn summary(&self, run_id: &str) -> Result<RecoverySummary, RecoveryError> {
        Ok(RecoverySummary {
            thread_id: run_id.to_string(),
            checkpoint_count: self.get_checkpoint_count(run_id)?,
            latest_checkpoint_id: self
                .get_latest_checkpoint(run_id)?
                .map(|t| t.checkpoint.id),
        })
    }

    /// Flag business task rows still `in_progress` as `resumed`, for audit.
    /// Engine checkpoint state is not touched. Returns the rows changed.
    pub fn mark_in_progress_tasks_as_resumed(&self, project_id: i64) -> Result<usize, RecoveryError> {
        let conn = self
            .store
            .db()
            .lock_sync()
            .map_err(|_| RecoveryError::LockPoisoned)?;
        let tx = conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE tasks
             SET status = 'resumed', updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE status = 'in_progress'
               AND epic_id IN (SELECT id FROM epics WHERE project_id = ?1)",
            params![project_id],
        )?;
        tx.commit()?;
        info!(project = project_id, tasks = changed, "Marked in-progress tasks as resumed");
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeId;
    use crate::state::{
        EpicRecord, EpicStatus, ProjectConfig, RunState, TaskRecord, TaskStatus,
    };
    use crate::store::{
        Checkpoint, CheckpointMetadata, CheckpointSource, DbHandle, ProjectRepository,
    };
    use anyhow::Result;

    fn meta() -> CheckpointMetadata {
        CheckpointMetadata {
            source: CheckpointSource::Loop,
            step: 1,
            node: Some(NodeId::Implement),
        }
    }

    #[test]
    fn test_queries_on_empty_thread() -> Result<()> {
        let manager = RecoveryManager::new(CheckpointStore::new(DbHandle::open_in_memory()?));
        assert!(!manager.has_checkpoint("1")?);
        assert_eq!(manager.get_checkpoint_count("1")?, 0);
        assert!(manager.get_latest_checkpoint("1")?.is_none());
        assert!(manager.recover_project("1")?.is_none());
        assert!(manager.summary("1")?.latest_checkpoint_id.is_none());
        Ok(())
    }

    #[test]
    fn test_recover_project_returns_latest_and_stale_tasks() -> Result<()> {
        let store = CheckpointStore::new(DbHandle::open_in_memory()?);
        let mut state = RunState::new(ProjectConfig::new(1, "p"));
        let mut task = TaskRecord::new("t1", "e1");
        task.status = TaskStatus::InProgress;
        state.tasks.push(task);

        let config = CheckpointConfig::for_thread("1");
        let first = store.put(&config, &Checkpoint::new(RunState::new(ProjectConfig::new(1, "p")), None), &meta())?;
        let latest = Checkpoint::new(state, Some(NodeId::Verify));
        store.put(&first, &latest, &meta())?;

        let manager = RecoveryManager::new(store);
        assert!(manager.has_checkpoint("1")?);
        assert_eq!(manager.get_checkpoint_count("1")?, 2);

        let info = manager.recover_project("1")?.expect("resumable");
        assert_eq!(info.checkpoint_id, latest.id);
        assert_eq!(info.config.checkpoint_id.as_deref(), Some(latest.id.as_str()));
        assert_eq!(info.tuple.checkpoint.next_node, Some(NodeId::Verify));
        assert_eq!(info.stale_tasks.len(), 1);
        assert_eq!(info.stale_tasks[0].task_id, "t1");

        let summary = manager.summary("1")?;
        assert_eq!(summary.checkpoint_count, 2);
        assert_eq!(summary.latest_checkpoint_id, Some(latest.id.clone()));
        Ok(())
    }

    #[test]
    fn test_mark_in_progress_tasks_as_resumed_is_project_scoped() -> Result<()> {
        let db = DbHandle::open_in_memory()?;
        let repo = ProjectRepository::new(db.clone());
        for (project_id, epic_id, task_id) in [(1, "e1", "t1"), (2, "e2", "t2")] {
            repo.upsert_project(&ProjectConfig::new(project_id, "p"))?;
            repo.save_epics(
                project_id,
                &[EpicRecord {
                    id: epic_id.into(),
                    name: String::new(),
                    status: EpicStatus::Active,
                    phase_number: 1,
                    satisfied_requirement_ids: vec![],
                }],
            )?;
            let mut task = TaskRecord::new(task_id, epic_id);
            task.status = TaskStatus::InProgress;
            repo.save_tasks(&[task])?;
        }
        let mut done = TaskRecord::new("t1-done", "e1");
        done.status = TaskStatus::Completed;
        repo.save_tasks(&[done])?;

        let manager = RecoveryManager::new(CheckpointStore::new(db));
        assert_eq!(manager.mark_in_progress_tasks_as_resumed(1)?, 1);

        let p1 = repo.get_project_state(1)?.expect("p1");
        let t1 = p1.tasks.iter().find(|t| t.id == "t1").expect("t1");
        assert_eq!(t1.status, TaskStatus::Resumed);
        let done = p1.tasks.iter().find(|t| t.id == "t1-done").expect("done");
        assert_eq!(done.status, TaskStatus::Completed);

        let p2 = repo.get_project_state(2)?.expect("p2");
        assert_eq!(p2.tasks[0].status, TaskStatus::InProgress);
        Ok(())
    }
}
