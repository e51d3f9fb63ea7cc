use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use tracing::info;

use crate::errors::RecoveryError;
use crate::store::CheckpointStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    pub checkpoint_id: String,
    /// Creation time of the target checkpoint; rows strictly after it were removed.
    pub snapshot_at: String,
    pub logs_deleted: usize,
    pub tasks_deleted: usize,
    pub requirements_deleted: usize,
}

/// Reconciles business tables with a chosen checkpoint by deleting rows
/// written after it.
pub struct RelationalRollback {
    store: CheckpointStore,
}

impl RelationalRollback {
    pub fn new(store: CheckpointStore) -> Self {
        Self { store }
    }

    /// Delete agent logs, tasks and requirements of `project_id` recorded
    /// after checkpoint `checkpoint_id` was created. One transaction: any
    /// failure leaves every table as it was.
    pub fn rollback_to_snapshot(
        &self,
        project_id: i64,
        checkpoint_id: &str,
    ) -> Result<RollbackReport, RecoveryError> {
        let thread_id = project_id.to_string();
        let conn = self
            .store
            .db()
            .lock_sync()
            .map_err(|_| RecoveryError::LockPoisoned)?;
        let tx = conn.unchecked_transaction()?;

        let snapshot_at: String = tx
            .query_row(
                "SELECT created_at FROM checkpoints WHERE thread_id = ?1 AND checkpoint_id = ?2",
                params![thread_id, checkpoint_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| RecoveryError::SnapshotNotFound {
                project_id,
                checkpoint_id: checkpoint_id.to_string(),
            })?;

        let logs_deleted = tx.execute(
            "DELETE FROM agent_logs
             WHERE timestamp > ?2
               AND task_id IN (
                   SELECT t.id FROM tasks t JOIN epics e ON t.epic_id = e.id
                   WHERE e.project_id = ?1
               )",
            params![project_id, snapshot_at],
        )?;

        let tasks_deleted = tx.execute(
            "DELETE FROM tasks
             WHERE created_at > ?2
               AND epic_id IN (SELECT id FROM epics WHERE project_id = ?1)",
            params![project_id, snapshot_at],
        )?;

        let requirements_deleted = tx.execute(
            "DELETE FROM requirements WHERE project_id = ?1 AND created_at > ?2",
            params![project_id, snapshot_at],
        )?;

        tx.commit()?;

        info!(
            project = project_id,
            checkpoint = %checkpoint_id,
            logs = logs_deleted,
            tasks = tasks_deleted,
            requirements = requirements_deleted,
            "Rolled business tables back to snapshot"
        );

        Ok(RollbackReport {
            checkpoint_id: checkpoint_id.to_string(),
            snapshot_at,
            logs_deleted,
            tasks_deleted,
            requirements_deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ProjectConfig, RunState};
    use crate::store::{
        Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSource, DbHandle,
    };
    use anyhow::Result;

    const BEFORE: &str = "2026-03-01T10:00:00.000Z";
    const SNAPSHOT: &str = "2026-03-01T10:00:01.000Z";
    const AFTER: &str = "2026-03-01T10:00:02.000Z";

    fn seeded_store() -> Result<(CheckpointStore, String)> {
        let store = CheckpointStore::new(DbHandle::open_in_memory()?);
        let checkpoint = Checkpoint::new(RunState::new(ProjectConfig::new(5, "rb")), None);
        store.put(
            &CheckpointConfig::for_thread("5"),
            &checkpoint,
            &CheckpointMetadata {
                source: CheckpointSource::Input,
                step: 0,
                node: None,
            },
        )?;

        let conn = store.db().lock_sync().unwrap();
        conn.execute(
            "UPDATE checkpoints SET created_at = ?1 WHERE checkpoint_id = ?2",
            params![SNAPSHOT, checkpoint.id],
        )?;
        conn.execute_batch(&format!(
            "
            INSERT INTO projects (id, name) VALUES (5, 'rb'), (6, 'other');
            INSERT INTO epics (id, project_id, name) VALUES ('e5', 5, 'core'), ('e6', 6, 'other');

            INSERT INTO tasks (id, epic_id, created_at, updated_at) VALUES
                ('pre', 'e5', '{BEFORE}', '{AFTER}'),
                ('post', 'e5', '{AFTER}', '{AFTER}'),
                ('foreign', 'e6', '{AFTER}', '{AFTER}');
            INSERT INTO requirements (id, project_id, created_at) VALUES
                ('req-pre', 5, '{BEFORE}'),
                ('req-post', 5, '{AFTER}'),
                ('req-foreign', 6, '{AFTER}');
            INSERT INTO agent_logs (task_id, epic_id, timestamp, content) VALUES
                ('pre', 'e5', '{BEFORE}', 'pre-log'),
                ('pre', 'e5', '{AFTER}', 'post-log'),
                ('foreign', 'e6', '{AFTER}', 'foreign-log');
            "
        ))?;
        drop(conn);
        Ok((store, checkpoint.id))
    }

    fn ids(store: &CheckpointStore, sql: &str) -> Vec<String> {
        let conn = store.db().lock_sync().unwrap();
        let mut stmt = conn.prepare(sql).unwrap();
        stmt.query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_rollback_removes_only_post_snapshot_rows() -> Result<()> {
        let (store, checkpoint_id) = seeded_store()?;
        let rollback = RelationalRollback::new(store.clone());

        let report = rollback.rollback_to_snapshot(5, &checkpoint_id)?;
        assert_eq!(report.snapshot_at, SNAPSHOT);
        assert_eq!(report.logs_deleted, 1);
        assert_eq!(report.tasks_deleted, 1);
        assert_eq!(report.requirements_deleted, 1);

        assert_eq!(
            ids(&store, "SELECT id FROM tasks ORDER BY id"),
            vec!["foreign", "pre"]
        );
        assert_eq!(
            ids(&store, "SELECT id FROM requirements ORDER BY id"),
            vec!["req-foreign", "req-pre"]
        );
        assert_eq!(
            ids(&store, "SELECT content FROM agent_logs ORDER BY id"),
            vec!["pre-log", "foreign-log"]
        );
        Ok(())
    }

    #[test]
    fn test_rows_at_snapshot_time_are_kept() -> Result<()> {
        let (store, checkpoint_id) = seeded_store()?;
        {
            let conn = store.db().lock_sync().unwrap();
            conn.execute(
                "INSERT INTO tasks (id, epic_id, created_at) VALUES ('same-ms', 'e5', ?1)",
                params![SNAPSHOT],
            )?;
        }
        RelationalRollback::new(store.clone()).rollback_to_snapshot(5, &checkpoint_id)?;
        assert!(ids(&store, "SELECT id FROM tasks").contains(&"same-ms".to_string()));
        Ok(())
    }

    #[test]
    fn test_unknown_snapshot_is_an_error() -> Result<()> {
        let (store, _) = seeded_store()?;
        let err = RelationalRollback::new(store.clone())
            .rollback_to_snapshot(5, "missing")
            .unwrap_err();
        assert!(matches!(err, RecoveryError::SnapshotNotFound { project_id: 5, .. }));
        assert_eq!(ids(&store, "SELECT id FROM tasks").len(), 3);
        Ok(())
    }

    #[test]
    fn test_failure_mid_sequence_removes_nothing() -> Result<()> {
        let (store, checkpoint_id) = seeded_store()?;
        {
            let conn = store.db().lock_sync().unwrap();
            conn.execute_batch(
                "CREATE TRIGGER block_requirement_delete BEFORE DELETE ON requirements
                 BEGIN SELECT RAISE(ABORT, 'forced failure'); END;",
            )?;
        }

        let err = RelationalRollback::new(store.clone())
            .rollback_to_snapshot(5, &checkpoint_id)
            .unwrap_err();
        assert!(matches!(err, RecoveryError::Database(_)));

        assert_eq!(ids(&store, "SELECT id FROM tasks").len(), 3);
        assert_eq!(ids(&store, "SELECT id FROM requirements").len(), 3);
        assert_eq!(ids(&store, "SELECT content FROM agent_logs").len(), 3);
        Ok(())
    }
}
