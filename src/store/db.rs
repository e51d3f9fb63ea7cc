use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;

/// Format every timestamp the store writes: ISO-8601 UTC, millisecond precision.
/// SQLite defaults use the same shape so text comparison orders chronologically.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Shared handle to the run database.
///
/// The checkpoint store, the project repository and recovery all clone the
/// same handle; the mutex serializes writers so only one transaction is open
/// at a time.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<Mutex<Connection>>,
}

impl DbHandle {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("Failed to configure SQLite pragmas")?;
        Self::init(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        run_migrations(&conn).context("Failed to run migrations")?;
        Ok(Self {
            inner: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure with the connection on tokio's blocking pool, so
    /// SQLite I/O never ties up an async worker. All data passed into `f`
    /// must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let conn = inner
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&conn)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the connection synchronously, for short calls outside the
    /// engine's async path (CLI commands, recovery, tests). Callers map the
    /// poison error into their own error type.
    pub fn lock_sync(
        &self,
    ) -> std::result::Result<MutexGuard<'_, Connection>, PoisonError<MutexGuard<'_, Connection>>>
    {
        self.inner.lock()
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS checkpoints (
            thread_id TEXT NOT NULL,
            checkpoint_ns TEXT NOT NULL DEFAULT '',
            checkpoint_id TEXT NOT NULL,
            parent_checkpoint_id TEXT,
            type TEXT,
            checkpoint BLOB,
            metadata BLOB,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            PRIMARY KEY (thread_id, checkpoint_ns, checkpoint_id)
        );

        CREATE TABLE IF NOT EXISTS checkpoint_writes (
            thread_id TEXT NOT NULL,
            checkpoint_ns TEXT NOT NULL DEFAULT '',
            checkpoint_id TEXT NOT NULL,
            task_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            channel TEXT NOT NULL,
            type TEXT,
            value BLOB,
            PRIMARY KEY (thread_id, checkpoint_ns, checkpoint_id, task_id, idx)
        );
        ",
    )
    .context("Failed to create checkpoint tables")?;

    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'initializing',
            current_phase TEXT,
            last_milestone TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'draft',
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS requirements (
            id TEXT PRIMARY KEY,
            project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            external_ref TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            depends_on TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS epics (
            id TEXT PRIMARY KEY,
            project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            name TEXT NOT NULL DEFAULT '',
            phase_number INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            epic_id TEXT NOT NULL REFERENCES epics(id) ON DELETE CASCADE,
            name TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'pending',
            assigned_role TEXT NOT NULL DEFAULT '',
            phase TEXT NOT NULL DEFAULT 'execution',
            depends_on TEXT NOT NULL DEFAULT '[]',
            git_commit_hash TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS agent_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            log_id TEXT UNIQUE,
            task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            epic_id TEXT,
            timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            role TEXT NOT NULL DEFAULT '',
            content_type TEXT NOT NULL DEFAULT 'text',
            content TEXT NOT NULL DEFAULT '',
            commit_hash TEXT
        );

        CREATE TABLE IF NOT EXISTS entropy_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL,
            output_hash TEXT NOT NULL,
            repeat_count INTEGER NOT NULL DEFAULT 1,
            timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            UNIQUE (task_id, output_hash, repeat_count)
        );

        CREATE INDEX IF NOT EXISTS idx_epics_project ON epics(project_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_epic ON tasks(epic_id);
        CREATE INDEX IF NOT EXISTS idx_requirements_project ON requirements(project_id);
        CREATE INDEX IF NOT EXISTS idx_agent_logs_task ON agent_logs(task_id);
        ",
    )
    .context("Failed to create business tables")?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(db: &DbHandle) -> Vec<String> {
        let conn = db.lock_sync().unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_migrations_create_all_tables() -> Result<()> {
        let db = DbHandle::open_in_memory()?;
        let names = table_names(&db);
        for table in [
            "agent_logs",
            "checkpoint_writes",
            "checkpoints",
            "documents",
            "entropy_events",
            "epics",
            "projects",
            "requirements",
            "tasks",
        ] {
            assert!(names.contains(&table.to_string()), "missing {}", table);
        }
        Ok(())
    }

    #[test]
    fn test_reopen_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("state.sqlite");
        drop(DbHandle::open(&path)?);
        let db = DbHandle::open(&path)?;
        assert!(table_names(&db).contains(&"checkpoints".to_string()));
        Ok(())
    }

    #[test]
    fn test_file_database_uses_wal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db = DbHandle::open(&dir.path().join("wal.sqlite"))?;
        let conn = db.lock_sync().unwrap();
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        assert_eq!(mode.to_lowercase(), "wal");
        Ok(())
    }

    #[test]
    fn test_sql_default_timestamp_matches_rust_format() -> Result<()> {
        let db = DbHandle::open_in_memory()?;
        let conn = db.lock_sync().unwrap();
        let sql_now: String =
            conn.query_row("SELECT strftime('%Y-%m-%dT%H:%M:%fZ', 'now')", [], |row| {
                row.get(0)
            })?;
        let rust_now = now_timestamp();
        assert_eq!(sql_now.len(), rust_now.len());
        assert_eq!(&sql_now[10..11], "T");
        assert!(rust_now.ends_with('Z'));
        Ok(())
    }

    #[tokio::test]
    async fn test_call_runs_on_blocking_pool() -> Result<()> {
        let db = DbHandle::open_in_memory()?;
        let count: i64 = db
            .call(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM checkpoints", [], |row| row.get(0))?)
            })
            .await?;
        assert_eq!(count, 0);

        let err = db
            .call(|conn| -> Result<()> {
                conn.execute("INSERT INTO nowhere VALUES (1)", [])?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nowhere"));
        Ok(())
    }
}
