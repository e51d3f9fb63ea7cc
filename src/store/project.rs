use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::debug;

use super::db::{DbHandle, now_timestamp};
use crate::dag;
use crate::state::{
    AgentLogRecord, DocumentRecord, DocumentStatus, EntropyRecord, EpicRecord, EpicStatus,
    ProjectConfig, ProjectStatus, RefinementPhase, RequirementRecord, RequirementStatus,
    RunState, TaskRecord, TaskStatus,
};

#[derive(Debug, Clone, Serialize)]
pub struct StoredProject {
    pub id: i64,
    pub name: String,
    pub status: ProjectStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentLogRow {
    pub id: i64,
    /// Id of the [`AgentLogRecord`] the row was flushed from.
    pub log_id: Option<String>,
    pub task_id: String,
    pub epic_id: Option<String>,
    pub timestamp: String,
    pub role: String,
    pub content_type: String,
    pub content: String,
    pub commit_hash: Option<String>,
}

/// Business-table view of one project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSnapshot {
    pub project: StoredProject,
    pub documents: Vec<DocumentRecord>,
    pub requirements: Vec<RequirementRecord>,
    pub epics: Vec<EpicRecord>,
    pub tasks: Vec<TaskRecord>,
}

/// Reads and writes the relational project tables (projects, documents,
/// requirements, epics, tasks, agent logs, entropy events).
///
/// Every write has a `*_in` form taking a connection, so the engine can run
/// it inside the same transaction as a checkpoint commit.
#[derive(Clone)]
pub struct ProjectRepository {
    db: DbHandle,
}

impl ProjectRepository {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock_sync()
            .map_err(|e| anyhow!("DB lock poisoned: {}", e))
    }

    /// Run `f` in one transaction on the repository's connection.
    fn write<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Projects ──────────────────────────────────────────────────────

    pub fn upsert_project(&self, project: &ProjectConfig) -> Result<()> {
        self.write(|conn| Self::upsert_project_in(conn, project))
    }

    pub fn upsert_project_in(conn: &Connection, project: &ProjectConfig) -> Result<()> {
        conn.execute(
            "INSERT INTO projects (id, name, status, metadata, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 status = excluded.status,
                 metadata = excluded.metadata,
                 updated_at = excluded.updated_at",
            params![
                project.project_id,
                project.name,
                project.status.as_str(),
                serde_json::json!({ "description": project.description }).to_string(),
                now_timestamp(),
            ],
        )
        .context("Failed to upsert project")?;
        Ok(())
    }

    pub fn get_project(&self, project_id: i64) -> Result<Option<StoredProject>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, name, status, created_at, updated_at FROM projects WHERE id = ?1",
                params![project_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query project")?;
        row.map(|(id, name, status, created_at, updated_at)| -> Result<StoredProject> {
            Ok(StoredProject {
                id,
                name,
                status: parse_column(&status)?,
                created_at,
                updated_at,
            })
        })
        .transpose()
    }

    // ── Documents / requirements / epics / tasks ──────────────────────

    pub fn save_documents(&self, project_id: i64, documents: &[DocumentRecord]) -> Result<()> {
        self.write(|conn| Self::save_documents_in(conn, project_id, documents))
    }

    pub fn save_documents_in(
        conn: &Connection,
        project_id: i64,
        documents: &[DocumentRecord],
    ) -> Result<()> {
        for doc in documents {
            conn.execute(
                "INSERT INTO documents (id, project_id, kind, title, content, status, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     kind = excluded.kind,
                     title = excluded.title,
                     content = excluded.content,
                     status = excluded.status,
                     version = excluded.version",
                params![
                    doc.id,
                    project_id,
                    doc.kind,
                    doc.title,
                    doc.content,
                    doc.status.as_str(),
                    doc.version,
                ],
            )
            .with_context(|| format!("Failed to save document {}", doc.id))?;
        }
        Ok(())
    }

    pub fn save_requirements(&self, project_id: i64, requirements: &[RequirementRecord]) -> Result<()> {
        self.write(|conn| Self::save_requirements_in(conn, project_id, requirements))
    }

    pub fn save_requirements_in(
        conn: &Connection,
        project_id: i64,
        requirements: &[RequirementRecord],
    ) -> Result<()> {
        for req in requirements {
            conn.execute(
                "INSERT INTO requirements (id, project_id, external_ref, description, depends_on, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     external_ref = excluded.external_ref,
                     description = excluded.description,
                     depends_on = excluded.depends_on,
                     status = excluded.status",
                params![
                    req.id,
                    project_id,
                    req.external_ref,
                    req.description,
                    serde_json::to_string(&req.depends_on)?,
                    req.status.as_str(),
                ],
            )
            .with_context(|| format!("Failed to save requirement {}", req.id))?;
        }
        Ok(())
    }

    pub fn save_epics(&self, project_id: i64, epics: &[EpicRecord]) -> Result<()> {
        self.write(|conn| Self::save_epics_in(conn, project_id, epics))
    }

    pub fn save_epics_in(conn: &Connection, project_id: i64, epics: &[EpicRecord]) -> Result<()> {
        for epic in epics {
            conn.execute(
                "INSERT INTO epics (id, project_id, name, phase_number, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     phase_number = excluded.phase_number,
                     status = excluded.status",
                params![epic.id, project_id, epic.name, epic.phase_number, epic.status.as_str()],
            )
            .with_context(|| format!("Failed to save epic {}", epic.id))?;
        }
        Ok(())
    }

    /// Persist tasks. The whole list is validated as a DAG in phase order
    /// first; a rejected graph writes nothing.
    pub fn save_tasks(&self, tasks: &[TaskRecord]) -> Result<()> {
        self.write(|conn| Self::save_tasks_in(conn, tasks))
    }

    pub fn save_tasks_in(conn: &Connection, tasks: &[TaskRecord]) -> Result<()> {
        dag::validate_task_graph(tasks).context("Refusing to persist invalid task graph")?;

        for task in tasks {
            conn.execute(
                "INSERT INTO tasks
                     (id, epic_id, name, description, status, assigned_role, phase, depends_on, git_commit_hash, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                     epic_id = excluded.epic_id,
                     name = excluded.name,
                     description = excluded.description,
                     status = excluded.status,
                     assigned_role = excluded.assigned_role,
                     phase = excluded.phase,
                     depends_on = excluded.depends_on,
                     git_commit_hash = COALESCE(excluded.git_commit_hash, tasks.git_commit_hash),
                     updated_at = excluded.updated_at",
                params![
                    task.id,
                    task.epic_id,
                    task.name,
                    task.description,
                    task.status.as_str(),
                    task.assigned_role,
                    task.phase.as_str(),
                    serde_json::to_string(&task.depends_on)?,
                    task.git_commit_hash,
                    now_timestamp(),
                ],
            )
            .with_context(|| format!("Failed to save task {}", task.id))?;
        }
        Ok(())
    }

    // ── Logs / entropy ────────────────────────────────────────────────

    /// Insert one log row. Rows are keyed by the record id: appending the
    /// same record twice leaves one row. Returns whether a row was added.
    pub fn append_agent_log(
        &self,
        log: &AgentLogRecord,
        epic_id: Option<&str>,
        commit_hash: Option<&str>,
    ) -> Result<bool> {
        self.write(|conn| Self::append_agent_log_in(conn, log, epic_id, commit_hash))
    }

    pub fn append_agent_log_in(
        conn: &Connection,
        log: &AgentLogRecord,
        epic_id: Option<&str>,
        commit_hash: Option<&str>,
    ) -> Result<bool> {
        let content = serde_json::json!({
            "turn": log.turn_index,
            "thought": log.thought,
            "action": log.action,
            "observation": log.observation,
        });
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO agent_logs
                     (log_id, task_id, epic_id, timestamp, role, content_type, content, commit_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'json', ?6, ?7)",
                params![
                    log.id,
                    log.task_id,
                    epic_id,
                    now_timestamp(),
                    log.agent_role,
                    content.to_string(),
                    commit_hash,
                ],
            )
            .context("Failed to insert agent log")?;
        Ok(inserted > 0)
    }

    pub fn get_task_logs(&self, task_id: &str) -> Result<Vec<AgentLogRow>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, log_id, task_id, epic_id, timestamp, role, content_type, content, commit_hash
                 FROM agent_logs WHERE task_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare get_task_logs")?;
        let rows = stmt
            .query_map(params![task_id], |row| {
                Ok(AgentLogRow {
                    id: row.get(0)?,
                    log_id: row.get(1)?,
                    task_id: row.get(2)?,
                    epic_id: row.get(3)?,
                    timestamp: row.get(4)?,
                    role: row.get(5)?,
                    content_type: row.get(6)?,
                    content: row.get(7)?,
                    commit_hash: row.get(8)?,
                })
            })
            .context("Failed to query agent logs")?;
        let mut logs = Vec::new();
        for row in rows {
            logs.push(row.context("Failed to read agent log row")?);
        }
        Ok(logs)
    }

    /// Record one observed repeat level of a task's output. The same
    /// (task, hash, repeat count) is stored once.
    pub fn record_entropy_event_in(conn: &Connection, record: &EntropyRecord) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO entropy_events (task_id, output_hash, repeat_count)
             VALUES (?1, ?2, ?3)",
            params![record.task_id, record.output_hash, record.repeat_count],
        )
        .context("Failed to insert entropy event")?;
        Ok(())
    }

    pub fn entropy_event_count(&self, task_id: &str) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entropy_events WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .context("Failed to count entropy events")?;
        Ok(count as u64)
    }

    // ── Whole-state sync ──────────────────────────────────────────────

    /// Mirror the run state into the business tables in one transaction and
    /// flush its pending log buffer. Returns the number of new log rows.
    pub fn sync_from_state(&self, state: &mut RunState) -> Result<usize> {
        let flushed = self.write(|conn| Self::sync_in(conn, state))?;
        state.pending_logs.clear();
        Ok(flushed)
    }

    /// Make the project's rows match `state`: rows the state no longer holds
    /// are deleted, the rest upserted, entropy events and pending logs
    /// appended. Does not clear `state.pending_logs`; that is up to the
    /// caller once the surrounding transaction commits.
    pub fn sync_in(conn: &Connection, state: &RunState) -> Result<usize> {
        let project_id = state.project.project_id;
        Self::upsert_project_in(conn, &state.project)?;
        prune_project_rows(conn, state)?;

        Self::save_documents_in(conn, project_id, &state.documents)?;
        Self::save_requirements_in(conn, project_id, &state.requirements)?;
        Self::save_epics_in(conn, project_id, &state.epics)?;
        Self::save_tasks_in(conn, &state.tasks)?;
        for record in &state.entropy {
            Self::record_entropy_event_in(conn, record)?;
        }

        let mut flushed = 0;
        for log in &state.pending_logs {
            let epic_id = state
                .tasks
                .iter()
                .find(|t| t.id == log.task_id)
                .map(|t| t.epic_id.as_str());
            if Self::append_agent_log_in(conn, log, epic_id, None)? {
                flushed += 1;
            }
        }
        debug!(project = project_id, logs = flushed, "Business tables synced");
        Ok(flushed)
    }

    pub fn get_project_state(&self, project_id: i64) -> Result<Option<ProjectSnapshot>> {
        let Some(project) = self.get_project(project_id)? else {
            return Ok(None);
        };
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, kind, title, content, status, version
             FROM documents WHERE project_id = ?1 ORDER BY created_at, id",
        )?;
        let raw_docs = stmt
            .query_map(params![project_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, u32>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut documents = Vec::with_capacity(raw_docs.len());
        for (id, kind, title, content, status, version) in raw_docs {
            documents.push(DocumentRecord {
                id,
                kind,
                title,
                content,
                status: parse_column::<DocumentStatus>(&status)?,
                version,
            });
        }

        let mut stmt = conn.prepare(
            "SELECT id, external_ref, description, depends_on, status
             FROM requirements WHERE project_id = ?1 ORDER BY created_at, id",
        )?;
        let raw_reqs = stmt
            .query_map(params![project_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut requirements = Vec::with_capacity(raw_reqs.len());
        for (id, external_ref, description, depends_on, status) in raw_reqs {
            requirements.push(RequirementRecord {
                id,
                external_ref,
                description,
                depends_on: serde_json::from_str(&depends_on)?,
                status: parse_column::<RequirementStatus>(&status)?,
            });
        }

        let mut stmt = conn.prepare(
            "SELECT id, name, phase_number, status FROM epics
             WHERE project_id = ?1 ORDER BY phase_number, id",
        )?;
        let raw_epics = stmt
            .query_map(params![project_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut epics = Vec::with_capacity(raw_epics.len());
        for (id, name, phase_number, status) in raw_epics {
            epics.push(EpicRecord {
                id,
                name,
                status: parse_column::<EpicStatus>(&status)?,
                phase_number,
                satisfied_requirement_ids: Vec::new(),
            });
        }

        let mut stmt = conn.prepare(
            "SELECT t.id, t.epic_id, t.name, t.description, t.status, t.assigned_role, t.phase,
                    t.depends_on, t.git_commit_hash
             FROM tasks t JOIN epics e ON t.epic_id = e.id
             WHERE e.project_id = ?1 ORDER BY t.created_at, t.id",
        )?;
        let raw_tasks = stmt
            .query_map(params![project_id], |row| {
                Ok(TaskRow {
                    id: row.get(0)?,
                    epic_id: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                    status: row.get(4)?,
                    assigned_role: row.get(5)?,
                    phase: row.get(6)?,
                    depends_on: row.get(7)?,
                    git_commit_hash: row.get(8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let tasks = raw_tasks
            .into_iter()
            .map(TaskRow::into_task)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(ProjectSnapshot {
            project,
            documents,
            requirements,
            epics,
            tasks,
        }))
    }
}

/// Delete the project's documents, requirements, epics and tasks whose ids
/// `state` no longer holds, such as the rows of a rejected plan.
fn prune_project_rows(conn: &Connection, state: &RunState) -> Result<()> {
    let project_id = state.project.project_id;
    let task_ids = id_list(state.tasks.iter().map(|t| t.id.as_str()))?;
    let epic_ids = id_list(state.epics.iter().map(|e| e.id.as_str()))?;
    let requirement_ids = id_list(state.requirements.iter().map(|r| r.id.as_str()))?;
    let document_ids = id_list(state.documents.iter().map(|d| d.id.as_str()))?;

    let mut pruned = conn
        .execute(
            "DELETE FROM tasks
             WHERE epic_id IN (SELECT id FROM epics WHERE project_id = ?1)
               AND id NOT IN (SELECT value FROM json_each(?2))",
            params![project_id, task_ids],
        )
        .context("Failed to prune tasks")?;
    for (table, ids) in [
        ("epics", &epic_ids),
        ("requirements", &requirement_ids),
        ("documents", &document_ids),
    ] {
        pruned += conn
            .execute(
                &format!(
                    "DELETE FROM {} WHERE project_id = ?1
                     AND id NOT IN (SELECT value FROM json_each(?2))",
                    table
                ),
                params![project_id, ids],
            )
            .with_context(|| format!("Failed to prune {}", table))?;
    }
    if pruned > 0 {
        debug!(project = project_id, rows = pruned, "Pruned rows missing from run state");
    }
    Ok(())
}

fn id_list<'a>(ids: impl Iterator<Item = &'a str>) -> Result<String> {
    Ok(serde_json::to_string(&ids.collect::<Vec<_>>())?)
}

struct TaskRow {
    id: String,
    epic_id: String,
    name: String,
    description: String,
    status: String,
    assigned_role: String,
    phase: String,
    depends_on: String,
    git_commit_hash: Option<String>,
}

impl TaskRow {
    fn into_task(self) -> Result<TaskRecord> {
        Ok(TaskRecord {
            id: self.id,
            epic_id: self.epic_id,
            name: self.name,
            description: self.description,
            status: parse_column::<TaskStatus>(&self.status)?,
            assigned_role: self.assigned_role,
            depends_on: serde_json::from_str(&self.depends_on)
                .context("Invalid depends_on JSON in tasks row")?,
            phase: parse_column::<RefinementPhase>(&self.phase)?,
            git_commit_hash: self.git_commit_hash,
        })
    }
}

fn parse_column<T: FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse::<T>().map_err(|e| anyhow!(e))
}
