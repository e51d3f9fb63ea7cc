use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::db::DbHandle;
use crate::errors::CheckpointError;
use crate::graph::NodeId;
use crate::robustness::{PatternMasker, SecretMasker};
use crate::state::RunState;

/// Serialization tag written to the `type` columns.
const PAYLOAD_TYPE: &str = "json";

/// Current checkpoint payload version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Addresses a thread, and optionally one checkpoint within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub thread_id: String,
    #[serde(default)]
    pub checkpoint_ns: String,
    #[serde(default)]
    pub checkpoint_id: Option<String>,
}

impl CheckpointConfig {
    pub fn for_thread(thread_id: &str) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            checkpoint_ns: String::new(),
            checkpoint_id: None,
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.checkpoint_ns = namespace.to_string();
        self
    }

    pub fn at(&self, checkpoint_id: &str) -> Self {
        Self {
            checkpoint_id: Some(checkpoint_id.to_string()),
            ..self.clone()
        }
    }

    /// Same thread and namespace, no explicit checkpoint (i.e. "latest").
    pub fn latest(&self) -> Self {
        Self {
            checkpoint_id: None,
            ..self.clone()
        }
    }
}

/// The persisted checkpoint payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub v: u32,
    pub id: String,
    pub ts: DateTime<Utc>,
    pub state: RunState,
    /// Node the dispatcher enters when the run continues; `None` once the
    /// run has ended.
    pub next_node: Option<NodeId>,
}

impl Checkpoint {
    pub fn new(state: RunState, next_node: Option<NodeId>) -> Self {
        Self {
            v: CHECKPOINT_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            ts: Utc::now(),
            state,
            next_node,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    /// Initial state supplied by the caller.
    Input,
    /// Produced by a node step.
    Loop,
    /// Produced by applying a resume signal at a gate.
    Resume,
    /// Operator edit applied outside node execution.
    Update,
}

impl CheckpointSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Loop => "loop",
            Self::Resume => "resume",
            Self::Update => "update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub source: CheckpointSource,
    pub step: i64,
    #[serde(default)]
    pub node: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointTuple {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub parent_config: Option<CheckpointConfig>,
    pub created_at: String,
}

/// One channel update recorded alongside a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub channel: String,
    pub value: Value,
}

impl PendingWrite {
    pub fn new(channel: &str, value: Value) -> Self {
        Self {
            channel: channel.to_string(),
            value,
        }
    }
}

/// A pending write as read back from storage (already masked).
#[derive(Debug, Clone, PartialEq)]
pub struct StoredWrite {
    pub task_id: String,
    pub idx: i64,
    pub channel: String,
    pub value: Value,
}

/// Durable, transactional checkpoint persistence over [`DbHandle`].
#[derive(Clone)]
pub struct CheckpointStore {
    db: DbHandle,
    masker: Arc<dyn SecretMasker>,
}

impl CheckpointStore {
    pub fn new(db: DbHandle) -> Self {
        Self::with_masker(db, Arc::new(PatternMasker))
    }

    pub fn with_masker(db: DbHandle, masker: Arc<dyn SecretMasker>) -> Self {
        Self { db, masker }
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    /// Commit a checkpoint whose parent is the checkpoint addressed by `config`.
    ///
    /// Runs in a single transaction; on failure nothing is written and the
    /// previous checkpoint stays current.
    pub fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: &Checkpoint,
        metadata: &CheckpointMetadata,
    ) -> Result<CheckpointConfig, CheckpointError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let next = self.put_in(&tx, config, checkpoint, metadata)?;
        tx.commit()?;
        Ok(next)
    }

    /// [`put`](Self::put) inside a transaction the caller owns.
    pub fn put_in(
        &self,
        conn: &Connection,
        config: &CheckpointConfig,
        checkpoint: &Checkpoint,
        metadata: &CheckpointMetadata,
    ) -> Result<CheckpointConfig, CheckpointError> {
        let checkpoint_blob = serde_json::to_vec(checkpoint)?;
        let metadata_blob = serde_json::to_vec(metadata)?;
        conn.execute(
            "INSERT OR REPLACE INTO checkpoints
                 (thread_id, checkpoint_ns, checkpoint_id, parent_checkpoint_id, type, checkpoint, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                config.thread_id,
                config.checkpoint_ns,
                checkpoint.id,
                config.checkpoint_id,
                PAYLOAD_TYPE,
                checkpoint_blob,
                metadata_blob,
            ],
        )?;

        debug!(
            thread = %config.thread_id,
            checkpoint = %checkpoint.id,
            parent = ?config.checkpoint_id,
            step = metadata.step,
            "Checkpoint written"
        );
        Ok(config.at(&checkpoint.id))
    }

    /// The checkpoint named by `config`, or the latest one when it names none.
    pub fn get_tuple(
        &self,
        config: &CheckpointConfig,
    ) -> Result<Option<CheckpointTuple>, CheckpointError> {
        let conn = self.lock()?;
        let row = match &config.checkpoint_id {
            Some(id) => conn
                .query_row(
                    "SELECT checkpoint_id, parent_checkpoint_id, checkpoint, metadata, created_at
                     FROM checkpoints
                     WHERE thread_id = ?1 AND checkpoint_ns = ?2 AND checkpoint_id = ?3",
                    params![config.thread_id, config.checkpoint_ns, id],
                    RawRow::from_row,
                )
                .optional()?,
            None => conn
                .query_row(
                    "SELECT checkpoint_id, parent_checkpoint_id, checkpoint, metadata, created_at
                     FROM checkpoints
                     WHERE thread_id = ?1 AND checkpoint_ns = ?2
                     ORDER BY rowid DESC LIMIT 1",
                    params![config.thread_id, config.checkpoint_ns],
                    RawRow::from_row,
                )
                .optional()?,
        };
        row.map(|r| r.into_tuple(config)).transpose()
    }

    /// Checkpoints for the thread and namespace, newest first.
    pub fn list(
        &self,
        config: &CheckpointConfig,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>, CheckpointError> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT checkpoint_id, parent_checkpoint_id, checkpoint, metadata, created_at
             FROM checkpoints
             WHERE thread_id = ?1 AND checkpoint_ns = ?2
             ORDER BY rowid DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                params![config.thread_id, config.checkpoint_ns, limit],
                RawRow::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|r| r.into_tuple(config)).collect()
    }

    /// Persist channel writes for the checkpoint addressed by `config`, one
    /// row per write, masking every string in each value first.
    pub fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: &[PendingWrite],
        task_id: &str,
    ) -> Result<(), CheckpointError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        self.put_writes_in(&tx, config, writes, task_id)?;
        tx.commit()?;
        Ok(())
    }

    /// [`put_writes`](Self::put_writes) inside a transaction the caller owns.
    pub fn put_writes_in(
        &self,
        conn: &Connection,
        config: &CheckpointConfig,
        writes: &[PendingWrite],
        task_id: &str,
    ) -> Result<(), CheckpointError> {
        let checkpoint_id = config.checkpoint_id.clone().unwrap_or_default();
        for (idx, write) in writes.iter().enumerate() {
            let (masked, hits) = mask_value(self.masker.as_ref(), &write.value);
            if hits > 0 {
                warn!(
                    thread = %config.thread_id,
                    channel = %write.channel,
                    hits,
                    "Redacted secrets from pending write"
                );
            }
            conn.execute(
                "INSERT OR REPLACE INTO checkpoint_writes
                     (thread_id, checkpoint_ns, checkpoint_id, task_id, idx, channel, type, value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    config.thread_id,
                    config.checkpoint_ns,
                    checkpoint_id,
                    task_id,
                    idx as i64,
                    write.channel,
                    PAYLOAD_TYPE,
                    serde_json::to_vec(&masked)?,
                ],
            )?;
        }
        Ok(())
    }

    /// Pending writes recorded against the checkpoint addressed by `config`.
    pub fn get_writes(&self, config: &CheckpointConfig) -> Result<Vec<StoredWrite>, CheckpointError> {
        let checkpoint_id = config.checkpoint_id.clone().unwrap_or_default();
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT task_id, idx, channel, value FROM checkpoint_writes
             WHERE thread_id = ?1 AND checkpoint_ns = ?2 AND checkpoint_id = ?3
             ORDER BY task_id, idx",
        )?;
        let rows = stmt
            .query_map(
                params![config.thread_id, config.checkpoint_ns, checkpoint_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(task_id, idx, channel, value)| -> Result<StoredWrite, CheckpointError> {
                Ok(StoredWrite {
                    task_id,
                    idx,
                    channel,
                    value: serde_json::from_slice(&value)?,
                })
            })
            .collect()
    }

    /// Number of checkpoints stored for a thread across all namespaces.
    pub fn count(&self, thread_id: &str) -> Result<u64, CheckpointError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM checkpoints WHERE thread_id = ?1",
            params![thread_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Remove every checkpoint and pending write for a thread, all or nothing.
    pub fn delete_thread(&self, thread_id: &str) -> Result<(), CheckpointError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM checkpoint_writes WHERE thread_id = ?1",
            params![thread_id],
        )?;
        tx.execute("DELETE FROM checkpoints WHERE thread_id = ?1", params![thread_id])?;
        tx.commit()?;
        debug!(thread = %thread_id, "Thread checkpoints deleted");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CheckpointError> {
        self.db.lock_sync().map_err(|_| CheckpointError::LockPoisoned)
    }
}

struct RawRow {
    checkpoint_id: String,
    parent_checkpoint_id: Option<String>,
    checkpoint: Vec<u8>,
    metadata: Vec<u8>,
    created_at: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            checkpoint_id: row.get(0)?,
            parent_checkpoint_id: row.get(1)?,
            checkpoint: row.get(2)?,
            metadata: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_tuple(self, config: &CheckpointConfig) -> Result<CheckpointTuple, CheckpointError> {
        Ok(CheckpointTuple {
            config: config.at(&self.checkpoint_id),
            checkpoint: serde_json::from_slice(&self.checkpoint)?,
            metadata: serde_json::from_slice(&self.metadata)?,
            parent_config: self.parent_checkpoint_id.as_deref().map(|p| config.at(p)),
            created_at: self.created_at,
        })
    }
}

/// Mask every string leaf of a JSON value. Returns the masked copy and the
/// total number of redactions.
fn mask_value(masker: &dyn SecretMasker, value: &Value) -> (Value, usize) {
    match value {
        Value::String(s) => {
            let result = masker.mask(s);
            (Value::String(result.masked), result.hit_count)
        }
        Value::Array(items) => {
            let mut hits = 0;
            let masked = items
                .iter()
                .map(|item| {
                    let (v, h) = mask_value(masker, item);
                    hits += h;
                    v
                })
                .collect();
            (Value::Array(masked), hits)
        }
        Value::Object(map) => {
            let mut hits = 0;
            let masked = map
                .iter()
                .map(|(k, item)| {
                    let (v, h) = mask_value(masker, item);
                    hits += h;
                    (k.clone(), v)
                })
                .collect();
            (Value::Object(masked), hits)
        }
        other => (other.clone(), 0),
    }
}
