//! SQLite persistence.
//!
//! | Module       | Contents                                              |
//! |--------------|-------------------------------------------------------|
//! | `db`         | Connection handle, pragmas, migrations, timestamps    |
//! | `checkpoint` | Checkpoint + pending-write store keyed by thread      |
//! | `project`    | Business tables: projects, requirements, epics, tasks |

pub mod checkpoint;
pub mod db;
pub mod project;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSource, CheckpointStore,
    CheckpointTuple, PendingWrite, StoredWrite,
};
pub use db::{DbHandle, format_timestamp, now_timestamp};
pub use project::{AgentLogRow, ProjectRepository, ProjectSnapshot, StoredProject};
