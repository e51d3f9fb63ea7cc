//! Crash recovery and relational rollback.
//!
//! On restart the caller asks [`RecoveryManager`] for the last committed
//! checkpoint of a run. [`RelationalRollback`] optionally discards business
//! rows written after a chosen checkpoint so the tables agree with it again.

mod manager;
mod rollback;

pub use manager::{RecoveryInfo, RecoveryManager, RecoverySummary};
pub use rollback::{RelationalRollback, RollbackReport};
