//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module        | Commands handled                          |
//! |---------------|-------------------------------------------|
//! | `checkpoints` | `Checkpoints`, `Status`, `Purge`          |
//! | `recover`     | `Recover`, `Rollback`                     |
//! | `dag`         | `ValidateDag`                             |
//! | `config`      | `Config`                                  |

pub mod checkpoints;
pub mod config;
pub mod dag;
pub mod recover;

pub use checkpoints::{cmd_checkpoints, cmd_purge, cmd_status};
pub use config::cmd_config;
pub use dag::cmd_validate_dag;
pub use recover::{cmd_recover, cmd_rollback};
