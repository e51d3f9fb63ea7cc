//! Durable orchestration engine for long-running, approval-gated project
//! pipelines.
//!
//! | Module       | Responsibility                                          |
//! |--------------|---------------------------------------------------------|
//! | `state`      | Run state snapshot and status vocabularies              |
//! | `dag`        | Task-graph cycle and phase-order validation             |
//! | `robustness` | Error node, masking, retry/turn budgets, loop detection |
//! | `graph`      | Pipeline state machine and approval gates               |
//! | `store`      | SQLite checkpoints and business tables                  |
//! | `recovery`   | Crash recovery and relational rollback                  |
//! | `tracker`    | Git workspace checks and commits                        |
//! | `config`     | `pipewright.toml` loading with env/CLI overrides        |
//! | `logging`    | Tracing subscriber setup                                |
//! | `errors`     | Typed error enums per subsystem                         |

pub mod config;
pub mod dag;
pub mod errors;
pub mod graph;
pub mod logging;
pub mod recovery;
pub mod robustness;
pub mod state;
pub mod store;
pub mod tracker;
