//! The pipeline state machine.
//!
//! ```text
//! research -> design -> approve_design -> distill -> approve_task_dag -> implement -> verify
//!                ^            |              ^             |               ^   |         |
//!                +- rejected -+              +- rejected --+               |   v         |
//!                                                                          | pivot_agent |
//!                                            distill <---- epic open ------+-------------+
//! ```
//!
//! Every node failure goes to `error`, which retries the failing node or
//! escalates to `pivot_agent` after three identical failures.
//!
//! | Module    | Contents                                            |
//! |-----------|-----------------------------------------------------|
//! | `nodes`   | Node ids and pure state transitions                 |
//! | `hitl`    | Approval gates: suspension payload, resume decisions |
//! | `routing` | Edge selection after each node                      |
//! | `agents`  | Collaborator trait producing node content           |
//! | `engine`  | Dispatcher, checkpointing, entry points             |

pub mod agents;
pub mod engine;
pub mod hitl;
pub mod nodes;
pub mod routing;

pub use agents::{DistillPlan, PipelineAgents, TurnOutput, VerifyOutcome};
pub use engine::{GraphEngine, RunOutcome, RunReport};
pub use hitl::{InterruptPayload, apply_resume, route_after_gate};
pub use nodes::NodeId;
pub use routing::{Transition, route, route_after_verify};
