//! Failure handling: error classification, secret masking, retry and
//! escalation budgets, and stuck-loop detection.
//!
//! Every counter lives on the [`RunState`](crate::state::RunState) passed in;
//! nothing here keeps state of its own.

mod budget;
mod classify;
mod error_node;
mod masking;

pub use budget::{
    CONSECUTIVE_ERROR_PIVOT_THRESHOLD, ENTROPY_LOOP_THRESHOLD, MAX_IMPLEMENTATION_TURNS,
    check_turn_budget, detect_entropy, hash_output, record_entropy, record_implementation_turn,
    reset_turn_budget,
};
pub(crate) use budget::schedule_pivot;
pub use classify::classify_error;
pub use error_node::{
    NodeFailure, StaleTask, apply_pivot, build_error_record, count_consecutive_errors,
    find_stale_or_dirty_states, handle_error, retry_target, route_after_error,
};
pub use masking::{MaskResult, PatternMasker, SecretMasker, mask_sensitive_data};
