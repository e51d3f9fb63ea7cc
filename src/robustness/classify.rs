use crate::state::ErrorClass;

const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "rate limit",
    "econnreset",
    "econnrefused",
    "connection reset",
    "connection refused",
    "network",
    "503",
    "502",
    "504",
    "429",
];

const LOGIC_MARKERS: &[&str] = &[
    "typeerror",
    "referenceerror",
    "assertion",
    "invariant",
    "cannot read",
    "is not a function",
    "undefined is not",
    "null pointer",
    "unwrap on a none",
];

/// Keyword heuristic over the lowercased message. Transient markers win.
pub fn classify_error(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        ErrorClass::Transient
    } else if LOGIC_MARKERS.iter().any(|m| lower.contains(m)) {
        ErrorClass::Logic
    } else {
        ErrorClass::Unknown
    }
}
