//! C1 — monotonic timestamps and session identifiers.

use std::sync::OnceLock;
use std::time::Instant;

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Milliseconds elapsed since this process started handling sessions.
///
/// Not a wall-clock timestamp — callers that need to correlate across
/// processes should rely on relative ordering within a session only, exactly
/// as spec.md §3 requires ("monotonic timestamps (ms)").
pub fn now_ms() -> u64 {
    let start = PROCESS_START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

/// A fresh, globally-unique session identifier.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
