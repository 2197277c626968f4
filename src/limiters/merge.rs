//! Window alignment rules for reconciling counters between nodes.
//!
//! Windows are aligned to multiples of their duration since the Unix epoch,
//! so every node derives the same `window_start` for a given instant and two
//! counters describe the same window exactly when their starts are equal.
use serde::{Deserialize, Serialize};

/// How a remote window relates to the local one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowRelation {
    /// Same window start: combine with `max`
    Same,
    /// Remote window is later than ours: adopt it
    Newer,
    /// Remote window ended before ours began
    Older,
    /// Remote window has already elapsed
    Expired,
}

/// Result of applying a remote counter to a local one
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum MergeOutcome {
    /// Local `used` was raised to the remote value
    Raised,
    /// Local value already at or above the remote value
    Unchanged,
    /// Local window was replaced by the remote window
    Reset,
    /// Remote value belongs to an older or elapsed window
    Ignored,
}

/// Start of the aligned window containing `now`
pub fn window_start(now: i64, duration_ms: i64) -> i64 {
    now - now.rem_euclid(duration_ms.max(1))
}

/// Classify a remote window against the local one.
///
/// `duration_ms` must be the same for both windows; callers reset counters on
/// spec changes before classifying.
pub fn classify(local_start: i64, remote_start: i64, duration_ms: i64, now: i64) -> WindowRelation {
    if now >= remote_start.saturating_add(duration_ms) {
        WindowRelation::Expired
    } else if remote_start == local_start {
        WindowRelation::Same
    } else if remote_start > local_start {
        WindowRelation::Newer
    } else {
        WindowRelation::Older
    }
}
