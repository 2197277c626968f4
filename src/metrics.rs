//! Metric names and recording helpers.
//!
//! Everything goes through the `metrics` facade; without an installed
//! recorder the calls are no-ops.
use std::sync::OnceLock;
use std::time::Duration;

use ::metrics::{counter, describe_counter, describe_histogram, histogram};

pub const ACCURACY: &str = "ratelimit_accuracy";
pub const PUSHPULL_REJECTED: &str = "ratelimit_pushpull_rejected_total";
pub const OUTBOUND_DROPPED: &str = "ratelimit_outbound_dropped_total";
pub const PUSH_FAILURES: &str = "ratelimit_push_failures_total";
pub const PUSH_DURATION: &str = "ratelimit_push_duration_seconds";

static METRICS_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Register descriptions once per process.
pub fn init_metrics() {
    if METRICS_INITIALIZED.set(true).is_err() {
        return;
    }

    describe_counter!(
        ACCURACY,
        "Inbound events by whether the local decision agreed with the sender's"
    );
    describe_counter!(
        PUSHPULL_REJECTED,
        "Malformed inbound events skipped by push-pull"
    );
    describe_counter!(
        OUTBOUND_DROPPED,
        "Outbound events evicted from a full peer queue"
    );
    describe_counter!(PUSH_FAILURES, "Failed or timed-out pushes to a peer");
    describe_histogram!(PUSH_DURATION, "Push-pull round trip in seconds");
}

pub fn record_accuracy(agreement: bool) {
    let label = if agreement { "true" } else { "false" };
    counter!(ACCURACY, "agreement" => label).increment(1);
}

pub fn record_rejected() {
    counter!(PUSHPULL_REJECTED).increment(1);
}

pub fn record_dropped(peer: &str, count: u64) {
    counter!(OUTBOUND_DROPPED, "peer" => peer.to_string()).increment(count);
}

pub fn record_push_failure(peer: &str) {
    counter!(PUSH_FAILURES, "peer" => peer.to_string()).increment(1);
}

pub fn record_push_duration(peer: &str, elapsed: Duration) {
    histogram!(PUSH_DURATION, "peer" => peer.to_string()).record(elapsed.as_secs_f64());
}
