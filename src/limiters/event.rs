use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::window_counter::WindowSpec;
use crate::node::NodeName;

/// One admission decision, produced exactly once per `take`.
///
/// Events are immutable once built: the reconciler forwards them to the
/// identifier's origin and the origin merges them into its own counters.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Event {
    pub identifier: String,
    pub limit: u64,
    pub duration: Duration,
    pub cost: u64,
    /// Decision made by the originating node
    pub pass: bool,
    /// Counter value at decision time (after charging `cost` if admitted)
    pub current: u64,
    pub origin: NodeName,
    pub timestamp_ms: i64,
    /// Start of the window the decision was made in, when known
    pub window_start_ms: Option<i64>,
}

impl Event {
    pub fn spec(&self) -> WindowSpec {
        WindowSpec {
            limit: self.limit,
            duration: self.duration,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.current)
    }

    /// When the window this decision belongs to closes
    pub fn reset_at_ms(&self) -> Option<i64> {
        self.window_start_ms
            .map(|start| start.saturating_add(self.spec().duration_ms()))
    }
}
