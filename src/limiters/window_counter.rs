//! Fixed-window, cost-weighted counter
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::merge::{self, MergeOutcome, WindowRelation};
use crate::error::Result;
use crate::validation_error;

/// Quota definition: at most `limit` cost units per `duration`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct WindowSpec {
    pub limit: u64,
    pub duration: Duration,
}

impl WindowSpec {
    /// Build a validated spec. Both limit and duration must be positive.
    pub fn new(limit: u64, duration: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(validation_error!("limit must be positive"));
        }
        if duration.as_millis() == 0 {
            return Err(validation_error!("duration must be at least 1ms"));
        }
        Ok(Self { limit, duration })
    }

    pub fn from_millis(limit: u64, duration_ms: u64) -> Result<Self> {
        Self::new(limit, Duration::from_millis(duration_ms))
    }

    pub fn duration_ms(&self) -> i64 {
        i64::try_from(self.duration.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Per-identifier state: how much cost has been admitted since `window_start`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowCounter {
    spec: WindowSpec,
    window_start: i64,
    used: u64,
}

impl WindowCounter {
    pub fn new(spec: WindowSpec, now: i64) -> Self {
        Self {
            spec,
            window_start: merge::window_start(now, spec.duration_ms()),
            used: 0,
        }
    }

    pub fn spec(&self) -> WindowSpec {
        self.spec
    }

    pub fn window_start(&self) -> i64 {
        self.window_start
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    /// Timestamp (ms) at which the current window closes
    pub fn reset_at(&self) -> i64 {
        self.window_start.saturating_add(self.spec.duration_ms())
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.reset_at()
    }

    /// Replace the spec, discarding all accumulated state.
    /// Returns true when the spec actually changed.
    pub fn reset_spec(&mut self, spec: WindowSpec, now: i64) -> bool {
        if self.spec == spec {
            return false;
        }
        *self = Self::new(spec, now);
        true
    }

    /// Open the aligned window containing `now` if the current one has elapsed
    fn roll(&mut self, now: i64) {
        if self.is_expired(now) {
            self.window_start = merge::window_start(now, self.spec.duration_ms());
            self.used = 0;
        }
    }

    /// Usage as seen at `now`, without opening a new window
    pub fn current(&self, now: i64) -> u64 {
        if self.is_expired(now) {
            0
        } else {
            self.used
        }
    }

    pub fn remaining(&self, now: i64) -> u64 {
        self.spec.limit.saturating_sub(self.current(now))
    }

    /// Would a request of `cost` be admitted at `now`? Does not charge anything.
    pub fn would_admit(&self, cost: u64, now: i64) -> bool {
        cost == 0
            || self
                .current(now)
                .checked_add(cost)
                .is_some_and(|total| total <= self.spec.limit)
    }

    /// Admit `cost` if it fits in the current window.
    /// Denied requests are not charged.
    pub fn try_admit(&mut self, cost: u64, now: i64) -> (bool, u64) {
        self.roll(now);
        if cost == 0 {
            return (true, self.used);
        }
        match self.used.checked_add(cost) {
            Some(total) if total <= self.spec.limit => {
                self.used = total;
                (true, self.used)
            }
            _ => (false, self.used),
        }
    }

    /// Combine a remote `used` value reported for the window starting at
    /// `remote_window_start`.
    pub fn merge_remote(&mut self, remote_used: u64, remote_window_start: i64, now: i64) -> MergeOutcome {
        let relation = merge::classify(
            self.window_start,
            remote_window_start,
            self.spec.duration_ms(),
            now,
        );
        match relation {
            WindowRelation::Same => {
                if remote_used > self.used {
                    self.used = remote_used;
                    MergeOutcome::Raised
                } else {
                    MergeOutcome::Unchanged
                }
            }
            WindowRelation::Newer => {
                self.window_start = remote_window_start;
                self.used = remote_used;
                MergeOutcome::Reset
            }
            WindowRelation::Older | WindowRelation::Expired => MergeOutcome::Ignored,
        }
    }

    /// Combine a remote `used` value known to belong to our current window
    pub fn merge_current_window(&mut self, remote_used: u64, now: i64) -> MergeOutcome {
        self.roll(now);
        let window_start = self.window_start;
        self.merge_remote(remote_used, window_start, now)
    }
}
