use std::time::Duration;

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::event::Event;
use super::merge::{self, MergeOutcome};
use super::window_counter::{WindowCounter, WindowSpec};
use crate::node::NodeName;

/// Point-in-time view of one identifier's counter
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CounterSnapshot {
    pub identifier: String,
    pub limit: u64,
    pub duration_ms: u64,
    pub current: u64,
    pub remaining: u64,
    pub window_start_ms: i64,
    pub reset_at_ms: i64,
}

/// What happened when a remote event was applied to a local counter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeReport {
    /// Decision this node would have made for the event's cost,
    /// evaluated immediately before the merge
    pub local_would_pass: bool,
    /// Local usage before the merge
    pub before: u64,
    /// Local usage after the merge
    pub current: u64,
    pub window_start_ms: i64,
    pub outcome: MergeOutcome,
}

/// Every rate-limited identifier gets a `WindowCounter` in here.
///
/// The map is sharded: an identifier's counter is only touched while its
/// entry is held, so operations on different identifiers run in parallel
/// and operations on one identifier are linearized.
#[derive(Debug)]
pub struct Limiter {
    node_name: NodeName,
    counters: DashMap<String, WindowCounter>,
}

impl Limiter {
    pub fn new(node_name: NodeName) -> Self {
        Self {
            node_name,
            counters: DashMap::new(),
        }
    }

    pub fn node_name(&self) -> &NodeName {
        &self.node_name
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Lock the identifier's counter, creating it with `spec` when missing.
    /// The entry stays locked while the guard lives.
    fn counter_mut(
        &self,
        identifier: &str,
        spec: WindowSpec,
        now: i64,
    ) -> RefMut<'_, String, WindowCounter> {
        if let Some(counter) = self.counters.get_mut(identifier) {
            return counter;
        }
        self.counters
            .entry(identifier.to_string())
            .or_insert_with(|| WindowCounter::new(spec, now))
    }

    /// Make the local admission decision for one request.
    ///
    /// Always produces an Event. A spec that differs from the stored one
    /// replaces it and starts a fresh window.
    pub fn take(
        &self,
        identifier: &str,
        limit: u64,
        duration: Duration,
        cost: u64,
        now: i64,
    ) -> Event {
        let spec = WindowSpec { limit, duration };
        let (pass, current, window_start_ms) = {
            let mut counter = self.counter_mut(identifier, spec, now);
            if counter.reset_spec(spec, now) {
                debug!(
                    "[{}] Spec changed for '{}', counter reset",
                    self.node_name, identifier
                );
            }
            let (pass, current) = counter.try_admit(cost, now);
            (pass, current, counter.window_start())
        };
        debug!(
            "[{}] take '{}' cost={} pass={} current={}/{}",
            self.node_name, identifier, cost, pass, current, limit
        );
        Event {
            identifier: identifier.to_string(),
            limit,
            duration,
            cost,
            pass,
            current,
            origin: self.node_name.clone(),
            timestamp_ms: now,
            window_start_ms: Some(window_start_ms),
        }
    }

    /// Apply a peer's event to our counter with the max-merge rule.
    ///
    /// The remote cost is not charged again: the reporting node already did.
    /// An event without a known window start is treated as belonging to our
    /// current window. Only local takes change an identifier's spec, so an
    /// event carrying a different `(limit, duration)` than the stored counter
    /// is ignored.
    pub fn merge_event(&self, event: &Event, now: i64) -> MergeReport {
        let spec = event.spec();
        let mut counter = self.counter_mut(&event.identifier, spec, now);
        let local_would_pass = counter.would_admit(event.cost, now);
        let before = counter.current(now);
        let outcome = if counter.spec() != spec {
            debug!(
                "[{}] Ignoring '{}' from {}: stale spec {}/{}ms",
                self.node_name,
                event.identifier,
                event.origin,
                event.limit,
                event.duration_ms()
            );
            MergeOutcome::Ignored
        } else {
            match event.window_start_ms {
                Some(remote_start) => counter.merge_remote(event.current, remote_start, now),
                None => counter.merge_current_window(event.current, now),
            }
        };
        MergeReport {
            local_would_pass,
            before,
            current: counter.current(now),
            window_start_ms: counter.window_start(),
            outcome,
        }
    }

    /// Usage in the identifier's current window; 0 when unknown or elapsed
    pub fn current(&self, identifier: &str, now: i64) -> u64 {
        self.counters
            .get(identifier)
            .map(|counter| counter.current(now))
            .unwrap_or(0)
    }

    /// Apply a corrected count returned by a peer. Only identifiers we already
    /// track are updated; returns `None` otherwise.
    pub fn apply_update(
        &self,
        identifier: &str,
        current: u64,
        window_start_ms: Option<i64>,
        now: i64,
    ) -> Option<MergeOutcome> {
        let mut counter = self.counters.get_mut(identifier)?;
        let outcome = match window_start_ms {
            Some(remote_start) => counter.merge_remote(current, remote_start, now),
            None => counter.merge_current_window(current, now),
        };
        Some(outcome)
    }

    /// Current view of an identifier, without charging anything
    pub fn snapshot(&self, identifier: &str, now: i64) -> Option<CounterSnapshot> {
        self.counters.get(identifier).map(|counter| {
            let spec = counter.spec();
            let expired = counter.is_expired(now);
            let aligned = merge::window_start(now, spec.duration_ms());
            CounterSnapshot {
                identifier: identifier.to_string(),
                limit: spec.limit,
                duration_ms: u64::try_from(spec.duration.as_millis()).unwrap_or(u64::MAX),
                current: counter.current(now),
                remaining: counter.remaining(now),
                window_start_ms: if expired { aligned } else { counter.window_start() },
                reset_at_ms: if expired {
                    aligned.saturating_add(spec.duration_ms())
                } else {
                    counter.reset_at()
                },
            }
        })
    }

    /// Drop counters whose window closed more than one full window ago,
    /// to keep the map from growing endlessly. Returns how many were removed.
    pub fn expire_keys(&self, now: i64) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_identifier, counter| {
            now < counter.reset_at().saturating_add(counter.spec().duration_ms())
        });
        let removed = before.saturating_sub(self.counters.len());
        if removed > 0 {
            debug!("[{}] Expired {} counters", self.node_name, removed);
        }
        removed
    }
}
