//! Messages exchanged with callers (JSON) and between nodes (bincode).
use std::time::Duration;

use bincode::{Decode, Encode};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::limiters::{Event, WindowSpec};
use crate::node::NodeName;
use crate::{malformed_event, validation_error};

fn bincode_config() -> impl bincode::config::Config {
    bincode::config::standard().with_big_endian()
}

/// Public admission request
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TakeRequest {
    pub identifier: String,
    pub limit: u64,
    pub duration_ms: u64,
    #[serde(default = "default_cost")]
    pub cost: u64,
}

fn default_cost() -> u64 {
    1
}

impl TakeRequest {
    pub fn new(identifier: impl Into<String>, limit: u64, duration_ms: u64, cost: u64) -> Self {
        Self {
            identifier: identifier.into(),
            limit,
            duration_ms,
            cost,
        }
    }

    pub fn validate(&self) -> Result<WindowSpec> {
        if self.identifier.is_empty() {
            return Err(validation_error!("identifier must not be empty"));
        }
        WindowSpec::from_millis(self.limit, self.duration_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TakeResponse {
    pub identifier: String,
    pub pass: bool,
    pub current: u64,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at_ms: Option<i64>,
}

impl From<&Event> for TakeResponse {
    fn from(event: &Event) -> Self {
        Self {
            identifier: event.identifier.clone(),
            pass: event.pass,
            current: event.current,
            limit: event.limit,
            remaining: event.remaining(),
            reset_at_ms: event.reset_at_ms(),
        }
    }
}

/// An `Event` as it travels between nodes.
/// `window_start_ms` is `None` when the sender did not know its window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct WireEvent {
    pub identifier: String,
    pub limit: u64,
    pub duration_ms: u64,
    pub cost: u64,
    pub pass: bool,
    pub current: u64,
    pub timestamp_ms: i64,
    pub window_start_ms: Option<i64>,
}

impl WireEvent {
    /// Check the fields a counter needs. Anything else is accepted as sent.
    pub fn validate(&self) -> Result<WindowSpec> {
        if self.identifier.is_empty() {
            return Err(malformed_event!("empty identifier"));
        }
        if self.limit == 0 {
            return Err(malformed_event!("'{}' has limit 0", self.identifier));
        }
        if self.duration_ms == 0 {
            return Err(malformed_event!("'{}' has duration 0", self.identifier));
        }
        Ok(WindowSpec {
            limit: self.limit,
            duration: Duration::from_millis(self.duration_ms),
        })
    }

    pub fn into_event(self, origin: &NodeName) -> Result<Event> {
        self.validate()?;
        Ok(Event {
            identifier: self.identifier,
            limit: self.limit,
            duration: Duration::from_millis(self.duration_ms),
            cost: self.cost,
            pass: self.pass,
            current: self.current,
            origin: origin.clone(),
            timestamp_ms: self.timestamp_ms,
            window_start_ms: self.window_start_ms,
        })
    }
}

impl From<&Event> for WireEvent {
    fn from(event: &Event) -> Self {
        Self {
            identifier: event.identifier.clone(),
            limit: event.limit,
            duration_ms: event.duration_ms(),
            cost: event.cost,
            pass: event.pass,
            current: event.current,
            timestamp_ms: event.timestamp_ms,
            window_start_ms: event.window_start_ms,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct PushPullRequest {
    pub origin: String,
    pub events: Vec<WireEvent>,
}

impl PushPullRequest {
    pub fn new(origin: &NodeName, events: &[Event]) -> Self {
        Self {
            origin: origin.to_string(),
            events: events.iter().map(WireEvent::from).collect(),
        }
    }

    pub fn serialize(&self) -> Result<Bytes> {
        let encoded = bincode::encode_to_vec(self, bincode_config())?;
        Ok(Bytes::from(encoded))
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let (request, _len) = bincode::decode_from_slice(data, bincode_config())?;
        Ok(request)
    }
}

/// Corrected count for one identifier, as known by the responding node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct PushPullUpdate {
    pub identifier: String,
    pub current: u64,
    pub window_start_ms: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct PushPullResponse {
    pub updates: Vec<PushPullUpdate>,
}

impl PushPullResponse {
    pub fn serialize(&self) -> Result<Bytes> {
        let encoded = bincode::encode_to_vec(self, bincode_config())?;
        Ok(Bytes::from(encoded))
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let (response, _len) = bincode::decode_from_slice(data, bincode_config())?;
        Ok(response)
    }
}
