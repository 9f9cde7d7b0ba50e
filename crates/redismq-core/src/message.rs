use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HandlerError;

/// A unit of work as it is stored in queue lists.
///
/// The JSON form is the wire format shared by every producer, consumer and
/// reclaimer on the keyspace: `{uuid, attempts, data, time, ttl, error?}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub uuid: Uuid,
    /// Starts at 1 and grows by exactly one on every failure disposition.
    pub attempts: u32,
    /// Opaque payload handed to the handler.
    pub data: serde_json::Value,
    /// Creation time, epoch milliseconds.
    pub time: u64,
    /// Time to live in milliseconds; 0 means no message-level TTL.
    pub ttl: u64,
    /// Set by the last failed attempt. Absent after an orphan recovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MessageError>,
}

/// The failure recorded on a message by its last failed attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageError {
    #[serde(default)]
    pub reason: String,
}

impl From<HandlerError> for MessageError {
    fn from(err: HandlerError) -> Self {
        Self { reason: err.reason }
    }
}

impl Message {
    /// Build a fresh message with `attempts = 1` stamped with the current time.
    pub fn new(data: serde_json::Value, ttl_ms: u64) -> Self {
        Self {
            uuid: Self::new_id(),
            attempts: 1,
            data,
            time: now_ms(),
            ttl: ttl_ms,
            error: None,
        }
    }

    /// Generate a new UUIDv7 message ID.
    pub fn new_id() -> Uuid {
        Uuid::now_v7()
    }

    /// Whether the message outlived its own TTL or the consumer's TTL,
    /// whichever are non-zero.
    pub fn is_expired(&self, now_ms: u64, consumer_ttl_ms: u64) -> bool {
        let elapsed = |ttl: u64| ttl != 0 && self.time.saturating_add(ttl) < now_ms;
        elapsed(self.ttl) || elapsed(consumer_ttl_ms)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
