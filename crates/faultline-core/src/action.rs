//! Intercepted-message events and the decisions taken on them.

use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Reserved delay value meaning "drop the message".
pub const DROP_DELAY: u32 = u32::MAX;

/// One intercepted inter-node message, as delivered by the external
/// interception process. Transient: created and consumed per message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketEvent {
    /// Sender node id.
    pub from: NodeId,
    /// Receiver node id.
    pub to: NodeId,
    /// Raw payload bytes as captured on the wire.
    pub payload: Vec<u8>,
    /// Arrival sequence number, per ordered pair.
    pub sequence: u64,
}

impl PacketEvent {
    /// The ordered pair this event belongs to.
    pub fn pair(&self) -> (NodeId, NodeId) {
        (self.from, self.to)
    }
}

/// The network action decided for one event.
///
/// `delay_ms == DROP_DELAY` means the message is dropped; `duplicates` is
/// the number of transmissions of the payload. A zero duplicate count is
/// equivalent to a drop and is normalized to the sentinel on construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDecision {
    /// Bytes to actually put on the wire (possibly mutated).
    pub payload: Vec<u8>,
    /// Delay before transmission in milliseconds, or [`DROP_DELAY`].
    pub delay_ms: u32,
    /// Number of transmissions; zero only in the normalized drop form.
    pub duplicates: u32,
}

impl ActionDecision {
    /// Build a decision, normalizing the drop forms.
    pub fn new(payload: Vec<u8>, delay_ms: u32, duplicates: u32) -> Self {
        if delay_ms == DROP_DELAY || duplicates == 0 {
            return Self::drop(payload);
        }
        Self {
            payload,
            delay_ms,
            duplicates,
        }
    }

    /// Forward immediately, once.
    pub fn send(payload: Vec<u8>) -> Self {
        Self {
            payload,
            delay_ms: 0,
            duplicates: 1,
        }
    }

    /// Forward once after `delay_ms` milliseconds.
    pub fn delay(payload: Vec<u8>, delay_ms: u32) -> Self {
        Self::new(payload, delay_ms, 1)
    }

    /// Never put the message on the wire.
    pub fn drop(payload: Vec<u8>) -> Self {
        Self {
            payload,
            delay_ms: DROP_DELAY,
            duplicates: 0,
        }
    }

    /// Forward `count` copies immediately.
    pub fn duplicate(payload: Vec<u8>, count: u32) -> Self {
        Self::new(payload, 0, count)
    }

    /// Whether this decision suppresses the message entirely.
    pub fn is_drop(&self) -> bool {
        self.delay_ms == DROP_DELAY
    }

    /// Short label for logs: `send`, `drop` or `delay:<ms>`.
    pub fn kind(&self) -> String {
        if self.is_drop() {
            "drop".to_string()
        } else if self.delay_ms == 0 {
            "send".to_string()
        } else {
            format!("delay:{}ms", self.delay_ms)
        }
    }
}
