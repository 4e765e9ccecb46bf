/// Message identity for ESM deduplication
///
/// Every event is identified by its (origin, event sequence) pair, folded
/// into a single 32-bit id so independent nodes agree on it without any
/// coordination.
use std::fmt;

use crate::MAX_ORIGIN_COUNT;

/// Stable integer id of a simulated node
pub type NodeId = u32;

/// Globally comparable 32-bit message id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u32);

impl MessageId {
    /// Sentinel carried by instantaneous (non-wire) propagation triggers
    pub const INSTANTANEOUS: MessageId = MessageId(0);

    /// Wrap a raw id value
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw id value
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derive the message id of `(origin, event_sequence)`
///
/// # Panics
/// If either component is not below `MAX_ORIGIN_COUNT`. The wire carries
/// both values separately, so this only fires on a caller bug.
pub fn compute_message_id(origin: NodeId, event_sequence: u32) -> MessageId {
    assert!(origin < MAX_ORIGIN_COUNT, "origin {} out of bound {}", origin, MAX_ORIGIN_COUNT);
    assert!(
        event_sequence < MAX_ORIGIN_COUNT,
        "event sequence {} out of bound {}",
        event_sequence,
        MAX_ORIGIN_COUNT
    );
    MessageId(origin * MAX_ORIGIN_COUNT + event_sequence)
}
