/// Error types for ESM protocol operations
///
/// Covers wire encoding/decoding failures, configuration errors and
/// precondition violations of the protocol engine. History misses and
/// policy rejections are not errors and never show up here.
use std::fmt;
use std::time::Duration;

use crate::identity::{MessageId, NodeId};

/// Result type alias for ESM operations
pub type Result<T> = std::result::Result<T, EsmError>;

/// ESM protocol error enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EsmError {
    /// Serialization failed - record could not be archived
    SerializationError(String),

    /// Deserialization failed - corrupted packet or incompatible format
    DeserializationError(String),

    /// Physical-state checksum did not match its sub-header
    IntegrityCheckFailed { expected: u32, actual: u32 },

    /// Packet or record shorter/longer than the fixed layout requires
    InvalidPacketLength { expected: usize, received: usize },

    /// Configured message size cannot hold the mandatory headers
    BufferTooSmall { required: usize, available: usize },

    /// Node-scoped operation invoked before the protocol was attached to a node
    NotAttached,

    /// Mobility collaborator has no physical state for the sending node
    NoPhysicalState(NodeId),

    /// Origination time does not fit the wire's u64 nanosecond field
    TimestampOutOfRange(Duration),

    /// No history record exists for the given message
    UnknownEvent(MessageId),

    /// Policy name did not match any known propagation policy
    UnknownPolicy(String),
}

impl fmt::Display for EsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Self::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Self::IntegrityCheckFailed { expected, actual } => {
                write!(f, "Integrity check failed: expected CRC32 {:#x}, got {:#x}", expected, actual)
            }
            Self::InvalidPacketLength { expected, received } => {
                write!(f, "Invalid packet length: expected {}, received {}", expected, received)
            }
            Self::BufferTooSmall { required, available } => {
                write!(f, "Buffer too small: required {}, available {}", required, available)
            }
            Self::NotAttached => write!(f, "Protocol is not attached to a node"),
            Self::NoPhysicalState(node) => write!(f, "No physical state for node {}", node),
            Self::TimestampOutOfRange(ts) => {
                write!(f, "Timestamp {:?} exceeds the wire range of u64 nanoseconds", ts)
            }
            Self::UnknownEvent(id) => write!(f, "Unknown event: message id {}", id),
            Self::UnknownPolicy(name) => write!(f, "Unknown propagation policy: {}", name),
        }
    }
}

impl std::error::Error for EsmError {}
