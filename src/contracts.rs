/// Wire records for the ESM protocol
///
/// All records are archived with rkyv and have a fixed archived size, so
/// every header in a packet can be located without length prefixes.
/// Timestamps travel as nanoseconds of simulated time.
use std::mem::size_of;
use std::time::Duration;

use rkyv::{Archive, Deserialize, Serialize};

use crate::errors::{EsmError, Result};
use crate::identity::{compute_message_id, MessageId, NodeId};

/// ESM header - identifies the event a packet carries
///
/// # Memory Layout
/// Archived size: 16 bytes
/// - origin_id: 4 bytes (u32)
/// - event_sequence: 4 bytes (u32)
/// - origin_timestamp_ns: 8 bytes (u64)
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct EsmHeader {
    /// Node that originated the event
    pub origin_id: u32,

    /// Per-origin monotonic event counter
    pub event_sequence: u32,

    /// Origination time, nanoseconds since simulation start
    pub origin_timestamp_ns: u64,
}

impl EsmHeader {
    /// Archived size in bytes
    pub const SIZE: usize = size_of::<ArchivedEsmHeader>();

    /// # Errors
    /// `TimestampOutOfRange` if `origin_timestamp` needs more than 64 bits of nanoseconds.
    pub fn new(origin: NodeId, event_sequence: u32, origin_timestamp: Duration) -> Result<Self> {
        let origin_timestamp_ns = u64::try_from(origin_timestamp.as_nanos())
            .map_err(|_| EsmError::TimestampOutOfRange(origin_timestamp))?;
        Ok(Self {
            origin_id: origin,
            event_sequence,
            origin_timestamp_ns,
        })
    }

    pub fn origin_timestamp(&self) -> Duration {
        Duration::from_nanos(self.origin_timestamp_ns)
    }

    pub fn message_id(&self) -> MessageId {
        compute_message_id(self.origin_id, self.event_sequence)
    }
}

/// Vehicle kinematic snapshot riding inside every ESM packet
///
/// Supplied fresh by the mobility collaborator at send time.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[archive(check_bytes)]
pub struct PhysicalState {
    pub x: f64,
    pub y: f64,
    /// m/s
    pub speed: f64,
    /// radians
    pub heading: f64,
    /// m/s^2
    pub acceleration: f64,
    /// Bounding length in meters
    pub length: f64,
    /// Bounding width in meters
    pub width: f64,
    pub lane_id: u32,
    /// Longitudinal offset along the lane/path in meters
    pub offset: f64,
}

impl PhysicalState {
    /// Archived size in bytes
    pub const SIZE: usize = size_of::<ArchivedPhysicalState>();

    /// Straight-line distance between two vehicles' reference points
    pub fn distance_to(&self, other: &PhysicalState) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Sub-header framing the physical-state record
///
/// `checksum` is the CRC-32 of the archived `PhysicalState` bytes.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct StateSubHeader {
    pub record_len: u32,
    pub checksum: u32,
}

impl StateSubHeader {
    /// Archived size in bytes
    pub const SIZE: usize = size_of::<ArchivedStateSubHeader>();
}

/// Transmit power requested from the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TxPower {
    /// Transport default (maximum) power
    #[default]
    Unspecified,
    /// Explicit transport power level
    Level(u8),
}

/// Lower-layer header handed up by the transport on delivery
///
/// Opaque to the engine beyond these fields; its on-air size is
/// `EsmConfig::lower_header_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkHeader {
    /// Node that put the packet on the air
    pub sender: NodeId,
    pub power: TxPower,
}
