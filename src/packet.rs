/// Packet assembly with header-stack discipline
///
/// Headers are pushed to the front of a packet and popped from the front on
/// receipt, so the last header added is the first one removed. ESM packets
/// are built as `[EsmHeader][StateSubHeader + PhysicalState][padding]`, with
/// the lower-layer header prepended later by the transport.
use rkyv::ser::serializers::AllocSerializer;
use rkyv::{check_archived_root, to_bytes, AlignedVec, Deserialize, Infallible, Serialize};
use tracing::trace;

use crate::contracts::{EsmHeader, PhysicalState, StateSubHeader};
use crate::errors::{EsmError, Result};
use crate::MAX_ORIGIN_COUNT;

/// Scratch space for archiving the fixed-size wire records
const SCRATCH_SIZE: usize = 256;

/// A fixed-size record that can be stacked onto a packet
pub trait WireHeader: Sized {
    /// Encoded size in bytes
    const SIZE: usize;

    fn encode(&self) -> Result<Vec<u8>>;

    /// Decode from exactly `SIZE` bytes
    fn decode(bytes: &[u8]) -> Result<Self>;
}

fn archive<T>(value: &T, expected_len: usize, what: &str) -> Result<Vec<u8>>
where
    T: Serialize<AllocSerializer<SCRATCH_SIZE>>,
{
    let bytes = to_bytes::<_, SCRATCH_SIZE>(value)
        .map_err(|_| EsmError::SerializationError(format!("Failed to serialize {}", what)))?;

    if bytes.len() != expected_len {
        return Err(EsmError::SerializationError(format!(
            "{} archived to {} bytes, expected {}",
            what,
            bytes.len(),
            expected_len
        )));
    }

    Ok(bytes.to_vec())
}

/// Copy into an aligned buffer; packet slices carry no alignment guarantee
fn aligned(bytes: &[u8]) -> AlignedVec {
    let mut buf = AlignedVec::with_capacity(bytes.len());
    buf.extend_from_slice(bytes);
    buf
}

fn check_len(bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() != expected {
        return Err(EsmError::InvalidPacketLength {
            expected,
            received: bytes.len(),
        });
    }
    Ok(())
}

impl WireHeader for EsmHeader {
    const SIZE: usize = EsmHeader::SIZE;

    fn encode(&self) -> Result<Vec<u8>> {
        archive(self, Self::SIZE, "EsmHeader")
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, Self::SIZE)?;
        let buf = aligned(bytes);
        let archived = check_archived_root::<EsmHeader>(&buf).map_err(|_| {
            EsmError::DeserializationError("Failed to validate archived ESM header".to_string())
        })?;
        let header: EsmHeader = archived.deserialize(&mut Infallible).map_err(|_| {
            EsmError::DeserializationError("Failed to deserialize ESM header".to_string())
        })?;

        // only in-bound identities may reach compute_message_id
        if header.origin_id >= MAX_ORIGIN_COUNT || header.event_sequence >= MAX_ORIGIN_COUNT {
            return Err(EsmError::DeserializationError(format!(
                "ESM header identity out of bound: origin {}, sequence {}",
                header.origin_id, header.event_sequence
            )));
        }
        Ok(header)
    }
}

/// Physical-state sub-record: sub-header followed by the archived state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalStateRecord(pub PhysicalState);

impl WireHeader for PhysicalStateRecord {
    const SIZE: usize = StateSubHeader::SIZE + PhysicalState::SIZE;

    fn encode(&self) -> Result<Vec<u8>> {
        let body = archive(&self.0, PhysicalState::SIZE, "PhysicalState")?;
        let sub_header = StateSubHeader {
            record_len: body.len() as u32,
            checksum: crc32fast::hash(&body),
        };

        let mut bytes = archive(&sub_header, StateSubHeader::SIZE, "StateSubHeader")?;
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, Self::SIZE)?;
        let (head, body) = bytes.split_at(StateSubHeader::SIZE);

        let head_buf = aligned(head);
        let sub_header: StateSubHeader = check_archived_root::<StateSubHeader>(&head_buf)
            .map_err(|_| {
                EsmError::DeserializationError("Failed to validate state sub-header".to_string())
            })?
            .deserialize(&mut Infallible)
            .map_err(|_| {
                EsmError::DeserializationError("Failed to deserialize state sub-header".to_string())
            })?;

        if sub_header.record_len as usize != body.len() {
            return Err(EsmError::InvalidPacketLength {
                expected: sub_header.record_len as usize,
                received: body.len(),
            });
        }

        let actual = crc32fast::hash(body);
        if actual != sub_header.checksum {
            return Err(EsmError::IntegrityCheckFailed {
                expected: sub_header.checksum,
                actual,
            });
        }

        let body_buf = aligned(body);
        let archived = check_archived_root::<PhysicalState>(&body_buf).map_err(|_| {
            EsmError::DeserializationError("Failed to validate archived physical state".to_string())
        })?;
        archived
            .deserialize(&mut Infallible)
            .map(PhysicalStateRecord)
            .map_err(|_| {
                EsmError::DeserializationError("Failed to deserialize physical state".to_string())
            })
    }
}

/// Raw packet bytes, outermost header first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    bytes: Vec<u8>,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Push a header in front of everything already in the packet
    pub fn add_header<H: WireHeader>(&mut self, header: &H) -> Result<()> {
        let encoded = header.encode()?;
        self.bytes.splice(0..0, encoded);
        Ok(())
    }

    /// Pop the outermost header
    ///
    /// The packet is left untouched when decoding fails.
    pub fn remove_header<H: WireHeader>(&mut self) -> Result<H> {
        if self.bytes.len() < H::SIZE {
            return Err(EsmError::InvalidPacketLength {
                expected: H::SIZE,
                received: self.bytes.len(),
            });
        }

        let header = H::decode(&self.bytes[..H::SIZE])?;
        self.bytes.drain(..H::SIZE);
        Ok(header)
    }

    /// Append `len` zero filler bytes
    pub fn add_padding_at_end(&mut self, len: usize) {
        self.bytes.resize(self.bytes.len() + len, 0);
    }
}

/// Build an ESM packet padded to `message_size - lower_header_size` bytes
///
/// # Errors
/// `BufferTooSmall` if the headers alone exceed the configured message size.
pub fn encode_esm_packet(
    header: &EsmHeader,
    state: &PhysicalState,
    message_size: usize,
    lower_header_size: usize,
) -> Result<Packet> {
    let mut packet = Packet::new();
    packet.add_header(&PhysicalStateRecord(*state))?;
    packet.add_header(header)?;

    let required = packet.len() + lower_header_size;
    let fill = message_size
        .checked_sub(required)
        .ok_or(EsmError::BufferTooSmall {
            required,
            available: message_size,
        })?;
    packet.add_padding_at_end(fill);

    trace!(
        origin = header.origin_id,
        sequence = header.event_sequence,
        fill,
        len = packet.len(),
        "assembled ESM packet"
    );
    Ok(packet)
}

/// Strip the ESM header and physical-state record, in that order
pub fn decode_esm_packet(packet: &mut Packet) -> Result<(EsmHeader, PhysicalState)> {
    let header = packet.remove_header::<EsmHeader>()?;
    let PhysicalStateRecord(state) = packet.remove_header::<PhysicalStateRecord>()?;
    Ok((header, state))
}
