/// ESM Core - Emergency safety message dissemination for vehicle-to-vehicle alerting
///
/// **Creator**: Shayan Golmezerji
/// **License**: Creative Commons Attribution 4.0 International (CC BY 4.0)
///
/// A node that detects a hazard originates a safety event, broadcasts it as
/// a fixed-size link-layer packet, and downstream nodes act on each distinct
/// event exactly once. Transport, mobility and scheduling are supplied by
/// the caller through the traits in `environment`.
///
/// # Design Principles
/// - Coordinator-free message identity: `origin * MAX_ORIGIN_COUNT + sequence`
/// - Per-node history with supersession of the node's own pending event
/// - Common engine, pluggable propagation policy
/// - Fixed-size rkyv wire records, padded to the configured message size

pub mod errors;
pub mod identity;
pub mod contracts;
pub mod packet;
pub mod event;
pub mod history;
pub mod environment;
pub mod config;
pub mod policy;
pub mod protocol;
pub mod sim;

pub use config::{EsmConfig, EsmConfigBuilder, EsmHooks};
pub use contracts::{EsmHeader, LinkHeader, PhysicalState, TxPower};
pub use environment::{Clock, Environment, Mobility, Scheduler, Transport};
pub use errors::{EsmError, Result};
pub use event::{ActionId, SafetyEvent};
pub use history::EventHistory;
pub use identity::{compute_message_id, MessageId, NodeId};
pub use packet::Packet;
pub use policy::{AnyPolicy, BasePolicy, InstantaneousPolicy, PolicyKind, PropagationPolicy};
pub use protocol::EsmProtocol;

/// Protocol version
pub const ESM_PROTOCOL_VERSION: u16 = 1;

/// Exclusive upper bound for both origin ids and event sequences.
/// `MAX_ORIGIN_COUNT^2` must fit in a u32 message id.
pub const MAX_ORIGIN_COUNT: u32 = 1 << 16;

/// Default total on-air ESM size (in bytes), lower-layer header included
pub const DEFAULT_MESSAGE_SIZE: usize = 200;

/// Size of the WAVE short message protocol header the transport prepends
pub const WSMP_HEADER_SIZE: usize = 11;
