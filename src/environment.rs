/// Collaborator interfaces consumed by the protocol engine
///
/// The engine never owns a clock, a radio or a mobility model. Callers pass
/// an `Environment` into every operation that needs one; `sim::SimEnvironment`
/// is the reference implementation.
use std::time::Duration;

use crate::contracts::{PhysicalState, TxPower};
use crate::event::ActionId;
use crate::identity::{MessageId, NodeId};
use crate::packet::Packet;

/// Simulated time source
pub trait Clock {
    /// Time elapsed since simulation start
    fn now(&self) -> Duration;
}

/// Cancellable scheduled actions
pub trait Scheduler: Clock {
    /// Schedule an action for `owner` concerning `message_id`, `delay` from now
    fn schedule(&mut self, delay: Duration, owner: NodeId, message_id: MessageId) -> ActionId;

    /// Cancel a scheduled action. No-op if it already fired or was cancelled.
    fn cancel(&mut self, action: ActionId);

    fn is_pending(&self, action: ActionId) -> bool;
}

/// Broadcast medium
pub trait Transport {
    /// Fire-and-forget broadcast of `packet` from `sender`
    fn broadcast(&mut self, sender: NodeId, packet: Packet, power: TxPower);
}

/// Vehicle kinematics and physical adjacency
pub trait Mobility {
    fn physical_state(&self, node: NodeId) -> Option<PhysicalState>;

    /// The vehicle immediately behind `node`, if any
    fn rear_neighbor(&self, node: NodeId) -> Option<NodeId>;
}

/// Everything a node needs from the world around it
pub trait Environment: Scheduler + Transport + Mobility {}

impl<T: Scheduler + Transport + Mobility + ?Sized> Environment for T {}
