/// Deterministic reference environment
///
/// `SimEnvironment` implements every collaborator trait over in-memory
/// tables: a simulated clock, a table of cancellable actions, a broadcast
/// outbox and a vehicle table with rear-neighbor links. `Simulation` drives
/// a set of nodes over it, delivering broadcasts with seeded latency jitter.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::config::EsmConfig;
use crate::contracts::{LinkHeader, PhysicalState, TxPower};
use crate::environment::{Clock, Mobility, Scheduler, Transport};
use crate::errors::{EsmError, Result};
use crate::event::ActionId;
use crate::identity::{MessageId, NodeId};
use crate::packet::Packet;
use crate::policy::PropagationPolicy;
use crate::protocol::EsmProtocol;

/// A packet handed to the transport
#[derive(Debug, Clone)]
pub struct Transmission {
    pub sender: NodeId,
    pub packet: Packet,
    pub power: TxPower,
    pub sent_at: Duration,
}

/// An action whose time has come
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredAction {
    pub action: ActionId,
    pub owner: NodeId,
    pub message_id: MessageId,
    pub at: Duration,
}

#[derive(Debug, Default)]
pub struct SimEnvironment {
    now: Duration,
    next_action: u64,
    /// Pending actions only, in firing order
    actions: BTreeMap<(Duration, ActionId), (NodeId, MessageId)>,
    due_at: HashMap<ActionId, Duration>,
    cancelled: usize,
    outbox: Vec<Transmission>,
    vehicles: BTreeMap<NodeId, PhysicalState>,
    rear_neighbors: HashMap<NodeId, NodeId>,
}

impl SimEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vehicle(&mut self, node: NodeId, state: PhysicalState) {
        self.vehicles.insert(node, state);
    }

    pub fn update_vehicle(&mut self, node: NodeId, state: PhysicalState) -> bool {
        match self.vehicles.get_mut(&node) {
            Some(slot) => {
                *slot = state;
                true
            }
            None => false,
        }
    }

    /// Declare `follower` as the vehicle directly behind `leader`
    pub fn set_rear_neighbor(&mut self, leader: NodeId, follower: NodeId) {
        self.rear_neighbors.insert(leader, follower);
    }

    pub fn clear_rear_neighbor(&mut self, leader: NodeId) {
        self.rear_neighbors.remove(&leader);
    }

    pub fn outbox(&self) -> &[Transmission] {
        &self.outbox
    }

    pub fn take_outbox(&mut self) -> Vec<Transmission> {
        std::mem::take(&mut self.outbox)
    }

    /// Number of actions actually moved from pending to cancelled
    pub fn cancelled_count(&self) -> usize {
        self.cancelled
    }

    /// Move the clock forward; never backwards
    pub fn advance_to(&mut self, t: Duration) {
        if t > self.now {
            self.now = t;
        }
    }

    /// Number of actions still waiting to fire
    pub fn pending_count(&self) -> usize {
        self.due_at.len()
    }

    pub fn next_action_time(&self) -> Option<Duration> {
        self.actions.keys().next().map(|(at, _)| *at)
    }

    /// Fire the earliest pending action due no later than `until`
    pub fn pop_due_action(&mut self, until: Duration) -> Option<FiredAction> {
        let (at, _) = *self.actions.keys().next()?;
        if at > until {
            return None;
        }

        let ((at, action), (owner, message_id)) = self.actions.pop_first()?;
        self.due_at.remove(&action);
        self.advance_to(at);
        Some(FiredAction {
            action,
            owner,
            message_id,
            at,
        })
    }
}

impl Clock for SimEnvironment {
    fn now(&self) -> Duration {
        self.now
    }
}

impl Scheduler for SimEnvironment {
    fn schedule(&mut self, delay: Duration, owner: NodeId, message_id: MessageId) -> ActionId {
        let id = ActionId(self.next_action);
        self.next_action += 1;
        let at = self.now + delay;
        self.actions.insert((at, id), (owner, message_id));
        self.due_at.insert(id, at);
        id
    }

    fn cancel(&mut self, action: ActionId) {
        if let Some(at) = self.due_at.remove(&action) {
            self.actions.remove(&(at, action));
            self.cancelled += 1;
        }
    }

    fn is_pending(&self, action: ActionId) -> bool {
        self.due_at.contains_key(&action)
    }
}

impl Transport for SimEnvironment {
    fn broadcast(&mut self, sender: NodeId, packet: Packet, power: TxPower) {
        self.outbox.push(Transmission {
            sender,
            packet,
            power,
            sent_at: self.now,
        });
    }
}

impl Mobility for SimEnvironment {
    fn physical_state(&self, node: NodeId) -> Option<PhysicalState> {
        self.vehicles.get(&node).copied()
    }

    fn rear_neighbor(&self, node: NodeId) -> Option<NodeId> {
        self.rear_neighbors.get(&node).copied()
    }
}

/// Radio model of the simulated medium
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Propagation plus channel access delay
    pub base_latency: Duration,
    /// Jitter as a fraction of base latency (0.0 - 1.0)
    pub jitter_fraction: f64,
    /// Delivery radius in meters; `None` reaches every node
    pub range_m: Option<f64>,
    pub seed: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_latency: Duration::from_millis(2),
            jitter_fraction: 0.1,
            range_m: Some(300.0),
            seed: 0,
        }
    }
}

#[derive(Debug)]
struct Delivery {
    receiver: NodeId,
    link: LinkHeader,
    packet: Packet,
}

/// Drives a set of ESM nodes over a `SimEnvironment`
pub struct Simulation<P> {
    env: SimEnvironment,
    nodes: BTreeMap<NodeId, EsmProtocol<P>>,
    config: Arc<EsmConfig>,
    network: NetworkConfig,
    rng: StdRng,
    in_flight: BTreeMap<(Duration, u64), Delivery>,
    next_delivery: u64,
}

impl<P: PropagationPolicy> Simulation<P> {
    pub fn new(config: Arc<EsmConfig>, network: NetworkConfig) -> Self {
        let rng = StdRng::seed_from_u64(network.seed);
        Self {
            env: SimEnvironment::new(),
            nodes: BTreeMap::new(),
            config,
            network,
            rng,
            in_flight: BTreeMap::new(),
            next_delivery: 0,
        }
    }

    /// Place a vehicle and attach an ESM engine running `policy` to it
    pub fn add_node(&mut self, node: NodeId, state: PhysicalState, policy: P) {
        self.env.add_vehicle(node, state);
        let mut protocol = EsmProtocol::with_policy(Arc::clone(&self.config), policy);
        protocol.attach(node);
        self.nodes.insert(node, protocol);
    }

    pub fn set_rear_neighbor(&mut self, leader: NodeId, follower: NodeId) {
        self.env.set_rear_neighbor(leader, follower);
    }

    pub fn env(&self) -> &SimEnvironment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut SimEnvironment {
        &mut self.env
    }

    pub fn node(&self, node: NodeId) -> Option<&EsmProtocol<P>> {
        self.nodes.get(&node)
    }

    pub fn node_mut(&mut self, node: NodeId) -> Option<&mut EsmProtocol<P>> {
        self.nodes.get_mut(&node)
    }

    pub fn now(&self) -> Duration {
        self.env.now()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Let `node` originate a hazard and put its packet on the air
    pub fn raise_hazard(&mut self, node: NodeId) -> Result<MessageId> {
        let protocol = self
            .nodes
            .get_mut(&node)
            .ok_or(EsmError::NotAttached)?;
        let message_id = protocol.raise_hazard(&mut self.env)?;
        self.dispatch_outbox();
        Ok(message_id)
    }

    /// Broadcast an existing event of `node` once more
    pub fn resend(&mut self, node: NodeId, message_id: MessageId) -> Result<()> {
        let protocol = self
            .nodes
            .get_mut(&node)
            .ok_or(EsmError::NotAttached)?;
        protocol.send_event(message_id, &mut self.env)?;
        self.dispatch_outbox();
        Ok(())
    }

    /// Attach a scheduled action to one of `node`'s events
    pub fn schedule_pending_action(
        &mut self,
        node: NodeId,
        message_id: MessageId,
        delay: Duration,
    ) -> Result<ActionId> {
        let protocol = self
            .nodes
            .get_mut(&node)
            .ok_or(EsmError::NotAttached)?;
        protocol.schedule_pending_action(message_id, delay, &mut self.env)
    }

    fn delivery_latency(&mut self) -> Duration {
        let jitter = self.network.jitter_fraction.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return self.network.base_latency;
        }
        let factor = 1.0 + jitter * self.rng.gen_range(-1.0..=1.0);
        self.network.base_latency.mul_f64(factor.max(0.0))
    }

    fn in_range(&self, sender: NodeId, receiver: NodeId) -> bool {
        let Some(range) = self.network.range_m else {
            return true;
        };
        match (self.env.physical_state(sender), self.env.physical_state(receiver)) {
            (Some(a), Some(b)) => a.distance_to(&b) <= range,
            _ => false,
        }
    }

    fn dispatch_outbox(&mut self) {
        for transmission in self.env.take_outbox() {
            let receivers: Vec<NodeId> = self
                .nodes
                .iter()
                .filter(|(id, p)| **id != transmission.sender && p.is_attached())
                .map(|(id, _)| *id)
                .filter(|id| self.in_range(transmission.sender, *id))
                .collect();

            for receiver in receivers {
                let at = transmission.sent_at + self.delivery_latency();
                let seq = self.next_delivery;
                self.next_delivery += 1;
                self.in_flight.insert(
                    (at, seq),
                    Delivery {
                        receiver,
                        link: LinkHeader {
                            sender: transmission.sender,
                            power: transmission.power,
                        },
                        packet: transmission.packet.clone(),
                    },
                );
            }
        }
    }

    /// Process deliveries and scheduled actions up to and including `until`
    pub fn run_until(&mut self, until: Duration) -> Result<()> {
        loop {
            let next_delivery = self.in_flight.keys().next().map(|(at, _)| *at);
            let next_action = self.env.next_action_time();

            let delivery_first = match (next_delivery, next_action) {
                (Some(d), Some(a)) => d <= a,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if delivery_first { next_delivery } else { next_action };
            if next.map_or(true, |t| t > until) {
                break;
            }

            if delivery_first {
                self.deliver_next();
            } else if let Some(fired) = self.env.pop_due_action(until) {
                if let Some(protocol) = self.nodes.get_mut(&fired.owner) {
                    if protocol.is_attached() {
                        protocol.handle_pending_action(fired.action, fired.message_id, &mut self.env)?;
                    }
                }
            }
            self.dispatch_outbox();
        }

        self.env.advance_to(until);
        Ok(())
    }

    fn deliver_next(&mut self) {
        let Some(((at, _), delivery)) = self.in_flight.pop_first() else {
            return;
        };
        self.env.advance_to(at);

        let Some(protocol) = self.nodes.get_mut(&delivery.receiver) else {
            return;
        };
        if !protocol.is_attached() {
            return;
        }

        // transport errors stop at the medium
        if let Err(err) = protocol.on_packet_received(delivery.packet, &delivery.link, &mut self.env) {
            warn!(receiver = delivery.receiver, sender = delivery.link.sender, %err, "dropping undecodable packet");
        }
    }

    /// Tear down every node
    pub fn shutdown(&mut self) {
        for protocol in self.nodes.values_mut() {
            protocol.dispose(&mut self.env);
        }
        debug!(nodes = self.nodes.len(), dropped = self.in_flight.len(), "simulation shut down");
        self.in_flight.clear();
    }
}
