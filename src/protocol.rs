/// ESM protocol engine
///
/// One `EsmProtocol` runs per node. It originates events, builds and
/// broadcasts ESM packets, decodes received ones and hands them to its
/// propagation policy. All operations run to completion inside a single
/// scheduler callback; nothing is retransmitted unless a policy asks for it.
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::EsmConfig;
use crate::contracts::{EsmHeader, LinkHeader, TxPower};
use crate::environment::{Environment, Scheduler};
use crate::errors::{EsmError, Result};
use crate::event::{ActionId, SafetyEvent};
use crate::history::EventHistory;
use crate::identity::{MessageId, NodeId};
use crate::packet::{decode_esm_packet, encode_esm_packet, Packet};
use crate::policy::{BasePolicy, PendingOutcome, PropagationPolicy, ReceivedEsm};

pub struct EsmProtocol<P = BasePolicy> {
    node: Option<NodeId>,
    current_event_sequence: u32,
    history: EventHistory,
    config: Arc<EsmConfig>,
    policy: P,
}

impl EsmProtocol<BasePolicy> {
    /// Engine with the base policy, which ignores every received event
    pub fn new(config: Arc<EsmConfig>) -> Self {
        Self::with_policy(config, BasePolicy)
    }
}

impl<P: PropagationPolicy> EsmProtocol<P> {
    pub fn with_policy(config: Arc<EsmConfig>, policy: P) -> Self {
        Self {
            node: None,
            current_event_sequence: 0,
            history: EventHistory::new(),
            config,
            policy,
        }
    }

    /// Bind the engine to the node it runs on
    pub fn attach(&mut self, node: NodeId) {
        self.node = Some(node);
    }

    pub fn is_attached(&self) -> bool {
        self.node.is_some()
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.node
    }

    fn require_node(&self) -> Result<NodeId> {
        self.node.ok_or(EsmError::NotAttached)
    }

    pub fn current_event_sequence(&self) -> u32 {
        self.current_event_sequence
    }

    pub fn history(&self) -> &EventHistory {
        &self.history
    }

    pub fn config(&self) -> &EsmConfig {
        &self.config
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    pub fn tx_power_level(&self) -> TxPower {
        self.policy.tx_power_level()
    }

    /// This node's most recent own event
    pub fn last_event(&self) -> Option<&SafetyEvent> {
        let node = self.node?;
        self.history.lookup_by_origin(node, self.current_event_sequence)
    }

    /// Originate a new hazard event
    ///
    /// The node's previous own event keeps its history entry but loses its
    /// pending action. Other nodes' events are never touched.
    pub fn create_new_event<S: Scheduler + ?Sized>(&mut self, scheduler: &mut S) -> Result<MessageId> {
        let node = self.require_node()?;

        if let Some(previous) = self
            .history
            .lookup_by_origin_mut(node, self.current_event_sequence)
        {
            debug!(node, sequence = previous.event_sequence, "cancel previous event");
            previous.cancel_pending(scheduler);
        }

        self.current_event_sequence += 1;
        let event = SafetyEvent::new(node, self.current_event_sequence, scheduler.now());
        let message_id = event.message_id();
        debug!(node, sequence = self.current_event_sequence, %message_id, "created new event");

        self.history.insert(event);
        Ok(message_id)
    }

    /// Run the policy's direct (non-wire) warning for this node
    pub fn send_initial_warning<E: Environment + ?Sized>(&mut self, env: &mut E) -> Result<()> {
        let node = self.require_node()?;
        self.policy.send_initial_warning(node, env, self.config.hooks());
        Ok(())
    }

    /// Broadcast one ESM packet for an event in this node's history
    pub fn send_event<E: Environment + ?Sized>(&mut self, message_id: MessageId, env: &mut E) -> Result<()> {
        let node = self.require_node()?;
        let state = env
            .physical_state(node)
            .ok_or(EsmError::NoPhysicalState(node))?;
        let power = self.policy.tx_power_level();

        let event = self
            .history
            .lookup_mut(message_id)
            .ok_or(EsmError::UnknownEvent(message_id))?;

        let mut header = EsmHeader::new(event.origin, event.event_sequence, event.origin_timestamp)?;
        self.policy.add_receivers(event, &mut header);
        let packet = encode_esm_packet(
            &header,
            &state,
            self.config.message_size(),
            self.config.lower_header_size(),
        )?;

        debug!(node, %message_id, len = packet.len(), "send ESM");
        env.broadcast(node, packet, power);
        event.record_send();
        self.config.hooks().notify_send(node, message_id);
        Ok(())
    }

    /// Originate a hazard: create the event, warn directly, broadcast once
    pub fn raise_hazard<E: Environment + ?Sized>(&mut self, env: &mut E) -> Result<MessageId> {
        let message_id = self.create_new_event(env)?;
        self.send_initial_warning(env)?;
        self.send_event(message_id, env)?;
        Ok(message_id)
    }

    /// Handle a packet delivered by the transport, lower-layer header removed
    ///
    /// Returns whether the policy accepted the event.
    pub fn on_packet_received<E: Environment + ?Sized>(
        &mut self,
        mut packet: Packet,
        link: &LinkHeader,
        env: &mut E,
    ) -> Result<bool> {
        let node = self.require_node()?;
        let (header, state) = decode_esm_packet(&mut packet)?;

        let esm = ReceivedEsm {
            link: *link,
            header,
            state,
        };
        let message_id = esm.message_id();

        if !self
            .policy
            .try_accept_event(node, &esm, &mut self.history, env)
        {
            debug!(node, %message_id, sender = link.sender, "ESM ignored");
            return Ok(false);
        }

        let latency = env.now().saturating_sub(header.origin_timestamp());
        debug!(node, %message_id, ?latency, "ESM accepted");
        self.config.hooks().notify_receive(node, message_id, latency);
        Ok(true)
    }

    /// Schedule a future action for an event, replacing its previous one
    pub fn schedule_pending_action<S: Scheduler + ?Sized>(
        &mut self,
        message_id: MessageId,
        delay: Duration,
        scheduler: &mut S,
    ) -> Result<ActionId> {
        let node = self.require_node()?;
        let event = self
            .history
            .lookup_mut(message_id)
            .ok_or(EsmError::UnknownEvent(message_id))?;

        let action = scheduler.schedule(delay, node, message_id);
        event.set_pending_action(action, scheduler);
        Ok(action)
    }

    /// Handle a fired scheduled action attached to one of this node's events
    ///
    /// Stale actions (no longer attached to the event) are ignored.
    pub fn handle_pending_action<E: Environment + ?Sized>(
        &mut self,
        action: ActionId,
        message_id: MessageId,
        env: &mut E,
    ) -> Result<()> {
        self.require_node()?;

        let Some(event) = self.history.lookup_mut(message_id) else {
            return Ok(());
        };
        if !event.clear_fired(action) {
            return Ok(());
        }

        if self.policy.on_pending_action(event) == PendingOutcome::Resend {
            self.send_event(message_id, env)?;
        }
        Ok(())
    }

    /// Tear down: cancel and drop all history, release the node binding
    ///
    /// Safe to call more than once.
    pub fn dispose<S: Scheduler + ?Sized>(&mut self, scheduler: &mut S) {
        self.history.clear(scheduler);
        if let Some(node) = self.node.take() {
            debug!(node, "ESM protocol disposed");
        }
    }
}
