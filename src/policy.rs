/// Propagation policies
///
/// A policy decides what a node does beyond the common broadcast path. It
/// judges received events, warns vehicles directly when its node originates
/// one, shapes each outgoing header, picks the transmit power and decides
/// whether a fired pending action should trigger a resend.
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::EsmHooks;
use crate::contracts::{EsmHeader, LinkHeader, PhysicalState, TxPower};
use crate::environment::Environment;
use crate::errors::EsmError;
use crate::event::SafetyEvent;
use crate::history::EventHistory;
use crate::identity::{MessageId, NodeId};

/// A decoded ESM as handed to `PropagationPolicy::try_accept_event`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceivedEsm {
    pub link: LinkHeader,
    pub header: EsmHeader,
    pub state: PhysicalState,
}

impl ReceivedEsm {
    pub fn message_id(&self) -> MessageId {
        self.header.message_id()
    }
}

/// What to do when an event's pending action fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOutcome {
    Idle,
    Resend,
}

pub trait PropagationPolicy {
    /// Decide whether `receiver` acts on a received ESM
    ///
    /// Returning `true` makes the engine fire the receive hook. The policy
    /// owns all deduplication and may record the event in `history`.
    fn try_accept_event<E: Environment + ?Sized>(
        &mut self,
        _receiver: NodeId,
        _esm: &ReceivedEsm,
        _history: &mut EventHistory,
        _env: &mut E,
    ) -> bool {
        false
    }

    /// Direct, non-wire notification performed when `origin` raises a hazard
    fn send_initial_warning<E: Environment + ?Sized>(
        &mut self,
        _origin: NodeId,
        _env: &mut E,
        _hooks: &EsmHooks,
    ) {
    }

    /// Adjust the outgoing header of `event` before it is serialized
    ///
    /// Called on every send, after the header is filled from the event.
    fn add_receivers(&mut self, _event: &SafetyEvent, _header: &mut EsmHeader) {}

    fn tx_power_level(&self) -> TxPower {
        TxPower::Unspecified
    }

    fn on_pending_action(&mut self, _event: &SafetyEvent) -> PendingOutcome {
        PendingOutcome::Idle
    }
}

/// Takes no action on received events and warns nobody directly
#[derive(Debug, Clone, Copy, Default)]
pub struct BasePolicy;

impl PropagationPolicy for BasePolicy {}

/// Brake-light style propagation down the follower chain
///
/// Every vehicle behind the origin, follower of follower and so on, is
/// signalled synchronously with zero latency regardless of radio range.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantaneousPolicy;

impl PropagationPolicy for InstantaneousPolicy {
    fn send_initial_warning<E: Environment + ?Sized>(
        &mut self,
        origin: NodeId,
        env: &mut E,
        hooks: &EsmHooks,
    ) {
        let mut visited = HashSet::from([origin]);
        let mut next = env.rear_neighbor(origin);

        while let Some(follower) = next {
            if !visited.insert(follower) {
                warn!(origin, follower, "follower chain loops back, stopping instantaneous warning");
                break;
            }

            debug!(origin, follower, "instantaneous warning");
            hooks.notify_receive(follower, MessageId::INSTANTANEOUS, Duration::ZERO);
            // TODO: stop the walk once a follower keeps a safe braking distance
            next = env.rear_neighbor(follower);
        }
    }
}

/// Names of the available policies, for data-driven selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PolicyKind {
    #[default]
    Base,
    Instantaneous,
}

impl PolicyKind {
    pub fn build(self) -> AnyPolicy {
        match self {
            Self::Base => AnyPolicy::Base(BasePolicy),
            Self::Instantaneous => AnyPolicy::Instantaneous(InstantaneousPolicy),
        }
    }
}

impl FromStr for PolicyKind {
    type Err = EsmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base" => Ok(Self::Base),
            "instantaneous" => Ok(Self::Instantaneous),
            other => Err(EsmError::UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base => write!(f, "base"),
            Self::Instantaneous => write!(f, "instantaneous"),
        }
    }
}

/// Policy chosen at runtime from a `PolicyKind`
#[derive(Debug, Clone, Copy)]
pub enum AnyPolicy {
    Base(BasePolicy),
    Instantaneous(InstantaneousPolicy),
}

impl AnyPolicy {
    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::Base(_) => PolicyKind::Base,
            Self::Instantaneous(_) => PolicyKind::Instantaneous,
        }
    }
}

impl PropagationPolicy for AnyPolicy {
    fn try_accept_event<E: Environment + ?Sized>(
        &mut self,
        receiver: NodeId,
        esm: &ReceivedEsm,
        history: &mut EventHistory,
        env: &mut E,
    ) -> bool {
        match self {
            Self::Base(p) => p.try_accept_event(receiver, esm, history, env),
            Self::Instantaneous(p) => p.try_accept_event(receiver, esm, history, env),
        }
    }

    fn send_initial_warning<E: Environment + ?Sized>(
        &mut self,
        origin: NodeId,
        env: &mut E,
        hooks: &EsmHooks,
    ) {
        match self {
            Self::Base(p) => p.send_initial_warning(origin, env, hooks),
            Self::Instantaneous(p) => p.send_initial_warning(origin, env, hooks),
        }
    }

    fn add_receivers(&mut self, event: &SafetyEvent, header: &mut EsmHeader) {
        match self {
            Self::Base(p) => p.add_receivers(event, header),
            Self::Instantaneous(p) => p.add_receivers(event, header),
        }
    }

    fn tx_power_level(&self) -> TxPower {
        match self {
            Self::Base(p) => p.tx_power_level(),
            Self::Instantaneous(p) => p.tx_power_level(),
        }
    }

    fn on_pending_action(&mut self, event: &SafetyEvent) -> PendingOutcome {
        match self {
            Self::Base(p) => p.on_pending_action(event),
            Self::Instantaneous(p) => p.on_pending_action(event),
        }
    }
}
