/// Safety event records
///
/// One `SafetyEvent` exists per (origin, sequence) pair a node has created
/// or observed. The record owns at most one pending scheduled action.
use std::time::Duration;

use crate::environment::Scheduler;
use crate::identity::{compute_message_id, MessageId, NodeId};

/// Key of a scheduled action in the scheduler's table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionId(pub u64);

/// One hazard event as seen by a single node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyEvent {
    pub origin: NodeId,
    pub event_sequence: u32,
    pub origin_timestamp: Duration,
    sent_count: u32,
    pending_action: Option<ActionId>,
}

impl SafetyEvent {
    /// # Panics
    /// If `origin` or `event_sequence` is outside the message-id bound.
    pub fn new(origin: NodeId, event_sequence: u32, origin_timestamp: Duration) -> Self {
        // validates the bound up front
        compute_message_id(origin, event_sequence);
        Self {
            origin,
            event_sequence,
            origin_timestamp,
            sent_count: 0,
            pending_action: None,
        }
    }

    pub fn message_id(&self) -> MessageId {
        compute_message_id(self.origin, self.event_sequence)
    }

    /// Transmissions so far
    pub fn sent_count(&self) -> u32 {
        self.sent_count
    }

    pub(crate) fn record_send(&mut self) {
        self.sent_count += 1;
    }

    pub fn pending_action(&self) -> Option<ActionId> {
        self.pending_action
    }

    /// Attach a scheduled action, cancelling any previous one
    pub fn set_pending_action<S: Scheduler + ?Sized>(&mut self, action: ActionId, scheduler: &mut S) {
        self.cancel_pending(scheduler);
        self.pending_action = Some(action);
    }

    /// Forget the handle of an action that has already fired
    pub(crate) fn clear_fired(&mut self, action: ActionId) -> bool {
        if self.pending_action == Some(action) {
            self.pending_action = None;
            true
        } else {
            false
        }
    }

    /// Cancel the pending action, if any. Safe to call repeatedly.
    pub fn cancel_pending<S: Scheduler + ?Sized>(&mut self, scheduler: &mut S) {
        if let Some(action) = self.pending_action.take() {
            scheduler.cancel(action);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimEnvironment;

    #[test]
    fn test_new_event() {
        let event = SafetyEvent::new(3, 1, Duration::from_millis(10));
        assert_eq!(event.message_id(), compute_message_id(3, 1));
        assert_eq!(event.sent_count(), 0);
        assert_eq!(event.pending_action(), None);
    }

    #[test]
    fn test_cancel_pending_is_idempotent() {
        let mut env = SimEnvironment::new();
        let mut event = SafetyEvent::new(1, 1, Duration::ZERO);
        let action = env.schedule(Duration::from_millis(5), 1, event.message_id());
        event.set_pending_action(action, &mut env);

        event.cancel_pending(&mut env);
        assert!(!env.is_pending(action));
        assert_eq!(event.pending_action(), None);

        event.cancel_pending(&mut env);
        assert_eq!(env.cancelled_count(), 1);
    }

    #[test]
    fn test_replacing_pending_action_cancels_old() {
        let mut env = SimEnvironment::new();
        let mut event = SafetyEvent::new(1, 1, Duration::ZERO);
        let first = env.schedule(Duration::from_millis(5), 1, event.message_id());
        let second = env.schedule(Duration::from_millis(9), 1, event.message_id());

        event.set_pending_action(first, &mut env);
        event.set_pending_action(second, &mut env);
        assert!(!env.is_pending(first));
        assert!(env.is_pending(second));
    }
}
