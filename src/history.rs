/// Per-node event history cache
///
/// Maps message ids to the events a node created or observed. Entries are
/// only ever inserted or overwritten; nothing is evicted before teardown,
/// so the cache grows with the number of distinct events seen.
use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::environment::Scheduler;
use crate::event::SafetyEvent;
use crate::identity::{compute_message_id, MessageId, NodeId};

#[derive(Debug, Default)]
pub struct EventHistory {
    events: HashMap<MessageId, SafetyEvent>,
}

impl EventHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `event` under its message id, replacing any previous entry
    pub fn insert(&mut self, event: SafetyEvent) {
        self.events.insert(event.message_id(), event);
    }

    pub fn lookup(&self, message_id: MessageId) -> Option<&SafetyEvent> {
        self.events.get(&message_id)
    }

    pub fn lookup_mut(&mut self, message_id: MessageId) -> Option<&mut SafetyEvent> {
        self.events.get_mut(&message_id)
    }

    pub fn lookup_by_origin(&self, origin: NodeId, event_sequence: u32) -> Option<&SafetyEvent> {
        self.lookup(compute_message_id(origin, event_sequence))
    }

    pub fn lookup_by_origin_mut(&mut self, origin: NodeId, event_sequence: u32) -> Option<&mut SafetyEvent> {
        self.lookup_mut(compute_message_id(origin, event_sequence))
    }

    pub fn contains(&self, message_id: MessageId) -> bool {
        self.events.contains_key(&message_id)
    }

    /// Materialize a record for a remotely originated event
    ///
    /// Returns `true` if the event was novel. A known event is left as is.
    pub fn observe(&mut self, origin: NodeId, event_sequence: u32, origin_timestamp: Duration) -> bool {
        let message_id = compute_message_id(origin, event_sequence);
        if self.events.contains_key(&message_id) {
            return false;
        }
        self.events
            .insert(message_id, SafetyEvent::new(origin, event_sequence, origin_timestamp));
        true
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MessageId, &SafetyEvent)> {
        self.events.iter()
    }

    /// Cancel every pending action, then drop all records
    pub fn clear<S: Scheduler + ?Sized>(&mut self, scheduler: &mut S) {
        for event in self.events.values_mut() {
            event.cancel_pending(scheduler);
        }
        if !self.events.is_empty() {
            debug!(events = self.events.len(), "cleared event history");
        }
        self.events.clear();
    }
}
