// src/connection/subscription.rs
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use crate::protocol::{EventId, OutboundMessage};

/// The set of event topics the application wants live updates for.
///
/// Membership survives disconnects and is replayed on every successful open.
/// It is a set, not a reference count: subscribing twice and unsubscribing
/// once leaves the topic unsubscribed.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    topics: Arc<RwLock<HashSet<EventId>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the topic was not present before.
    pub fn insert(&self, event_id: EventId) -> bool {
        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event_id)
    }

    pub fn remove(&self, event_id: EventId) -> bool {
        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&event_id)
    }

    pub fn contains(&self, event_id: EventId) -> bool {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&event_id)
    }

    pub fn len(&self) -> usize {
        self.topics.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current topics, sorted.
    pub fn snapshot(&self) -> Vec<EventId> {
        let mut topics: Vec<_> = self
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        topics.sort_unstable();
        topics
    }

    /// One subscribe message per topic, sent after every successful open.
    pub fn replay(&self) -> Vec<OutboundMessage> {
        self.snapshot()
            .into_iter()
            .map(OutboundMessage::subscribe)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_insert_is_idempotent() {
        let registry = SubscriptionRegistry::new();

        assert!(registry.insert(EventId(5)));
        assert!(!registry.insert(EventId(5)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_is_not_reference_counted() {
        let registry = SubscriptionRegistry::new();
        registry.insert(EventId(5));
        registry.insert(EventId(5));

        assert!(registry.remove(EventId(5)));
        assert!(!registry.contains(EventId(5)));
        assert!(!registry.remove(EventId(5)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_replay_sends_one_subscribe_per_topic() {
        let registry = SubscriptionRegistry::new();
        registry.insert(EventId(9));
        registry.insert(EventId(2));
        registry.insert(EventId(9));

        assert_eq!(
            registry.replay(),
            vec![
                OutboundMessage::subscribe(EventId(2)),
                OutboundMessage::subscribe(EventId(9)),
            ]
        );
    }

    #[test]
    fn test_clones_share_membership() {
        let registry = SubscriptionRegistry::new();
        let shared = registry.clone();

        shared.insert(EventId(1));
        assert_eq!(registry.snapshot(), vec![EventId(1)]);
    }
}
