//! Local subscription table: topic -> set of locally-connected subscribers
//! (S3/S5). Distinct from the Broker's own reference counting, which only
//! decides when to issue the physical Redis SUBSCRIBE/UNSUBSCRIBE; this
//! table is what the Session Manager walks to fan a routed message out to
//! the Connections on this process that care about it.

use super::connection::ConnectionId;
use dashmap::DashMap;
use std::collections::HashSet;

#[derive(Default)]
pub struct SubscriptionTable {
    topics: DashMap<String, HashSet<ConnectionId>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection` to `topic`'s local subscriber set. Returns `true` if
    /// this was the first local subscriber for the topic (0->1 transition).
    pub fn subscribe(&self, topic: &str, connection: ConnectionId) -> bool {
        let mut entry = self.topics.entry(topic.to_string()).or_default();
        let was_empty = entry.is_empty();
        entry.insert(connection);
        was_empty
    }

    /// Remove `connection` from `topic`'s local subscriber set. Returns
    /// `true` if the set became empty (1->0 transition).
    pub fn unsubscribe(&self, topic: &str, connection: ConnectionId) -> bool {
        match self.topics.get_mut(topic) {
            Some(mut set) => {
                set.remove(&connection);
                let now_empty = set.is_empty();
                if now_empty {
                    drop(set);
                    self.topics.remove(topic);
                }
                now_empty
            }
            None => false,
        }
    }

    pub fn subscribers(&self, topic: &str) -> Vec<ConnectionId> {
        self.topics
            .get(topic)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_subscriber_reports_zero_to_one_transition() {
        let table = SubscriptionTable::new();
        assert!(table.subscribe("presence:alice", 1));
        assert!(!table.subscribe("presence:alice", 2));
        assert_eq!(table.subscribers("presence:alice").len(), 2);
    }

    #[test]
    fn last_unsubscriber_reports_one_to_zero_transition() {
        let table = SubscriptionTable::new();
        table.subscribe("presence:alice", 1);
        table.subscribe("presence:alice", 2);
        assert!(!table.unsubscribe("presence:alice", 1));
        assert!(table.unsubscribe("presence:alice", 2));
        assert!(table.subscribers("presence:alice").is_empty());
    }
}
