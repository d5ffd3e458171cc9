//! In-process stand-in for the Ephemeral Broker (S9 Design Notes). Mirrors
//! the Redis-backed [`Broker`](super::Broker)'s observable semantics —
//! manual TTL expiry instead of Redis `EXPIRE`, and publish only reaches a
//! topic's current local subscribers — without a live Redis server. Used by
//! local/dev runs and integration tests, not `cfg(test)`-gated so it stays
//! buildable as ordinary library code.

use super::pubsub::{SubscriberId, TopicRouter};
use super::{BrokerPort, CachedStatus, ResumeRecord};
use crate::error::BrokerError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Expiring<T> {
    value: T,
    deadline: Instant,
}

pub struct InMemoryBroker {
    resume_records: DashMap<String, Expiring<ResumeRecord>>,
    status_cache: DashMap<String, Expiring<CachedStatus>>,
    subscriptions: DashMap<String, HashSet<SubscriberId>>,
    resume_ttl: Duration,
    status_cache_ttl: Duration,
    router: Arc<dyn TopicRouter>,
}

impl InMemoryBroker {
    pub fn new(resume_ttl_secs: u64, status_cache_ttl_secs: u64, router: Arc<dyn TopicRouter>) -> Self {
        Self {
            resume_records: DashMap::new(),
            status_cache: DashMap::new(),
            subscriptions: DashMap::new(),
            resume_ttl: Duration::from_secs(resume_ttl_secs.max(1)),
            status_cache_ttl: Duration::from_secs(status_cache_ttl_secs.max(1)),
            router,
        }
    }
}

#[async_trait]
impl BrokerPort for InMemoryBroker {
    async fn put_resume_record(&self, token: &str, record: &ResumeRecord) -> Result<(), BrokerError> {
        self.resume_records.insert(
            token.to_string(),
            Expiring {
                value: record.clone(),
                deadline: Instant::now() + self.resume_ttl,
            },
        );
        Ok(())
    }

    async fn peek_resume_record(&self, token: &str) -> Result<Option<ResumeRecord>, BrokerError> {
        match self.resume_records.get(token) {
            Some(entry) if entry.deadline > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                drop(self.resume_records.remove(token));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete_resume_record(&self, token: &str) -> Result<(), BrokerError> {
        self.resume_records.remove(token);
        Ok(())
    }

    async fn put_status_cache(&self, username: &str, status: &CachedStatus) -> Result<(), BrokerError> {
        self.status_cache.insert(
            username.to_string(),
            Expiring {
                value: status.clone(),
                deadline: Instant::now() + self.status_cache_ttl,
            },
        );
        Ok(())
    }

    async fn get_status_cache(&self, username: &str) -> Result<Option<CachedStatus>, BrokerError> {
        match self.status_cache.get(username) {
            Some(entry) if entry.deadline > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                drop(self.status_cache.remove(username));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let has_subscribers = self.subscriptions.get(topic).is_some_and(|set| !set.is_empty());
        if has_subscribers {
            self.router.route(topic, payload.to_vec()).await;
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, subscriber: SubscriberId) -> Result<(), BrokerError> {
        self.subscriptions.entry(topic.to_string()).or_default().insert(subscriber);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str, subscriber: SubscriberId) -> Result<(), BrokerError> {
        if let Some(mut set) = self.subscriptions.get_mut(topic) {
            set.remove(&subscriber);
            let empty = set.is_empty();
            if empty {
                drop(set);
                self.subscriptions.remove(topic);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct RecordingRouter {
        seen: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl TopicRouter for RecordingRouter {
        async fn route(&self, topic: &str, payload: Vec<u8>) {
            self.seen.lock().await.push((topic.to_string(), payload));
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let router = Arc::new(RecordingRouter { seen: Mutex::new(Vec::new()) });
        let broker = InMemoryBroker::new(60, 3600, router.clone());
        broker.publish("presence:alice", b"hello").await.unwrap();
        assert!(router.seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn publish_reaches_a_subscribed_topic() {
        let router = Arc::new(RecordingRouter { seen: Mutex::new(Vec::new()) });
        let broker = InMemoryBroker::new(60, 3600, router.clone());
        broker.subscribe("presence:alice", 1).await.unwrap();
        broker.publish("presence:alice", b"hello").await.unwrap();
        assert_eq!(router.seen.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn resume_record_round_trips() {
        let router = Arc::new(RecordingRouter { seen: Mutex::new(Vec::new()) });
        let broker = InMemoryBroker::new(60, 3600, router);
        let record = ResumeRecord { username: "alice".into(), identity_id: Some(1), created_at: 0 };
        broker.put_resume_record("tok", &record).await.unwrap();
        let fetched = broker.peek_resume_record("tok").await.unwrap().unwrap();
        assert_eq!(fetched.username, "alice");
        broker.delete_resume_record("tok").await.unwrap();
        assert!(broker.peek_resume_record("tok").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let router = Arc::new(RecordingRouter { seen: Mutex::new(Vec::new()) });
        let broker = InMemoryBroker::new(60, 3600, router.clone());
        broker.subscribe("presence:alice", 1).await.unwrap();
        broker.unsubscribe("presence:alice", 1).await.unwrap();
        broker.publish("presence:alice", b"hello").await.unwrap();
        assert!(router.seen.lock().await.is_empty());
    }
}
