//! Ephemeral Broker: key/value + pub/sub substrate (S3/S6).
//!
//! Owns Resume Records (60s TTL), the Status Cache (1h TTL), and the
//! `presence:{username}` / `channel:{id}` topics that carry encoded
//! server-messages between replicas. One connection-manager handle is used
//! for commands; subscriptions are multiplexed through a single dedicated
//! pub/sub task so that the physical SUBSCRIBE/UNSUBSCRIBE only happens at
//! 0<->1 reference-count transitions per topic (S5 shared-resource policy).

mod bus;
mod memory;
mod pubsub;

use crate::error::BrokerError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use bus::BrokerPort;
pub use memory::InMemoryBroker;
pub use pubsub::{SubscriberId, TopicRouter};

/// Resume Record: what a client's resume-token resolves to (S3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub username: String,
    pub identity_id: Option<i64>,
    pub created_at: i64,
}

/// Status Cache entry: last-published {status, activity, project, language}
/// for a username, used to reconstruct state for late subscribers (S3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachedStatus {
    pub status: String,
    pub activity: String,
    pub project: Option<String>,
    pub language: Option<String>,
}

/// Handle to the Ephemeral Broker.
#[derive(Clone)]
pub struct Broker {
    commands: ConnectionManager,
    subs: Arc<pubsub::SubscriptionHandle>,
    resume_ttl_secs: u64,
    status_cache_ttl_secs: u64,
}

impl Broker {
    pub async fn connect(
        url: &str,
        resume_ttl_secs: u64,
        status_cache_ttl_secs: u64,
        router: Arc<dyn TopicRouter>,
    ) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)?;
        let commands = ConnectionManager::new(client.clone()).await?;
        let subs = pubsub::SubscriptionHandle::spawn(client, router).await?;

        Ok(Self {
            commands,
            subs: Arc::new(subs),
            resume_ttl_secs: resume_ttl_secs.max(1),
            status_cache_ttl_secs: status_cache_ttl_secs.max(1),
        })
    }

    /// `session:{resumeToken}` (S6 keyspace).
    fn resume_key(token: &str) -> String {
        format!("session:{token}")
    }

    /// `status:{username}` (S6 keyspace).
    fn status_key(username: &str) -> String {
        format!("status:{username}")
    }

    pub async fn put_resume_record(&self, token: &str, record: &ResumeRecord) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.commands.clone();
        conn.set_ex::<_, _, ()>(Self::resume_key(token), payload, self.resume_ttl_secs)
            .await?;
        Ok(())
    }

    /// Fetch a Resume Record without consuming it, so the Session Manager can
    /// check the declared username matches before deciding to resume (S4.1
    /// resolution order: a resume-token that doesn't match falls through to
    /// the next login path rather than failing outright).
    pub async fn peek_resume_record(&self, token: &str) -> Result<Option<ResumeRecord>, BrokerError> {
        let mut conn = self.commands.clone();
        let raw: Option<String> = conn.get(Self::resume_key(token)).await?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    /// Consume a Resume Record on successful resume (S3: "Consumed on
    /// successful resume").
    pub async fn delete_resume_record(&self, token: &str) -> Result<(), BrokerError> {
        let mut conn = self.commands.clone();
        conn.del::<_, ()>(Self::resume_key(token)).await?;
        Ok(())
    }

    pub async fn put_status_cache(&self, username: &str, status: &CachedStatus) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(status)?;
        let mut conn = self.commands.clone();
        conn.set_ex::<_, _, ()>(Self::status_key(username), payload, self.status_cache_ttl_secs)
            .await?;
        Ok(())
    }

    pub async fn get_status_cache(&self, username: &str) -> Result<Option<CachedStatus>, BrokerError> {
        let mut conn = self.commands.clone();
        let raw: Option<String> = conn.get(Self::status_key(username)).await?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    /// Publish an already-encoded server-message payload to `topic`.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let mut conn = self.commands.clone();
        conn.publish::<_, _, ()>(topic, payload).await?;
        Ok(())
    }

    /// Subscribe `subscriber` to `topic`, issuing the physical SUBSCRIBE only
    /// on the 0->1 transition.
    pub async fn subscribe(&self, topic: &str, subscriber: pubsub::SubscriberId) -> Result<(), BrokerError> {
        self.subs.subscribe(topic, subscriber).await
    }

    /// Unsubscribe `subscriber` from `topic`, issuing the physical
    /// UNSUBSCRIBE only on the 1->0 transition.
    pub async fn unsubscribe(&self, topic: &str, subscriber: pubsub::SubscriberId) -> Result<(), BrokerError> {
        self.subs.unsubscribe(topic, subscriber).await
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(1)
    }
}
