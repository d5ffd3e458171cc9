//! Decoupling seam between the Session Manager and the concrete broker
//! backend (S9 Design Notes: keep the ephemeral substrate behind a trait so
//! integration tests can run against an in-process stand-in instead of a
//! live Redis server).

use super::pubsub::SubscriberId;
use super::{Broker, CachedStatus, ResumeRecord};
use crate::error::BrokerError;
use async_trait::async_trait;

#[async_trait]
pub trait BrokerPort: Send + Sync {
    async fn put_resume_record(&self, token: &str, record: &ResumeRecord) -> Result<(), BrokerError>;
    async fn peek_resume_record(&self, token: &str) -> Result<Option<ResumeRecord>, BrokerError>;
    async fn delete_resume_record(&self, token: &str) -> Result<(), BrokerError>;
    async fn put_status_cache(&self, username: &str, status: &CachedStatus) -> Result<(), BrokerError>;
    async fn get_status_cache(&self, username: &str) -> Result<Option<CachedStatus>, BrokerError>;
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;
    async fn subscribe(&self, topic: &str, subscriber: SubscriberId) -> Result<(), BrokerError>;
    async fn unsubscribe(&self, topic: &str, subscriber: SubscriberId) -> Result<(), BrokerError>;
}

#[async_trait]
impl BrokerPort for Broker {
    async fn put_resume_record(&self, token: &str, record: &ResumeRecord) -> Result<(), BrokerError> {
        Broker::put_resume_record(self, token, record).await
    }

    async fn peek_resume_record(&self, token: &str) -> Result<Option<ResumeRecord>, BrokerError> {
        Broker::peek_resume_record(self, token).await
    }

    async fn delete_resume_record(&self, token: &str) -> Result<(), BrokerError> {
        Broker::delete_resume_record(self, token).await
    }

    async fn put_status_cache(&self, username: &str, status: &CachedStatus) -> Result<(), BrokerError> {
        Broker::put_status_cache(self, username, status).await
    }

    async fn get_status_cache(&self, username: &str) -> Result<Option<CachedStatus>, BrokerError> {
        Broker::get_status_cache(self, username).await
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        Broker::publish(self, topic, payload).await
    }

    async fn subscribe(&self, topic: &str, subscriber: SubscriberId) -> Result<(), BrokerError> {
        Broker::subscribe(self, topic, subscriber).await
    }

    async fn unsubscribe(&self, topic: &str, subscriber: SubscriberId) -> Result<(), BrokerError> {
        Broker::unsubscribe(self, topic, subscriber).await
    }
}
