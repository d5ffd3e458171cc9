//! Reference-counted pub/sub multiplexing over a single Redis subscriber
//! connection (S5: "one publisher handle and one subscriber handle per
//! process; subscription reference-counted so that the physical
//! subscribe/unsubscribe happens only at 0<->1 transitions per topic").

use crate::error::BrokerError;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use redis::Client;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Opaque identifier of a local subscriber (a Connection), used only for
/// reference counting in this module.
pub type SubscriberId = u64;

/// Delivers a message that arrived on a topic to whichever local Connections
/// hold a subscription to it. Implemented by the Session Manager's local
/// router; decouples the Broker from any domain knowledge of viewers.
#[async_trait]
pub trait TopicRouter: Send + Sync {
    async fn route(&self, topic: &str, payload: Vec<u8>);
}

enum Command {
    Subscribe {
        topic: String,
        subscriber: SubscriberId,
        reply: oneshot::Sender<Result<(), BrokerError>>,
    },
    Unsubscribe {
        topic: String,
        subscriber: SubscriberId,
        reply: oneshot::Sender<Result<(), BrokerError>>,
    },
}

/// Front-end handle for the dedicated pub/sub task.
pub struct SubscriptionHandle {
    commands: mpsc::Sender<Command>,
}

impl SubscriptionHandle {
    pub async fn spawn(client: Client, router: Arc<dyn TopicRouter>) -> Result<Self, BrokerError> {
        let (tx, rx) = mpsc::channel(256);
        let pubsub = client.get_async_pubsub().await?;
        tokio::spawn(run_pubsub_task(pubsub, rx, router));
        Ok(Self { commands: tx })
    }

    pub async fn subscribe(&self, topic: &str, subscriber: SubscriberId) -> Result<(), BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                topic: topic.to_string(),
                subscriber,
                reply,
            })
            .await
            .map_err(|_| BrokerError::TaskGone)?;
        rx.await.unwrap_or(Err(BrokerError::TaskGone))
    }

    pub async fn unsubscribe(&self, topic: &str, subscriber: SubscriberId) -> Result<(), BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Unsubscribe {
                topic: topic.to_string(),
                subscriber,
                reply,
            })
            .await
            .map_err(|_| BrokerError::TaskGone)?;
        rx.await.unwrap_or(Err(BrokerError::TaskGone))
    }
}

async fn run_pubsub_task(
    mut pubsub: redis::aio::PubSub,
    mut commands: mpsc::Receiver<Command>,
    router: Arc<dyn TopicRouter>,
) {
    let refcounts: DashMap<String, HashSet<SubscriberId>> = DashMap::new();

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    Command::Subscribe { topic, subscriber, reply } => {
                        let should_subscribe = {
                            let mut entry = refcounts.entry(topic.clone()).or_default();
                            let was_empty = entry.is_empty();
                            entry.insert(subscriber);
                            was_empty
                        };
                        let result = if should_subscribe {
                            pubsub.subscribe(&topic).await.map_err(BrokerError::from)
                        } else {
                            Ok(())
                        };
                        let _ = reply.send(result);
                    }
                    Command::Unsubscribe { topic, subscriber, reply } => {
                        let should_unsubscribe = {
                            match refcounts.get_mut(&topic) {
                                Some(mut set) => {
                                    set.remove(&subscriber);
                                    set.is_empty()
                                }
                                None => false,
                            }
                        };
                        if should_unsubscribe {
                            refcounts.remove(&topic);
                        }
                        let result = if should_unsubscribe {
                            pubsub.unsubscribe(&topic).await.map_err(BrokerError::from)
                        } else {
                            Ok(())
                        };
                        let _ = reply.send(result);
                    }
                }
            }
            msg = pubsub.on_message().next() => {
                let Some(msg) = msg else { continue };
                let topic = msg.get_channel_name().to_string();
                let payload = msg.get_payload_bytes().to_vec();
                router.route(&topic, payload).await;
            }
        }
    }

    warn!("pub/sub task exiting: command channel closed");
}
