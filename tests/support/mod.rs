//! Shared harness for the fan-out integration tests: an in-process
//! `SessionManager` wired to `InMemoryBroker` + an in-memory SQLite `Store`,
//! driven directly through its public API instead of over a real transport.

use presenced::broker::{InMemoryBroker, TopicRouter};
use presenced::channel::ChannelEngine;
use presenced::codec::ServerMessage;
use presenced::config::{ChannelConfig, LimitsConfig, PresenceConfig};
use presenced::identity::mock::MockIdentityAdapter;
use presenced::identity::{IdentityAdapter, IdentityProfile};
use presenced::session::{Connection, SessionManager};
use presenced::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct Harness {
    pub sessions: Arc<SessionManager>,
    pub identity: Arc<MockIdentityAdapter>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(LimitsConfig::default(), PresenceConfig::default(), ChannelConfig::default()).await
    }

    pub async fn with_config(limits: LimitsConfig, presence: PresenceConfig, channels_cfg: ChannelConfig) -> Self {
        Self::with_resume_grace(limits, presence, channels_cfg, Duration::from_secs(60)).await
    }

    /// Like [`Harness::with_config`] but with a caller-chosen resume grace
    /// period, so a test can shrink it to observe a deferred offline
    /// actually fire after a `liveness_sweep` without waiting 60 real seconds.
    pub async fn with_resume_grace(
        limits: LimitsConfig,
        presence: PresenceConfig,
        channels_cfg: ChannelConfig,
        resume_grace: Duration,
    ) -> Self {
        let store = Store::connect("sqlite::memory:", 5).await.expect("in-memory store");
        let identity = Arc::new(MockIdentityAdapter::new());
        let dyn_identity: Arc<dyn IdentityAdapter> = identity.clone();
        let channels = ChannelEngine::new(store.clone(), channels_cfg);

        let sessions = SessionManager::new(store, dyn_identity, channels, &limits, &presence, resume_grace);
        let broker = InMemoryBroker::new(60, 3600, sessions.clone() as Arc<dyn TopicRouter>);
        sessions.attach_broker(Arc::new(broker));

        Self { sessions, identity }
    }

    /// Seed a fixture identity behind a bearer token, following the same
    /// token -> profile mapping a real identity provider would resolve.
    pub fn seed_identity(
        &self,
        token: &str,
        identity_id: i64,
        username: &str,
        followers: Vec<i64>,
        following: Vec<i64>,
        close_friends: Vec<i64>,
    ) {
        self.identity.seed(
            token,
            IdentityProfile {
                identity_id,
                username: username.to_string(),
                avatar_url: None,
                followers,
                following,
                close_friends,
            },
        );
    }

    /// Accept a connection and drive a fresh, token-authenticated login to
    /// completion, draining (and discarding) the `loginSuccess`/`sync` pair.
    pub async fn login(&self, username: &str, token: &str) -> Client {
        let (connection, outbound) = self.sessions.accept();
        self.sessions
            .login(&connection, username.to_string(), Some(token.to_string()), None)
            .await
            .expect("login should succeed");
        let mut client = Client { connection, outbound };
        client.recv().await; // loginSuccess
        client.recv().await; // sync
        client
    }

    /// Accept a connection and log in as a guest (no token, no identity).
    pub async fn login_guest(&self, username: &str) -> Client {
        let (connection, outbound) = self.sessions.accept();
        self.sessions
            .login(&connection, username.to_string(), None, None)
            .await
            .expect("guest login should succeed");
        let mut client = Client { connection, outbound };
        client.recv().await; // loginSuccess
        client.recv().await; // sync
        client
    }
}

/// A logged-in test client: the `Connection` handle plus the outbound
/// mailbox the Gateway would otherwise drain into a WebSocket frame.
pub struct Client {
    pub connection: Arc<Connection>,
    pub outbound: mpsc::Receiver<ServerMessage>,
}

impl Client {
    /// Receive the next outbound message, or panic if none arrives shortly.
    /// Fan-out here is all in-process with no network hop, so a short
    /// timeout is just a guard against a genuinely stuck test.
    pub async fn recv(&mut self) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(1), self.outbound.recv())
            .await
            .expect("expected a message before the timeout")
            .expect("outbound channel closed unexpectedly")
    }

    /// Assert nothing arrives within a short window (non-admission, filtered
    /// delta, etc).
    pub async fn assert_silent(&mut self) {
        let result = tokio::time::timeout(Duration::from_millis(150), self.outbound.recv()).await;
        assert!(result.is_err(), "expected silence, but a message arrived");
    }
}
