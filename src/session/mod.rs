//! Session Manager: the orchestrator that owns every live Connection, the
//! Window Set index, the local subscription table, and the login/disconnect/
//! dispatch contracts (S4.1-S4.5). Everything else in this repo is a pure
//! function or a storage/transport adapter; this is where their results get
//! turned into fan-out decisions.

mod connection;
mod subscriptions;

pub use connection::{Connection, ConnectionId, ConnectionState};
pub use subscriptions::SubscriptionTable;

use crate::broker::{BrokerPort, ResumeRecord, TopicRouter};
use crate::channel::{self, ChannelEngine};
use crate::codec::{
    Activity, ClientMessage, CompactUser, CustomStatus, PreferencesUpdate, ServerMessage, Status, VisibilityMode,
};
use crate::config::{LimitsConfig, PresenceConfig};
use crate::error::{IdentityError, ProtocolError, SessionError};
use crate::identity::IdentityAdapter;
use crate::metrics;
use crate::presence::{self, CustomStatusExpiryQueue, PendingOfflineQueue, StatusUpdateInput, WindowSnapshot};
use crate::privacy;
use crate::store::Store;
use crate::telemetry;
use async_trait::async_trait;
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

fn generate_resume_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn error_message(err: ProtocolError) -> ServerMessage {
    ServerMessage::Error {
        error: err.message,
        code: Some(err.kind.code()),
    }
}

/// Orchestrates every live Connection on this process (S3/S4). Constructed
/// before the Ephemeral Broker (a circular dependency: the Broker needs a
/// [`TopicRouter`] and the Session Manager needs a [`BrokerPort`]), so the
/// broker handle is installed after construction via [`attach_broker`].
pub struct SessionManager {
    store: Store,
    identity: Arc<dyn IdentityAdapter>,
    channels: ChannelEngine,
    connections: DashMap<ConnectionId, Arc<Connection>>,
    windows: DashMap<String, HashSet<ConnectionId>>,
    subscriptions: SubscriptionTable,
    expiry: CustomStatusExpiryQueue,
    pending_offline: PendingOfflineQueue,
    /// Per-username generation counter, bumped on every login that opens a
    /// window. A deferred offline only fires if the epoch it captured at
    /// schedule time still matches (S4.1 resume contract, I3).
    offline_epoch: DashMap<String, u64>,
    broker: OnceLock<Arc<dyn BrokerPort>>,
    next_connection_id: AtomicU64,
    identity_timeout: Duration,
    max_friend_subscriptions: usize,
    away_timeout: Duration,
    propagate_status_to_channels: bool,
    /// Grace period a last-window offline is deferred by, so a resume within
    /// the window cancels it instead of flapping (S4.1, I3). Matches the
    /// Broker's resume-token TTL.
    resume_grace: Duration,
}

impl SessionManager {
    pub fn new(
        store: Store,
        identity: Arc<dyn IdentityAdapter>,
        channels: ChannelEngine,
        limits: &LimitsConfig,
        presence_config: &PresenceConfig,
        resume_grace: Duration,
    ) -> Arc<Self> {
        let propagate_status_to_channels = channels.propagates_status_updates();
        Arc::new(Self {
            store,
            identity,
            channels,
            connections: DashMap::new(),
            windows: DashMap::new(),
            subscriptions: SubscriptionTable::new(),
            expiry: CustomStatusExpiryQueue::new(),
            pending_offline: PendingOfflineQueue::new(),
            offline_epoch: DashMap::new(),
            broker: OnceLock::new(),
            next_connection_id: AtomicU64::new(1),
            identity_timeout: Duration::from_millis(limits.identity_timeout_ms),
            max_friend_subscriptions: limits.max_friend_subscriptions,
            away_timeout: Duration::from_secs(presence_config.away_timeout_secs),
            propagate_status_to_channels,
            resume_grace,
        })
    }

    /// Installs the Broker handle once it has been constructed with this
    /// Session Manager (as an `Arc<dyn TopicRouter>`) as its router.
    pub fn attach_broker(&self, broker: Arc<dyn BrokerPort>) {
        let _ = self.broker.set(broker);
    }

    fn broker(&self) -> &Arc<dyn BrokerPort> {
        self.broker.get().expect("broker must be attached before serving traffic")
    }

    /// Register a new Connection, handing back the receiver the network
    /// layer drains to write outbound frames to the transport.
    pub fn accept(&self) -> (Arc<Connection>, mpsc::Receiver<ServerMessage>) {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(256);
        let connection = Connection::new(id, tx);
        self.connections.insert(id, connection.clone());
        metrics::CONNECTED_SESSIONS.inc();
        (connection, rx)
    }

    // ------------------------------------------------------------------
    // Login (S4.1)
    // ------------------------------------------------------------------

    pub async fn login(
        &self,
        connection: &Arc<Connection>,
        declared_username: String,
        token: Option<String>,
        resume_token: Option<String>,
    ) -> Result<(), SessionError> {
        enum Resolved {
            Resume { username: String, identity_id: Option<i64> },
            Fresh {
                username: String,
                identity_id: i64,
                avatar_url: Option<String>,
                followers: Vec<i64>,
                following: Vec<i64>,
            },
            Guest { username: String },
        }

        let resumed = if let Some(tok) = resume_token.as_deref() {
            match self.broker().peek_resume_record(tok).await? {
                Some(record) if record.username == declared_username => {
                    self.broker().delete_resume_record(tok).await?;
                    Some(Resolved::Resume {
                        username: record.username,
                        identity_id: record.identity_id,
                    })
                }
                _ => None,
            }
        } else {
            None
        };

        let resolved = match resumed {
            Some(r) => r,
            None => match token {
                Some(tok) => {
                    let profile = tokio::time::timeout(self.identity_timeout, self.identity.resolve(&tok))
                        .await
                        .map_err(|_| SessionError::Identity(IdentityError::Timeout))??;
                    self.store
                        .upsert_user(
                            profile.identity_id,
                            &profile.username,
                            profile.avatar_url.as_deref(),
                            &profile.followers,
                            &profile.following,
                            &profile.close_friends,
                        )
                        .await?;
                    Resolved::Fresh {
                        username: profile.username,
                        identity_id: profile.identity_id,
                        avatar_url: profile.avatar_url,
                        followers: profile.followers,
                        following: profile.following,
                    }
                }
                None => {
                    let already_online = self
                        .windows
                        .get(&declared_username)
                        .is_some_and(|set| !set.is_empty());
                    if already_online {
                        return Err(SessionError::UsernameInUse(declared_username));
                    }
                    self.store.register_guest(&declared_username).await?;
                    Resolved::Guest { username: declared_username }
                }
            },
        };

        let is_resume = matches!(resolved, Resolved::Resume { .. });
        let username = match &resolved {
            Resolved::Resume { username, .. } => username.clone(),
            Resolved::Fresh { username, .. } => username.clone(),
            Resolved::Guest { username } => username.clone(),
        };

        let (identity_id, avatar_url, followers, following) = match resolved {
            Resolved::Resume { identity_id, .. } => match identity_id {
                Some(id) => match self.store.get_user_by_identity(id).await? {
                    Some(user) => (Some(id), user.avatar_url, user.followers, user.following),
                    None => (Some(id), None, Vec::new(), Vec::new()),
                },
                None => (None, None, Vec::new(), Vec::new()),
            },
            Resolved::Fresh { identity_id, avatar_url, followers, following, .. } => {
                (Some(identity_id), avatar_url, followers, following)
            }
            Resolved::Guest { .. } => (None, None, Vec::new(), Vec::new()),
        };

        {
            let mut state = connection.state.lock();
            state.username = Some(username.clone());
            state.identity_id = identity_id;
            state.avatar_url = avatar_url;
            state.status = Status::Online;
            state.activity = crate::codec::Activity::Idle;
            state.project = None;
            state.language = None;
        }

        self.windows.entry(username.clone()).or_default().insert(connection.id);
        metrics::ONLINE_USERS.set(self.windows.len() as i64);
        // Invalidate any offline deferred for this username by an earlier
        // last-window disconnect (S4.1 resume contract, I3): the entry's
        // captured epoch no longer matches, so the sweep will skip it.
        *self.offline_epoch.entry(username.clone()).or_insert(0) += 1;

        let mut follower_usernames = Vec::new();
        for identity in &followers {
            if let Ok(Some(user)) = self.store.get_user_by_identity(*identity).await {
                follower_usernames.push(user.username);
            }
        }
        let mut following_usernames = Vec::new();
        for identity in &following {
            if let Ok(Some(user)) = self.store.get_user_by_identity(*identity).await {
                following_usernames.push(user.username);
            }
        }

        let mut friend_usernames: Vec<String> = follower_usernames
            .iter()
            .cloned()
            .chain(following_usernames.iter().cloned())
            .collect();
        friend_usernames.sort_unstable();
        friend_usernames.dedup();
        if friend_usernames.len() > self.max_friend_subscriptions {
            tracing::warn!(
                username = %username,
                count = friend_usernames.len(),
                limit = self.max_friend_subscriptions,
                "friend set exceeds subscription ceiling, truncating"
            );
            friend_usernames.truncate(self.max_friend_subscriptions);
        }
        for friend in &friend_usernames {
            self.subscribe_topic(connection, &presence::presence_topic(friend)).await;
        }

        if let Some(id) = identity_id {
            if let Ok(channel_ids) = self.store.list_member_channel_ids(id).await {
                for channel_id in channel_ids {
                    self.subscribe_topic(connection, &channel::topic_for(&channel_id)).await;
                }
            }
        }

        let new_resume_token = generate_resume_token();
        let record = ResumeRecord {
            username: username.clone(),
            identity_id,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        self.broker().put_resume_record(&new_resume_token, &record).await?;
        connection.state.lock().resume_token = Some(new_resume_token.clone());

        connection.send(ServerMessage::LoginSuccess {
            token: new_resume_token,
            identity_id,
            followers: identity_id.map(|_| follower_usernames),
            following: identity_id.map(|_| following_usernames),
        });

        let sync = self.build_initial_sync(identity_id, &friend_usernames).await;
        connection.send(sync);

        if !is_resume {
            if let Some(online) = self.build_online_message(&username) {
                self.publish_presence_event(&username, online).await;
            }
        }

        Ok(())
    }

    async fn build_initial_sync(&self, viewer_identity: Option<i64>, friends: &[String]) -> ServerMessage {
        let mut users = Vec::new();
        for username in friends {
            let locally_online = self.windows.get(username).is_some_and(|set| !set.is_empty());
            if !locally_online {
                continue;
            }
            let Ok(Some(target)) = self.store.get_user_by_username(username).await else {
                continue;
            };
            let prefs = self.store.get_preferences(target.identity_id).await.unwrap_or_default();
            if !privacy::admits(viewer_identity, &target, &prefs) {
                continue;
            }
            let user = self.compact_user_snapshot(username).await;
            users.push(privacy::redact_compact_user(user, &prefs));
        }
        ServerMessage::Sync { users }
    }

    // ------------------------------------------------------------------
    // Disconnect (S3: "lives from accept until transport close")
    // ------------------------------------------------------------------

    pub async fn disconnect(&self, connection: &Arc<Connection>) {
        self.connections.remove(&connection.id);
        metrics::CONNECTED_SESSIONS.dec();

        let topics: Vec<String> = connection.state.lock().subscribed_topics.iter().cloned().collect();
        for topic in &topics {
            self.unsubscribe_topic(connection, topic).await;
        }

        let Some(username) = connection.username() else {
            return;
        };
        let identity_id = connection.identity_id();

        let became_empty = match self.windows.get_mut(&username) {
            Some(mut set) => {
                set.remove(&connection.id);
                let empty = set.is_empty();
                if empty {
                    drop(set);
                    self.windows.remove(&username);
                }
                empty
            }
            None => false,
        };
        metrics::ONLINE_USERS.set(self.windows.len() as i64);

        if became_empty {
            let ts = chrono::Utc::now().timestamp_millis();
            if let Some(id) = identity_id {
                if let Err(e) = self.store.update_last_seen(id, ts).await {
                    tracing::warn!(error = %e, "failed to persist last-seen timestamp");
                }
            }
            // Defer the offline publish by the resume grace period instead
            // of firing it on the spot (S4.1 resume contract, I3 "no
            // flapping"): a resume within the window bumps the username's
            // epoch in `login`, which invalidates this entry before the
            // Liveness Monitor sweep ever drains it.
            let epoch = self.offline_epoch.get(&username).map(|e| *e).unwrap_or(0);
            self.pending_offline
                .schedule(username, epoch, ts, Instant::now() + self.resume_grace);
        }
    }

    // ------------------------------------------------------------------
    // Dispatch (S4.6: malformed/unknown frames never tear down the transport)
    // ------------------------------------------------------------------

    pub async fn handle_message(&self, connection: &Arc<Connection>, message: ClientMessage) {
        connection.touch_liveness();
        match message {
            ClientMessage::Login { username, token, resume_token } => {
                if let Err(err) = self.login(connection, username, token, resume_token).await {
                    metrics::LOGIN_FAILURES.inc();
                    let proto: ProtocolError = err.into();
                    connection.send(ServerMessage::LoginError { error: proto.message });
                }
            }
            ClientMessage::StatusUpdate { s, a, p, l } => {
                self.handle_status_update(connection, s, a, p, l).await;
            }
            ClientMessage::PrefsUpdate { prefs } => {
                self.handle_prefs_update(connection, prefs).await;
            }
            ClientMessage::Heartbeat => connection.send(ServerMessage::Heartbeat),
            ClientMessage::CreateChannel { name } => self.handle_create_channel(connection, name).await,
            ClientMessage::JoinChannel { invite_code } => self.handle_join_channel(connection, invite_code).await,
            ClientMessage::LeaveChannel { channel_id } => self.handle_leave_channel(connection, channel_id).await,
            ClientMessage::ChannelMessage { channel_id, content } => {
                self.handle_channel_chat(connection, channel_id, content).await;
            }
            ClientMessage::SetCustomStatus { text, emoji, expires_in } => {
                self.handle_set_custom_status(connection, text, emoji, expires_in).await;
            }
            ClientMessage::ClearCustomStatus => self.handle_clear_custom_status(connection).await,
        }
    }

    async fn handle_status_update(
        &self,
        connection: &Arc<Connection>,
        s: Option<Status>,
        a: Option<crate::codec::Activity>,
        p: Option<Option<String>>,
        l: Option<Option<String>>,
    ) {
        let Some(username) = connection.username() else {
            connection.send(error_message(ProtocolError::forbidden("login required")));
            return;
        };
        connection.touch_activity();

        let input = StatusUpdateInput { status: s, activity: a, project: p, language: l };
        let applied = {
            let mut state = connection.state.lock();
            presence::apply_status_update(&username, &mut state, input)
        };

        if let Err(e) = self.broker().put_status_cache(&username, &applied.cached).await {
            tracing::warn!(error = %e, "failed to refresh status cache");
        }

        if let Some(delta) = applied.delta {
            self.publish_presence_event(&username, delta.clone()).await;
            if self.propagate_status_to_channels {
                self.propagate_to_channels(connection, &username, &delta).await;
            }
        }
    }

    async fn propagate_to_channels(&self, connection: &Arc<Connection>, username: &str, delta: &ServerMessage) {
        let ServerMessage::Update { s, a, p, l, .. } = delta else {
            return;
        };
        let channel_ids: Vec<String> = {
            let state = connection.state.lock();
            state
                .subscribed_topics
                .iter()
                .filter_map(|topic| topic.strip_prefix("channel:").map(str::to_string))
                .collect()
        };
        for channel_id in channel_ids {
            let msg = ServerMessage::ChannelUpdate {
                channel_id: channel_id.clone(),
                id: username.to_string(),
                s: *s,
                a: *a,
                p: p.clone(),
                l: l.clone(),
            };
            self.publish_channel_event(&channel_id, msg).await;
        }
    }

    async fn handle_prefs_update(&self, connection: &Arc<Connection>, update: crate::codec::PreferencesUpdate) {
        let Some(identity_id) = connection.identity_id() else {
            connection.send(error_message(ProtocolError::forbidden(
                "preferences require an authenticated identity",
            )));
            return;
        };
        let Some(username) = connection.username() else { return };

        let before = match self.store.get_preferences(identity_id).await {
            Ok(p) => p,
            Err(e) => {
                connection.send(error_message(ProtocolError::internal(e.to_string())));
                return;
            }
        };
        let was_invisible = before.visibility == crate::codec::VisibilityMode::Invisible;

        let after = match self.store.update_preferences(identity_id, &update).await {
            Ok(p) => p,
            Err(e) => {
                connection.send(error_message(ProtocolError::internal(e.to_string())));
                return;
            }
        };
        let now_invisible = after.visibility == crate::codec::VisibilityMode::Invisible;

        // Preference-change re-evaluation (S4.4): a transition into/out of
        // invisible mode must be published immediately, since it otherwise
        // wouldn't surface until the next status update.
        if !was_invisible && now_invisible {
            let ts = chrono::Utc::now().timestamp_millis();
            self.publish_presence_event(&username, ServerMessage::Offline { id: username.clone(), ts })
                .await;
        } else if was_invisible && !now_invisible {
            if let Some(online) = self.build_online_message(&username) {
                self.publish_presence_event(&username, online).await;
            }
        }
    }

    async fn handle_create_channel(&self, connection: &Arc<Connection>, name: String) {
        let (Some(identity_id), Some(username)) = (connection.identity_id(), connection.username()) else {
            connection.send(error_message(ProtocolError::forbidden(
                "channel operations require an authenticated identity",
            )));
            return;
        };
        match self.channels.create(identity_id, &username, &name).await {
            Ok(chan) => {
                self.subscribe_topic(connection, &channel::topic_for(&chan.id)).await;
                connection.send(ServerMessage::CreateChannelOk {
                    channel_id: chan.id.clone(),
                    name: chan.name.clone(),
                    invite_code: chan.invite_code.clone(),
                });
                let me = self.compact_user_snapshot(&username).await;
                connection.send(ServerMessage::ChannelSync {
                    channel_id: chan.id,
                    name: chan.name,
                    members: vec![me],
                });
                metrics::ACTIVE_CHANNELS.inc();
            }
            Err(e) => connection.send(error_message(e.into())),
        }
    }

    async fn handle_join_channel(&self, connection: &Arc<Connection>, invite_code: String) {
        let (Some(identity_id), Some(username)) = (connection.identity_id(), connection.username()) else {
            connection.send(error_message(ProtocolError::forbidden(
                "channel operations require an authenticated identity",
            )));
            return;
        };

        let chan = match self.channels.join(identity_id, &invite_code).await {
            Ok(c) => c,
            Err(e) => {
                connection.send(error_message(e.into()));
                return;
            }
        };
        if let Err(e) = self.channels.add_member(&chan.id, identity_id, &username).await {
            connection.send(error_message(e.into()));
            return;
        }

        self.subscribe_topic(connection, &channel::topic_for(&chan.id)).await;
        connection.send(ServerMessage::JoinChannelOk {
            channel_id: chan.id.clone(),
            name: chan.name.clone(),
        });

        let members = match self.store.list_members(&chan.id).await {
            Ok(rows) => rows,
            Err(e) => {
                connection.send(error_message(ProtocolError::internal(e.to_string())));
                return;
            }
        };
        let mut roster = Vec::with_capacity(members.len());
        for member in &members {
            roster.push(self.compact_user_snapshot(&member.username).await);
        }
        connection.send(ServerMessage::ChannelSync {
            channel_id: chan.id.clone(),
            name: chan.name,
            members: roster,
        });

        let joined = self.compact_user_snapshot(&username).await;
        self.publish_channel_event(&chan.id, ServerMessage::ChannelJoined { channel_id: chan.id, member: joined })
            .await;
    }

    async fn handle_leave_channel(&self, connection: &Arc<Connection>, channel_id: String) {
        let Some(identity_id) = connection.identity_id() else {
            connection.send(error_message(ProtocolError::forbidden(
                "channel operations require an authenticated identity",
            )));
            return;
        };
        let Some(username) = connection.username() else { return };

        if let Err(e) = self.channels.leave(&channel_id, identity_id).await {
            connection.send(error_message(e.into()));
            return;
        }
        self.unsubscribe_topic(connection, &channel::topic_for(&channel_id)).await;
        self.publish_channel_event(&channel_id.clone(), ServerMessage::ChannelLeft { channel_id, id: username })
            .await;
    }

    async fn handle_channel_chat(&self, connection: &Arc<Connection>, channel_id: String, content: String) {
        let Some(identity_id) = connection.identity_id() else {
            connection.send(error_message(ProtocolError::forbidden(
                "channel operations require an authenticated identity",
            )));
            return;
        };
        let Some(username) = connection.username() else { return };

        if let Err(e) = self.channels.assert_member(&channel_id, identity_id).await {
            connection.send(error_message(e.into()));
            return;
        }
        let ts = chrono::Utc::now().timestamp_millis();
        self.publish_channel_event(
            &channel_id.clone(),
            ServerMessage::ChannelChat { channel_id, id: username, content, ts },
        )
        .await;
    }

    async fn handle_set_custom_status(
        &self,
        connection: &Arc<Connection>,
        text: String,
        emoji: Option<String>,
        expires_in: Option<u64>,
    ) {
        let Some(username) = connection.username() else {
            connection.send(error_message(ProtocolError::forbidden("login required")));
            return;
        };
        let msg = {
            let mut state = connection.state.lock();
            let status = crate::codec::CustomStatus { text, emoji };
            let msg = presence::set_custom_status(&username, &mut state, status);
            state.custom_status_deadline = expires_in.map(|secs| Instant::now() + Duration::from_secs(secs));
            if let Some(deadline) = state.custom_status_deadline {
                self.expiry.schedule(connection.id, deadline);
            }
            msg
        };
        self.publish_presence_event(&username, msg).await;
    }

    async fn handle_clear_custom_status(&self, connection: &Arc<Connection>) {
        let Some(username) = connection.username() else { return };
        let msg = {
            let mut state = connection.state.lock();
            state.custom_status_deadline = None;
            presence::clear_custom_status(&username, &mut state)
        };
        self.publish_presence_event(&username, msg).await;
    }

    // ------------------------------------------------------------------
    // Liveness Monitor (S4.5)
    // ------------------------------------------------------------------

    pub async fn liveness_sweep(&self, interval: Duration) {
        let snapshot: Vec<Arc<Connection>> = self.connections.iter().map(|e| e.value().clone()).collect();
        let now = Instant::now();

        for connection in snapshot {
            if now.duration_since(connection.last_liveness()) > interval {
                metrics::LIVENESS_TERMINATIONS.inc();
                connection.terminate();
                self.disconnect(&connection).await;
                continue;
            }
            connection.send(ServerMessage::Heartbeat);

            let away_delta: Option<(String, ServerMessage)> = {
                let mut state = connection.state.lock();
                if state.status != Status::Away && now.duration_since(state.last_activity) > self.away_timeout {
                    state.username.clone().and_then(|username| {
                        presence::apply_away_transition(&username, &mut state).map(|msg| (username, msg))
                    })
                } else {
                    None
                }
            };
            if let Some((username, msg)) = away_delta {
                self.publish_presence_event(&username, msg).await;
            }
        }

        for expired in self.expiry.drain_expired(now) {
            let Some(connection) = self.connections.get(&expired.connection_id).map(|c| c.clone()) else {
                continue;
            };
            let clear: Option<(String, ServerMessage)> = {
                let mut state = connection.state.lock();
                let still_pending = state.custom_status_deadline.is_some_and(|deadline| deadline <= now);
                if still_pending {
                    state.custom_status_deadline = None;
                    state
                        .username
                        .clone()
                        .map(|username| (username.clone(), presence::clear_custom_status(&username, &mut state)))
                } else {
                    None
                }
            };
            if let Some((username, msg)) = clear {
                self.publish_presence_event(&username, msg).await;
            }
        }

        for due in self.pending_offline.drain_due(now) {
            let current_epoch = self.offline_epoch.get(&due.username).map(|e| *e).unwrap_or(0);
            if current_epoch != due.epoch {
                continue; // a login re-populated the Window Set since this was scheduled
            }
            let still_online = self.windows.get(&due.username).is_some_and(|set| !set.is_empty());
            if still_online {
                continue;
            }
            self.publish_presence_event(&due.username, ServerMessage::Offline { id: due.username.clone(), ts: due.ts })
                .await;
        }
    }

    // ------------------------------------------------------------------
    // Subscription bookkeeping and snapshotting helpers
    // ------------------------------------------------------------------

    async fn subscribe_topic(&self, connection: &Arc<Connection>, topic: &str) {
        let newly_tracked = connection.state.lock().subscribed_topics.insert(topic.to_string());
        if !newly_tracked {
            return;
        }
        if self.subscriptions.subscribe(topic, connection.id) {
            if let Err(e) = self.broker().subscribe(topic, connection.id).await {
                tracing::warn!(error = %e, topic, "broker subscribe failed");
            }
        }
    }

    async fn unsubscribe_topic(&self, connection: &Arc<Connection>, topic: &str) {
        let was_tracked = connection.state.lock().subscribed_topics.remove(topic);
        if !was_tracked {
            return;
        }
        if self.subscriptions.unsubscribe(topic, connection.id) {
            if let Err(e) = self.broker().unsubscribe(topic, connection.id).await {
                tracing::warn!(error = %e, topic, "broker unsubscribe failed");
            }
        }
    }

    fn window_snapshots(&self, username: &str) -> Vec<WindowSnapshot> {
        self.windows
            .get(username)
            .map(|set| {
                set.iter()
                    .filter_map(|id| {
                        self.connections.get(id).map(|c| {
                            let state = c.state.lock();
                            WindowSnapshot { connection_id: *id, status: state.status, activity: state.activity }
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The aggregated window's live fields, for a username with at least one
    /// local Connection. `None` if nobody holding that username is connected
    /// to this process.
    fn aggregated_fields(
        &self,
        username: &str,
    ) -> Option<(Status, crate::codec::Activity, Option<String>, Option<String>, Option<String>)> {
        let winner = presence::aggregate_windows(&self.window_snapshots(username))?;
        let connection = self.connections.get(&winner.connection_id)?;
        let state = connection.state.lock();
        Some((state.status, state.activity, state.avatar_url.clone(), state.project.clone(), state.language.clone()))
    }

    fn build_online_message(&self, username: &str) -> Option<ServerMessage> {
        let (status, activity, avatar, project, language) = self.aggregated_fields(username)?;
        Some(ServerMessage::Online {
            id: username.to_string(),
            a: avatar,
            s: status,
            act: activity,
            p: project,
            l: language,
        })
    }

    /// Build a [`CompactUser`] snapshot for a username, preferring the live
    /// local Window Set, then the Status Cache, then an Offline/Idle
    /// placeholder (S4.3 Join roster resolution order).
    async fn compact_user_snapshot(&self, username: &str) -> CompactUser {
        if let Some((status, activity, avatar, project, language)) = self.aggregated_fields(username) {
            return CompactUser {
                id: username.to_string(),
                a: avatar,
                s: status,
                act: activity,
                p: project,
                l: language,
                ls: None,
            };
        }

        if let Ok(Some(cached)) = self.broker().get_status_cache(username).await {
            return CompactUser {
                id: username.to_string(),
                a: None,
                s: presence::parse_status(&cached.status),
                act: presence::parse_activity(&cached.activity),
                p: cached.project,
                l: cached.language,
                ls: None,
            };
        }

        CompactUser {
            id: username.to_string(),
            a: None,
            s: Status::Offline,
            act: crate::codec::Activity::Idle,
            p: None,
            l: None,
            ls: None,
        }
    }

    async fn publish_presence_event(&self, username: &str, msg: ServerMessage) {
        self.publish(&presence::presence_topic(username), msg).await;
    }

    async fn publish_channel_event(&self, channel_id: &str, msg: ServerMessage) {
        self.publish(&channel::topic_for(channel_id), msg).await;
    }

    async fn publish(&self, topic: &str, msg: ServerMessage) {
        let payload = match serde_json::to_vec(&msg) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, topic, "failed to encode outbound message");
                return;
            }
        };
        if let Err(e) = self.broker().publish(topic, &payload).await {
            tracing::warn!(error = %e, topic, "broker publish failed");
        }
    }
}

#[async_trait]
impl TopicRouter for SessionManager {
    /// Dispatch a payload the Broker delivered for `topic` to every local
    /// subscriber, applying the Privacy Filter on the presence path. Channel
    /// topics bypass the filter: subscription to a `channel:{id}` topic
    /// already implies membership (S4.4).
    async fn route(&self, topic: &str, payload: Vec<u8>) {
        let Ok(msg) = serde_json::from_slice::<ServerMessage>(&payload) else {
            tracing::warn!(topic, "dropping malformed routed payload");
            return;
        };

        if let Some(channel_id) = topic.strip_prefix("channel:") {
            self.route_channel_message(channel_id, msg).await;
        } else if let Some(username) = topic.strip_prefix("presence:") {
            self.route_presence_message(username, msg).await;
        }
    }
}

impl SessionManager {
    async fn route_presence_message(&self, target_username: &str, msg: ServerMessage) {
        let topic = presence::presence_topic(target_username);
        let subscribers = self.subscriptions.subscribers(&topic);
        if subscribers.is_empty() {
            return;
        }

        // Guests have no persisted User record (S3: guest registrations are
        // stored separately), so they carry no graph-based restriction and
        // are treated as Everyone-visible with the default share flags.
        let user = self.store.get_user_by_username(target_username).await.ok().flatten();
        let prefs = match &user {
            Some(u) => self.store.get_preferences(u.identity_id).await.unwrap_or_default(),
            None => crate::store::PreferencesRecord::default(),
        };

        let _span = telemetry::create_fanout_span(&topic, subscribers.len()).entered();
        for connection_id in subscribers {
            let Some(connection) = self.connections.get(&connection_id).map(|c| c.clone()) else {
                continue;
            };
            let admitted = match &user {
                Some(u) => privacy::admits(connection.identity_id(), u, &prefs),
                None => true,
            };
            if !admitted {
                metrics::PRIVACY_DROPS.inc();
                continue;
            }
            connection.send(privacy::redact_outbound(msg.clone(), &prefs));
        }
    }

    async fn route_channel_message(&self, channel_id: &str, msg: ServerMessage) {
        let topic = channel::topic_for(channel_id);
        let subscribers = self.subscriptions.subscribers(&topic);
        if subscribers.is_empty() {
            return;
        }
        let _span = telemetry::create_fanout_span(&topic, subscribers.len()).entered();
        for connection_id in subscribers {
            if let Some(connection) = self.connections.get(&connection_id) {
                connection.send(msg.clone());
            }
        }
    }
}
