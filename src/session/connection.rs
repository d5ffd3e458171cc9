//! Connection: ephemeral per-transport state (S3).

use crate::codec::{Activity, CustomStatus, ServerMessage, Status};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Process-local, opaque connection identifier.
pub type ConnectionId = u64;

/// Mutable Connection state. Guarded by a `parking_lot::Mutex` rather than
/// an async lock: every access is a short, non-suspending read-modify-write
/// (S5 suspension-point rule keeps State Store/Broker/identity-adapter calls
/// off this lock entirely).
pub struct ConnectionState {
    pub username: Option<String>,
    pub identity_id: Option<i64>,
    pub avatar_url: Option<String>,
    pub status: Status,
    pub activity: Activity,
    pub project: Option<String>,
    pub language: Option<String>,
    pub custom_status: Option<CustomStatus>,
    /// Wall-clock deadline for the current custom status, if it was set with
    /// an expiry. Compared against the drained entry's deadline so a stale
    /// heap entry (superseded by a later `ss`/`clr`) is a no-op (S4.2).
    pub custom_status_deadline: Option<Instant>,
    pub subscribed_topics: HashSet<String>,
    pub resume_token: Option<String>,
    pub last_liveness: Instant,
    /// Last time this window reported any activity, for the Away timer (S4.2).
    pub last_activity: Instant,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            username: None,
            identity_id: None,
            avatar_url: None,
            status: Status::Online,
            activity: Activity::Idle,
            project: None,
            language: None,
            custom_status: None,
            custom_status_deadline: None,
            subscribed_topics: HashSet::new(),
            resume_token: None,
            last_liveness: Instant::now(),
            last_activity: Instant::now(),
        }
    }
}

/// A single open transport. Lives from accept until transport close or
/// terminal liveness failure (S3).
pub struct Connection {
    pub id: ConnectionId,
    outbound: mpsc::Sender<ServerMessage>,
    pub state: Mutex<ConnectionState>,
    /// Cancelled by the Liveness Monitor to force the transport task to
    /// close a dead connection (S4.5).
    kill: CancellationToken,
}

impl Connection {
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<ServerMessage>) -> Arc<Self> {
        Arc::new(Self {
            id,
            outbound,
            state: Mutex::new(ConnectionState::default()),
            kill: CancellationToken::new(),
        })
    }

    /// Token the transport task should select on to notice a Liveness
    /// Monitor-ordered termination.
    pub fn kill_token(&self) -> CancellationToken {
        self.kill.clone()
    }

    pub fn terminate(&self) {
        self.kill.cancel();
    }

    pub fn username(&self) -> Option<String> {
        self.state.lock().username.clone()
    }

    pub fn identity_id(&self) -> Option<i64> {
        self.state.lock().identity_id
    }

    pub fn touch_liveness(&self) {
        self.state.lock().last_liveness = Instant::now();
    }

    pub fn last_liveness(&self) -> Instant {
        self.state.lock().last_liveness
    }

    pub fn touch_activity(&self) {
        self.state.lock().last_activity = Instant::now();
    }

    /// Best-effort delivery. Ephemeral presence deltas aren't redelivered, so
    /// a full or closed mailbox is dropped rather than retried (Non-goals:
    /// no durable history, no offline queueing).
    pub fn send(&self, message: ServerMessage) {
        if self.outbound.try_send(message).is_ok() {
            crate::metrics::MESSAGES_SENT.inc();
        }
    }
}
