//! Unified error handling for presenced.
//!
//! Each component gets its own `thiserror` error type; [`ErrorKind`] is the
//! top-level classification that maps onto the wire `error`/`loginError`
//! message's `code` field (S7).

use thiserror::Error;

/// Client-observable error classification (S7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed JSON or unknown message type. Connection is preserved.
    InvalidFrame,
    /// Bad token, taken username, or failed resume.
    AuthFailure,
    /// Operation requires an authenticated identity (e.g. channel create).
    Forbidden,
    /// Invite-code or channel-id does not resolve.
    NotFound,
    /// Channel membership is already at capacity.
    FullChannel,
    /// Caller is already a member of the target channel.
    AlreadyMember,
    /// Any unhandled server-side failure.
    InternalError,
}

impl ErrorKind {
    /// Static code string sent in the wire `error`/`loginError` message (S7).
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidFrame => "invalid_frame",
            ErrorKind::AuthFailure => "auth_failure",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::FullChannel => "full_channel",
            ErrorKind::AlreadyMember => "already_member",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

/// Top-level protocol error carrying both a classification and a
/// human-readable message for the client-visible `error`/`loginError` reply.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProtocolError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProtocolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidFrame, message)
    }

    pub fn auth_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthFailure, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn full_channel(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FullChannel, message)
    }

    pub fn already_member(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyMember, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }
}

/// State Store errors (S3/S6: users, preferences, channels, memberships).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("username already bound to a live session: {0}")]
    UsernameInUse(String),
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("invite code not found: {0}")]
    InviteCodeNotFound(String),
}

impl From<StoreError> for ProtocolError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UsernameInUse(name) => {
                ProtocolError::auth_failure(format!("username in use: {name}"))
            }
            StoreError::ChannelNotFound(id) => {
                ProtocolError::not_found(format!("channel not found: {id}"))
            }
            StoreError::InviteCodeNotFound(code) => {
                ProtocolError::not_found(format!("invite code not found: {code}"))
            }
            other => ProtocolError::internal(other.to_string()),
        }
    }
}

/// Ephemeral Broker errors (S3/S6: resume records, status cache, topics).
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("pub/sub task is no longer running")]
    TaskGone,
}

impl From<BrokerError> for ProtocolError {
    fn from(err: BrokerError) -> Self {
        ProtocolError::internal(err.to_string())
    }
}

/// Identity-adapter errors (S4.7 boundary interface).
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid or expired access token")]
    InvalidToken,
    #[error("identity provider unreachable: {0}")]
    Unreachable(String),
    #[error("identity adapter call exceeded its request budget")]
    Timeout,
}

/// Session Manager errors (S4.1).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("username in use: {0}")]
    UsernameInUse(String),
    #[error("resume token invalid or expired")]
    InvalidResumeToken,
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl From<SessionError> for ProtocolError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::UsernameInUse(name) => {
                ProtocolError::auth_failure(format!("username in use: {name}"))
            }
            SessionError::InvalidResumeToken => {
                ProtocolError::auth_failure("resume token invalid or expired")
            }
            SessionError::Identity(IdentityError::InvalidToken) => {
                ProtocolError::auth_failure("invalid or expired access token")
            }
            SessionError::Identity(other) => ProtocolError::internal(other.to_string()),
            SessionError::Store(e) => e.into(),
            SessionError::Broker(e) => e.into(),
        }
    }
}

/// Channel Engine errors (S4.3).
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel name must be 3-30 characters, got {0}")]
    InvalidName(usize),
    #[error("caller is not authenticated")]
    NotAuthenticated,
    #[error("invite code not found")]
    InviteNotFound,
    #[error("already a member of this channel")]
    AlreadyMember,
    #[error("channel is at capacity")]
    Full,
    #[error("caller is not a member of this channel")]
    NotMember,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl From<ChannelError> for ProtocolError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::InvalidName(len) => {
                ProtocolError::invalid_frame(format!("channel name must be 3-30 characters, got {len}"))
            }
            ChannelError::NotAuthenticated => {
                ProtocolError::forbidden("channel operations require an authenticated identity")
            }
            ChannelError::InviteNotFound => ProtocolError::not_found("invite code not found"),
            ChannelError::AlreadyMember => {
                ProtocolError::already_member("already a member of this channel")
            }
            ChannelError::Full => ProtocolError::full_channel("channel is at capacity"),
            ChannelError::NotMember => ProtocolError::forbidden("not a member of this channel"),
            ChannelError::Store(e) => e.into(),
            ChannelError::Broker(e) => e.into(),
        }
    }
}
