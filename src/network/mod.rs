//! Network transport: the WebSocket Gateway and its flood-protection guard.

pub mod gateway;
pub mod rate_limit;

pub use gateway::Gateway;
pub use rate_limit::RateLimitManager;
