//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (`Config` and its sub-trees)
//! - [`listen`]: Network listener configuration (`WebSocketConfig`, `TlsConfig`)
//! - [`security`]: Flood/connection-guard configuration (`RateLimitConfig`)
//! - [`limits`]: Request-budget limits (`LimitsConfig`)
//! - [`defaults`]: Default value functions referenced by `#[serde(default = "...")]`
//! - [`validation`]: Startup validation of a loaded `Config`

mod defaults;
mod limits;
mod listen;
mod security;
mod types;
pub mod validation;

pub use limits::LimitsConfig;
pub use listen::{ClientAuth, TlsConfig, WebSocketConfig};
pub use security::{RateLimitConfig, SecurityConfig};
pub use types::{BrokerConfig, ChannelConfig, Config, LogFormat, PresenceConfig, ServerConfig, StoreConfig};
pub use validation::validate;
