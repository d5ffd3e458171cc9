//! Network listener configuration for the WebSocket transport (S6: "One
//! bidirectional framed channel per client ... carried over a WebSocket
//! upgrade").

use serde::Deserialize;
use std::net::SocketAddr;

/// WebSocket listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Address to bind to (e.g., "0.0.0.0:8080").
    pub address: SocketAddr,
    /// Allowed origins for the upgrade handshake. Empty list allows all origins.
    #[serde(default)]
    pub allow_origins: Vec<String>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".parse().expect("valid default address"),
            allow_origins: Vec::new(),
        }
    }
}

/// Client certificate authentication mode for the optional TLS listener.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClientAuth {
    #[default]
    None,
    Optional,
    Required,
}

/// TLS listener configuration. When present, the gateway binds a second
/// socket alongside the plaintext WebSocket listener.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// Address to bind to for TLS (e.g., "0.0.0.0:8443").
    pub address: SocketAddr,
    /// Path to certificate file (PEM format).
    pub cert_path: String,
    /// Path to private key file (PEM format).
    pub key_path: String,
    /// Client certificate verification mode.
    #[serde(default)]
    pub client_auth: ClientAuth,
    /// Path to CA certificate file for client verification (PEM format).
    pub ca_path: Option<String>,
}
