//! Core configuration type definitions.

use serde::Deserialize;

use super::defaults::{
    default_away_timeout_secs, default_custom_status_max_chars, default_heartbeat_interval_secs,
    default_invite_code_ttl_days, default_max_channel_members,
    default_metrics_port, default_resume_ttl_secs, default_status_cache_ttl_secs,
    default_store_pool_size, default_true,
};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Pretty
    }
}

/// Server identity and process-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Human-readable deployment name, used only in logs.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Log output format: "pretty" or "json".
    #[serde(default)]
    pub log_format: LogFormat,
    /// Prometheus metrics HTTP port. Set to 0 to disable the endpoint.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Interval between Liveness Monitor sweeps, in seconds (S4.5).
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_server_name() -> String {
    "presenced".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            log_format: LogFormat::Pretty,
            metrics_port: default_metrics_port(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

/// State Store connection configuration (S6).
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Connection URL, e.g. `sqlite://presenced.db` or `sqlite::memory:`.
    /// Overridable via the `PRESENCED_STORE_URL` environment variable.
    pub url: String,
    /// Bounded connection pool size (S5 shared-resource policy: "e.g. 20").
    #[serde(default = "default_store_pool_size")]
    pub pool_size: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://presenced.db".to_string(),
            pool_size: default_store_pool_size(),
        }
    }
}

/// Ephemeral Broker connection configuration (S6).
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379`.
    /// Overridable via the `PRESENCED_BROKER_URL` environment variable.
    pub url: String,
    /// Resume Record TTL in seconds (S3: "TTL: 60 seconds").
    #[serde(default = "default_resume_ttl_secs")]
    pub resume_ttl_secs: u64,
    /// Status Cache TTL in seconds (S3: "TTL: 1 hour").
    #[serde(default = "default_status_cache_ttl_secs")]
    pub status_cache_ttl_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            resume_ttl_secs: default_resume_ttl_secs(),
            status_cache_ttl_secs: default_status_cache_ttl_secs(),
        }
    }
}

/// Presence Engine tuning knobs (S4.2).
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    /// Seconds of reported inactivity before a window transitions to Away.
    #[serde(default = "default_away_timeout_secs")]
    pub away_timeout_secs: u64,
    /// Maximum code points accepted in a custom-status text field.
    #[serde(default = "default_custom_status_max_chars")]
    pub custom_status_max_chars: usize,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            away_timeout_secs: default_away_timeout_secs(),
            custom_status_max_chars: default_custom_status_max_chars(),
        }
    }
}

/// Channel Engine tuning knobs (S4.3).
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Maximum distinct members per channel (I6).
    #[serde(default = "default_max_channel_members")]
    pub max_members: usize,
    /// Whether channel-update (`cu`) fan-out to channel topics is enabled
    /// in addition to graph-based presence fan-out (S4.3, open question).
    #[serde(default = "default_true")]
    pub propagate_status_to_channels: bool,
    /// Optional invite-code expiry, in days. `None` means invite codes never
    /// expire (S9 open question: "documentation states they do; source
    /// enforcement is absent").
    #[serde(default = "default_invite_code_ttl_days")]
    pub invite_code_ttl_days: Option<u64>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_members: default_max_channel_members(),
            propagate_status_to_channels: true,
            invite_code_ttl_days: default_invite_code_ttl_days(),
        }
    }
}

/// Top-level configuration tree, loaded once at startup (S9: "the only
/// global is the configured port and broker/store URLs read once at startup").
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub listen: super::listen::WebSocketConfig,
    pub tls: Option<super::listen::TlsConfig>,
    pub store: StoreConfig,
    pub broker: BrokerConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub channels: ChannelConfig,
    #[serde(default)]
    pub security: super::security::SecurityConfig,
    #[serde(default)]
    pub limits: super::limits::LimitsConfig,
}

impl Config {
    /// Load configuration from a TOML file, then apply environment-variable
    /// overrides for the two connection URLs (S6 Configuration: "Supplied via
    /// a `config.toml` file ... layered with environment-variable overrides
    /// for the two connection URLs and any secret").
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config file {path}: {e}"))?;
        let mut config: Config = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing config file {path}: {e}"))?;

        if let Ok(url) = std::env::var("PRESENCED_STORE_URL") {
            config.store.url = url;
        }
        if let Ok(url) = std::env::var("PRESENCED_BROKER_URL") {
            config.broker.url = url;
        }

        Ok(config)
    }
}
