//! presenced - real-time presence and group-messaging fan-out server.

use presenced::broker::Broker;
use presenced::channel::ChannelEngine;
use presenced::config::Config;
use presenced::identity::mock::MockIdentityAdapter;
use presenced::network::{Gateway, RateLimitManager};
use presenced::session::SessionManager;
use presenced::store::Store;
use presenced::{http, metrics};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Resolve the configuration path from CLI arguments. Supports `-c <path>`,
/// `--config <path>`, or a bare path. Falls back to `config.toml`.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "config.toml".to_string(),
    };

    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = resolve_config_path();

    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("ERROR: failed to load config from {}: {}", config_path, e);
        e
    })?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match config.server.log_format {
        presenced::config::LogFormat::Json => {
            tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true).json().init();
        }
        presenced::config::LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true).init();
        }
    }

    if let Err(errors) = presenced::config::validate(&config) {
        for err in &errors {
            error!(error = %err, "configuration validation failed");
        }
        return Err(anyhow::anyhow!("configuration validation failed with {} error(s)", errors.len()));
    }

    info!(server = %config.server.name, "starting presenced");

    metrics::init();

    let store = Store::connect(&config.store.url, config.store.pool_size).await?;

    // Real identity-provider integration (token verification, social-graph
    // enumeration) is out of scope for this repo; the Session Manager only
    // ever depends on the `IdentityAdapter` trait, so a production
    // deployment swaps this for a real implementation without touching
    // session logic.
    let identity: Arc<dyn presenced::identity::IdentityAdapter> = Arc::new(MockIdentityAdapter::new());

    let channels = ChannelEngine::new(store.clone(), config.channels.clone());

    // The Session Manager and Broker have a circular dependency: the Broker
    // needs a `TopicRouter` and the Session Manager needs a `BrokerPort`.
    // Construct the Session Manager first and attach the Broker handle once
    // it exists, as `SessionManager::attach_broker` documents.
    let session_manager = SessionManager::new(
        store,
        identity,
        channels,
        &config.limits,
        &config.presence,
        Duration::from_secs(config.broker.resume_ttl_secs),
    );

    let broker = Broker::connect(
        &config.broker.url,
        config.broker.resume_ttl_secs,
        config.broker.status_cache_ttl_secs,
        session_manager.clone() as Arc<dyn presenced::broker::TopicRouter>,
    )
    .await?;
    session_manager.attach_broker(Arc::new(broker));

    if config.server.metrics_port != 0 {
        let metrics_port = config.server.metrics_port;
        tokio::spawn(async move {
            http::run_http_server(metrics_port).await;
        });
    }

    {
        let session_manager = session_manager.clone();
        let interval = Duration::from_secs(config.server.heartbeat_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                session_manager.liveness_sweep(interval).await;
            }
        });
    }

    let rate_limits = Arc::new(RateLimitManager::new(config.security.rate_limits.clone()));
    let gateway = Gateway::bind(&config.listen, config.tls.as_ref(), session_manager, rate_limits).await?;

    gateway.run().await?;

    Ok(())
}
