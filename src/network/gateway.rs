//! Gateway: the WebSocket listener(s) that accept client transports and hand
//! them to the Session Manager (S6: "One bidirectional framed channel per
//! client ... carried over a WebSocket upgrade").
//!
//! Binds the plaintext listener always and, when `tls` is configured, a
//! second TLS listener alongside it. Each accepted transport gets its own
//! task running a `tokio::select!` loop between inbound frames and the
//! outbound queue the Session Manager drains into, mirroring the unified
//! read/write loop every other transport handler in this codebase uses.

use crate::codec::{ClientMessage, ServerMessage};
use crate::config::{ClientAuth, TlsConfig, WebSocketConfig};
use crate::error::ProtocolError;
use crate::network::rate_limit::RateLimitManager;
use crate::session::SessionManager;
use futures_util::{SinkExt, StreamExt};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{RootCertStore, ServerConfig as RustlsServerConfig};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, instrument, warn};

/// Binds the configured listener(s) and runs the accept loop forever.
pub struct Gateway {
    listener: TcpListener,
    tls: Option<(TcpListener, TlsAcceptor)>,
    sessions: Arc<SessionManager>,
    rate_limits: Arc<RateLimitManager>,
    allow_origins: Arc<Vec<String>>,
}

impl Gateway {
    pub async fn bind(
        listen: &WebSocketConfig,
        tls: Option<&TlsConfig>,
        sessions: Arc<SessionManager>,
        rate_limits: Arc<RateLimitManager>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(listen.address).await?;
        info!(address = %listen.address, "Gateway listening");

        let tls = match tls {
            Some(cfg) => {
                let acceptor = build_tls_acceptor(cfg).await?;
                let tls_listener = TcpListener::bind(cfg.address).await?;
                info!(address = %cfg.address, "Gateway listening (TLS)");
                Some((tls_listener, acceptor))
            }
            None => None,
        };

        Ok(Self {
            listener,
            tls,
            sessions,
            rate_limits,
            allow_origins: Arc::new(listen.allow_origins.clone()),
        })
    }

    /// Run both listeners (if TLS is configured) until either returns an error.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> anyhow::Result<()> {
        let Gateway { listener, tls, sessions, rate_limits, allow_origins } = self;

        if let Some((tls_listener, acceptor)) = tls {
            let sessions = sessions.clone();
            let rate_limits = rate_limits.clone();
            let allow_origins = allow_origins.clone();
            tokio::spawn(async move {
                loop {
                    match tls_listener.accept().await {
                        Ok((stream, addr)) => {
                            let acceptor = acceptor.clone();
                            let sessions = sessions.clone();
                            let rate_limits = rate_limits.clone();
                            let allow_origins = allow_origins.clone();
                            tokio::spawn(async move {
                                if !rate_limits.check_connection_rate(addr.ip()) {
                                    debug!(%addr, "connection rejected by rate limiter");
                                    return;
                                }
                                match acceptor.accept(stream).await {
                                    Ok(tls_stream) => {
                                        accept_websocket(tls_stream, addr, sessions, rate_limits, allow_origins).await;
                                    }
                                    Err(e) => {
                                        warn!(%addr, error = %e, "TLS handshake failed");
                                        rate_limits.release_connection(addr.ip());
                                    }
                                }
                            });
                        }
                        Err(e) => error!(error = %e, "failed to accept TLS connection"),
                    }
                }
            });
        }

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let sessions = sessions.clone();
                    let rate_limits = rate_limits.clone();
                    let allow_origins = allow_origins.clone();
                    tokio::spawn(async move {
                        if !rate_limits.check_connection_rate(addr.ip()) {
                            debug!(%addr, "connection rejected by rate limiter");
                            return;
                        }
                        accept_websocket(stream, addr, sessions, rate_limits, allow_origins).await;
                    });
                }
                Err(e) => error!(error = %e, "failed to accept connection"),
            }
        }
    }
}

/// Build the `rustls` server config for the TLS listener, following the
/// same cert/key loading and client-auth branching as this codebase's other
/// TLS listener setup.
async fn build_tls_acceptor(cfg: &TlsConfig) -> anyhow::Result<TlsAcceptor> {
    let cert_data = tokio::fs::read(&cfg.cert_path).await?;
    let cert_chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut Cursor::new(&cert_data))
        .filter_map(|r| r.ok())
        .collect();
    if cert_chain.is_empty() {
        anyhow::bail!("no certificates found in {}", cfg.cert_path);
    }

    let key_data = tokio::fs::read(&cfg.key_path).await?;
    let key: PrivateKeyDer<'static> = rustls_pemfile::pkcs8_private_keys(&mut Cursor::new(&key_data))
        .filter_map(|r| r.ok())
        .map(PrivateKeyDer::Pkcs8)
        .next()
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", cfg.key_path))?;

    let builder = RustlsServerConfig::builder();
    let tls_config = if cfg.client_auth == ClientAuth::None {
        builder.with_no_client_auth().with_single_cert(cert_chain, key)?
    } else {
        let ca_path = cfg
            .ca_path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("tls.ca_path is required when client_auth is not none"))?;
        let ca_data = tokio::fs::read(ca_path).await?;
        let ca_certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut Cursor::new(&ca_data))
            .filter_map(|r| r.ok())
            .collect();
        let mut root_store = RootCertStore::empty();
        for cert in ca_certs {
            root_store.add(cert)?;
        }

        let verifier_builder = WebPkiClientVerifier::builder(Arc::new(root_store));
        let verifier = if cfg.client_auth == ClientAuth::Optional {
            verifier_builder.allow_unauthenticated().build()?
        } else {
            verifier_builder.build()?
        };

        builder.with_client_cert_verifier(verifier).with_single_cert(cert_chain, key)?
    };

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

/// Upgrade an accepted transport to a WebSocket, rejecting the handshake if
/// `Origin` isn't on the configured allow-list (an empty list allows all).
async fn accept_websocket<S>(
    stream: S,
    addr: SocketAddr,
    sessions: Arc<SessionManager>,
    rate_limits: Arc<RateLimitManager>,
    allow_origins: Arc<Vec<String>>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let callback = move |req: &Request, response: Response| {
        if allow_origins.is_empty() {
            return Ok(response);
        }
        let origin = req.headers().get("origin").and_then(|v| v.to_str().ok());
        match origin {
            Some(o) if allow_origins.iter().any(|allowed| allowed == o) => Ok(response),
            _ => {
                let mut rejected = ErrorResponse::default();
                *rejected.status_mut() = http::StatusCode::FORBIDDEN;
                Err(rejected)
            }
        }
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(s) => s,
        Err(e) => {
            debug!(%addr, error = %e, "WebSocket upgrade failed");
            rate_limits.release_connection(addr.ip());
            return;
        }
    };

    run_connection(ws_stream, addr, sessions, rate_limits).await;
}

/// Drive a single upgraded transport until close, disconnect, or a
/// Liveness-Monitor-ordered termination.
async fn run_connection<S>(
    ws_stream: WebSocketStream<S>,
    addr: SocketAddr,
    sessions: Arc<SessionManager>,
    rate_limits: Arc<RateLimitManager>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws_stream.split();
    let (connection, mut outbound) = sessions.accept();
    let kill = connection.kill_token();
    let connection_id = connection.id;

    info!(%addr, connection_id, "connection accepted");

    loop {
        tokio::select! {
            _ = kill.cancelled() => break,

            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        if !rate_limits.check_message_rate(connection_id) {
                            continue;
                        }
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => sessions.handle_message(&connection, message).await,
                            Err(e) => {
                                debug!(%addr, connection_id, error = %e, "malformed frame");
                                let err = ProtocolError::invalid_frame(e.to_string());
                                connection.send(ServerMessage::Error { error: err.message, code: Some(err.kind.code()) });
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        if sink.send(WsMessage::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%addr, connection_id, error = %e, "read error");
                        break;
                    }
                }
            }

            outgoing = outbound.recv() => {
                match outgoing {
                    Some(message) => {
                        let text = serde_json::to_string(&message).expect("ServerMessage always serializes");
                        if sink.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    sessions.disconnect(&connection).await;
    rate_limits.remove_connection(connection_id);
    rate_limits.release_connection(addr.ip());
    info!(%addr, connection_id, "connection closed");
}
