//! WebSocket server.
//!
//! Accepts plain or TLS connections, performs the upgrade handshake
//! (with optional bearer-token auth), registers each client with the
//! [`ConnectionManager`] and pumps frames between the socket and the
//! client's outbound channel. A periodic heartbeat task broadcasts a
//! state sync to every client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::{rustls, TlsAcceptor};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;

use super::connection::ConnectionManager;
use super::handler::MessageHandler;

pub struct RoletaServer {
    config: ServerConfig,
    handler: Arc<MessageHandler>,
    connections: Arc<ConnectionManager>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RoletaServer {
    pub fn new(
        config: ServerConfig,
        handler: Arc<MessageHandler>,
        connections: Arc<ConnectionManager>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            handler,
            connections,
            shutdown_tx,
        }
    }

    /// Sender used to trigger graceful shutdown from the signal handler.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run the accept loop until shutdown is triggered.
    pub async fn run(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        let tls = if self.config.tls.enabled {
            let paths = self
                .config
                .tls
                .cert_path
                .as_deref()
                .zip(self.config.tls.key_path.as_deref());
            match paths {
                Some((cert, key)) => match build_tls_acceptor(cert, key) {
                    Ok(acceptor) => {
                        info!(cert, "TLS enabled");
                        Some(acceptor)
                    }
                    Err(e) => {
                        warn!(error = %e, "TLS setup failed, falling back to plain WebSocket");
                        None
                    }
                },
                None => {
                    warn!("TLS enabled but certificate paths missing, falling back to plain WebSocket");
                    None
                }
            }
        } else {
            None
        };

        info!(
            addr = %addr,
            tls = tls.is_some(),
            auth = self.config.auth.enabled,
            "Roulette advisory server started"
        );

        let heartbeat_handle = self.spawn_heartbeat_task();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            self.handle_new_connection(stream, peer, tls.clone());
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        heartbeat_handle.abort();
        self.connections.close_all();
        info!("Server stopped");
        Ok(())
    }

    fn handle_new_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        tls: Option<TlsAcceptor>,
    ) {
        let handler = Arc::clone(&self.handler);
        let connections = Arc::clone(&self.connections);
        let shutdown_tx = self.shutdown_tx.clone();
        let auth = self.config.auth.clone();

        tokio::spawn(async move {
            let auth_check = make_auth_callback(auth.enabled, auth.token.clone().unwrap_or_default());
            match tls {
                Some(acceptor) => {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(peer = %peer, error = %e, "TLS handshake failed");
                            return;
                        }
                    };
                    let ws = match accept_hdr_async(tls_stream, auth_check).await {
                        Ok(ws) => ws,
                        Err(e) => {
                            warn!(peer = %peer, error = %e, "WebSocket handshake failed");
                            return;
                        }
                    };
                    client_task(ws, peer, handler, connections, shutdown_tx).await;
                }
                None => {
                    let ws = match accept_hdr_async(stream, auth_check).await {
                        Ok(ws) => ws,
                        Err(e) => {
                            warn!(peer = %peer, error = %e, "WebSocket handshake failed");
                            return;
                        }
                    };
                    client_task(ws, peer, handler, connections, shutdown_tx).await;
                }
            }
        });
    }

    fn spawn_heartbeat_task(&self) -> tokio::task::JoinHandle<()> {
        let handler = Arc::clone(&self.handler);
        let connections = Arc::clone(&self.connections);
        let period = Duration::from_secs(self.config.heartbeat_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if connections.client_count() == 0 {
                            continue;
                        }
                        let sync = handler.heartbeat().await;
                        connections.broadcast(&sync);
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Heartbeat task shutting down");
                        break;
                    }
                }
            }
        })
    }
}

/// Handshake callback rejecting connections without the expected
/// bearer token when auth is enabled.
fn make_auth_callback(
    enabled: bool,
    token: String,
) -> impl FnOnce(&Request, Response) -> std::result::Result<Response, ErrorResponse> {
    move |req: &Request, resp: Response| {
        if !enabled {
            return Ok(resp);
        }
        let expected = format!("Bearer {token}");
        let supplied = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok());
        if supplied == Some(expected.as_str()) {
            Ok(resp)
        } else {
            let mut denied = ErrorResponse::new(Some("unauthorized".to_string()));
            *denied.status_mut() = StatusCode::UNAUTHORIZED;
            Err(denied)
        }
    }
}

/// Pump frames for one client until it disconnects or the server shuts
/// down, then release its registration.
async fn client_task<S>(
    ws: WebSocketStream<S>,
    peer: SocketAddr,
    handler: Arc<MessageHandler>,
    connections: Arc<ConnectionManager>,
    shutdown_tx: broadcast::Sender<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let client_id = Uuid::new_v4();
    let device_key = peer.ip().to_string();
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let role = connections.register(client_id, device_key, tx);
    info!(client_id = %client_id, peer = %peer, role = role.as_str(), "Client connected");

    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        tokio::select! {
            Some(msg) = rx.recv() => {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = ws_tx.send(msg).await {
                    debug!(client_id = %client_id, error = %e, "Failed to send message");
                    break;
                }
                if closing {
                    break;
                }
            }
            msg_result = ws_rx.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        handler.handle_message(client_id, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            debug!(client_id = %client_id, error = %e, "Failed to send pong");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(client_id = %client_id, "Client requested close");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(client_id = %client_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!(client_id = %client_id, "Connection closed");
                        break;
                    }
                    _ => {}
                }
            }
            _ = shutdown_rx.recv() => {
                debug!(client_id = %client_id, "Shutdown signal received");
                break;
            }
        }
    }

    // A departing master leaves a grace claim; schedule its expiry so
    // a slave gets promoted if the master never comes back.
    if let Some(key) = connections.unregister(client_id) {
        let grace = connections.grace_period();
        let connections = Arc::clone(&connections);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            connections.expire_grace(&key);
        });
    }
    info!(client_id = %client_id, "Client disconnected");
}

fn build_tls_acceptor(cert_path: &str, key_path: &str) -> Result<TlsAcceptor> {
    let cert_file = std::fs::File::open(cert_path)
        .with_context(|| format!("failed to open certificate {cert_path}"))?;
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut std::io::BufReader::new(cert_file))
            .collect::<std::result::Result<_, _>>()
            .context("failed to parse certificate")?;

    let key_file = std::fs::File::open(key_path)
        .with_context(|| format!("failed to open private key {key_path}"))?;
    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut std::io::BufReader::new(key_file))
            .context("failed to parse private key")?
            .context("no private key found")?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("invalid certificate or key")?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}
