//! Inbound listeners and per-connection dispatch.
//!
//! An inbound owns a TCP listener and serves each accepted connection in
//! its own task. The `mixed` kind peeks the first byte to pick the
//! protocol handler: 0x04 and 0x05 go to the SOCKS entry point, anything
//! else is treated as HTTP. Every exit path, including panics, closes
//! the connection without disturbing the accept loop.

pub mod http;
pub mod socks;

pub use http::HttpInbound;
pub use socks::SocksInbound;

use crate::config::{InboundConfig, InboundKind};
use crate::error::ProxyError;
use crate::net::{BufferedStream, TargetAddr};
use crate::route::Router;
use anyhow::{Context, Result};
use futures::FutureExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Per-session request metadata.
///
/// Immutable after the handshake; the destination's resolved IP is the
/// only later addition, made by the egress resolver.
#[derive(Debug, Clone)]
pub struct Metadata {
    /// Peer address, when the client is a TCP socket
    pub remote_addr: Option<SocketAddr>,
    /// Requested destination
    pub dest: TargetAddr,
    /// Authentication state negotiated during the handshake
    pub auth: Option<AuthContext>,
}

/// Authentication state captured during negotiation.
///
/// Lives exactly as long as the connection that produced it.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Negotiated method code (0 = none, 2 = username/password)
    pub method: u8,
    /// Method-dependent attributes, e.g. `username` after a successful
    /// sub-negotiation
    pub attrs: HashMap<String, String>,
}

impl AuthContext {
    /// Context for a method with no attributes yet
    pub fn new(method: u8) -> Self {
        AuthContext {
            method,
            attrs: HashMap::new(),
        }
    }
}

/// A configured listener with its protocol handlers
#[derive(Debug)]
pub struct Inbound {
    kind: InboundKind,
    address: String,
    socks: Arc<SocksInbound>,
    http: Arc<HttpInbound>,
}

impl Inbound {
    /// Build the handlers for one configured listener
    pub fn new(config: &InboundConfig) -> Result<Self, ProxyError> {
        Ok(Inbound {
            kind: config.kind,
            address: config.config.address.clone(),
            socks: Arc::new(SocksInbound::new(&config.config.users)),
            http: Arc::new(HttpInbound::new()),
        })
    }

    /// The configured listen address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Bind the listener. Split from [`run_on`](Self::run_on) so startup
    /// errors surface before the server reports itself running.
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("failed to listen on {}", self.address))
    }

    /// Accept connections until the shutdown signal fires. In-flight
    /// connections are left to drain on their own.
    pub async fn run_on(
        self: Arc<Self>,
        listener: TcpListener,
        router: Arc<Router>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("inbound {} shutting down", self.address);
                    return;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("accept failed on {}: {}", self.address, e);
                            continue;
                        }
                    };

                    if let Err(e) = apply_keepalive(&stream) {
                        warn!("failed to set keepalive for {}: {}", peer, e);
                    }

                    let inbound = Arc::clone(&self);
                    let router = Arc::clone(&router);
                    tokio::spawn(async move {
                        inbound.serve_conn(stream, peer, router).await;
                    });
                }
            }
        }
    }

    /// Serve a single connection, catching panics at the task boundary.
    /// The connection is closed on every exit path by dropping it.
    async fn serve_conn(&self, stream: TcpStream, peer: SocketAddr, router: Arc<Router>) {
        let handled = AssertUnwindSafe(self.dispatch(stream, peer, &router))
            .catch_unwind()
            .await;
        match handled {
            Ok(Ok(())) => {}
            Ok(Err(e)) => info!("connection from {} ended: {:#}", peer, e),
            Err(_) => error!("connection task for {} panicked", peer),
        }
    }

    async fn dispatch(&self, stream: TcpStream, peer: SocketAddr, router: &Router) -> Result<()> {
        let mut conn = BufferedStream::new(stream);

        match self.kind {
            InboundKind::Http => self.http.handle(conn, router, Some(peer)).await,
            InboundKind::Socks4 | InboundKind::Socks5 => {
                self.socks.handle(conn, router, Some(peer)).await
            }
            InboundKind::Mixed => {
                let version = conn.peek(1).await?[0];
                match version {
                    0x04 | 0x05 => self.socks.handle(conn, router, Some(peer)).await,
                    _ => self.http.handle(conn, router, Some(peer)).await,
                }
            }
        }
    }
}

fn apply_keepalive(stream: &TcpStream) -> std::io::Result<()> {
    let sock = socket2::SockRef::from(stream);
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(20))
        .with_interval(Duration::from_secs(8));
    sock.set_tcp_keepalive(&keepalive)
}
