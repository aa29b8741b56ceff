//! SOCKS5 inbound handler.
//!
//! Drives a client connection from greeting to relay: method negotiation,
//! the selected authenticator's sub-exchange, request decoding, egress
//! selection, CONNECT execution and the bidirectional relay. BIND and
//! UDP ASSOCIATE are answered with command-not-supported.

mod auth;
pub mod consts;

pub use auth::{Authenticator, CredentialStore, NoAuth, StaticCredentials, UserPassAuth};

use crate::config::User;
use crate::error::{DialErrorKind, ProxyError, SocksError};
use crate::inbound::Metadata;
use crate::net::{
    decode_address, encode_reply, relay, BufferedStream, StreamDyn, TargetAddr, SOCKS5_VERSION,
};
use crate::route::Router;
use anyhow::{Context, Result};
use consts::*;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

struct SocksRequest {
    cmd: u8,
    metadata: Metadata,
}

/// SOCKS5 protocol handler with its authenticator registry
#[derive(Debug)]
pub struct SocksInbound {
    auth_methods: HashMap<u8, Arc<dyn Authenticator>>,
}

impl SocksInbound {
    /// Build the handler for a listener.
    ///
    /// A configured user list makes username/password the only offered
    /// method; otherwise only no-auth is offered.
    pub fn new(users: &[User]) -> Self {
        let mut auth_methods: HashMap<u8, Arc<dyn Authenticator>> = HashMap::new();
        if users.is_empty() {
            auth_methods.insert(AUTH_METHOD_NONE, Arc::new(NoAuth));
        } else {
            let store = Box::new(StaticCredentials::from_users(users));
            auth_methods.insert(AUTH_METHOD_PASSWORD, Arc::new(UserPassAuth::new(store)));
        }
        SocksInbound { auth_methods }
    }

    /// Serve one connection to completion
    pub async fn handle<S>(
        &self,
        mut conn: BufferedStream<S>,
        router: &Router,
        peer: Option<SocketAddr>,
    ) -> Result<()>
    where
        S: StreamDyn,
    {
        let request = self
            .handshake(&mut conn, peer)
            .await
            .context("handshake failed")?;

        let outbound = router.route(&request.metadata);

        // Resolve the destination if the client sent a FQDN.
        let mut dest = request.metadata.dest.clone();
        if let Some(domain) = dest.domain_name().map(String::from) {
            if !dest.is_resolved() {
                match outbound.resolve(&domain).await {
                    Ok(ip) => dest.set_resolved(ip),
                    Err(e) => {
                        send_reply(&mut conn, REPLY_HOST_UNREACHABLE, None).await?;
                        return Err(e.context(format!("failed to resolve {}", domain)));
                    }
                }
            }
        }

        match request.cmd {
            CMD_CONNECT => self.handle_connect(conn, &dest, outbound.as_ref()).await,
            cmd => {
                send_reply(&mut conn, REPLY_COMMAND_NOT_SUPPORTED, None).await?;
                Err(SocksError::CommandNotSupported(cmd).into())
            }
        }
    }

    async fn handshake<S>(
        &self,
        conn: &mut BufferedStream<S>,
        peer: Option<SocketAddr>,
    ) -> Result<SocksRequest>
    where
        S: StreamDyn,
    {
        let auth = self.authenticate(conn).await?;

        // VER CMD RSV, reserved byte discarded
        let mut header = [0u8; 3];
        conn.read_exact(&mut header).await?;
        let cmd = header[1];

        let dest = match decode_address(conn).await {
            Ok(dest) => dest,
            Err(ProxyError::Socks(SocksError::AddressTypeNotSupported(atyp))) => {
                send_reply(conn, REPLY_ADDRESS_TYPE_NOT_SUPPORTED, None).await?;
                return Err(SocksError::AddressTypeNotSupported(atyp).into());
            }
            Err(e) => return Err(anyhow::Error::from(e).context("failed to read destination")),
        };

        Ok(SocksRequest {
            cmd,
            metadata: Metadata {
                remote_addr: peer,
                dest,
                auth: Some(auth),
            },
        })
    }

    async fn authenticate<S>(
        &self,
        conn: &mut BufferedStream<S>,
    ) -> Result<crate::inbound::AuthContext>
    where
        S: StreamDyn,
    {
        // VER NMETHODS, then exactly NMETHODS method bytes
        let mut header = [0u8; 2];
        conn.read_exact(&mut header).await?;
        if header[0] != SOCKS5_VERSION {
            return Err(SocksError::UnsupportedVersion(header[0]).into());
        }

        let methods = conn.read_full(header[1] as usize).await?;
        for method in &methods {
            if let Some(authenticator) = self.auth_methods.get(method) {
                return authenticator.authenticate(conn).await;
            }
        }

        conn.write_all(&[SOCKS5_VERSION, AUTH_METHOD_NOT_ACCEPTABLE])
            .await?;
        conn.flush().await?;
        Err(SocksError::NoAcceptableMethod.into())
    }

    async fn handle_connect<S>(
        &self,
        mut conn: BufferedStream<S>,
        dest: &TargetAddr,
        outbound: &dyn crate::outbound::Outbound,
    ) -> Result<()>
    where
        S: StreamDyn,
    {
        let target = match outbound.dial(&dest.dial_addr()).await {
            Ok(target) => target,
            Err(e) => {
                send_reply(&mut conn, reply_code_for_dial(e.kind), None).await?;
                return Err(anyhow::Error::from(e).context(format!("connect to {} failed", dest)));
            }
        };

        let bind = target.local_addr().map(TargetAddr::from);
        send_reply(&mut conn, REPLY_SUCCEEDED, bind.as_ref()).await?;

        info!("CONNECT {} established", dest);
        relay(conn, target).await;
        debug!("CONNECT {} finished", dest);
        Ok(())
    }
}

/// Map a dial failure class onto a SOCKS5 reply code
fn reply_code_for_dial(kind: DialErrorKind) -> u8 {
    match kind {
        DialErrorKind::Refused => REPLY_CONNECTION_REFUSED,
        DialErrorKind::NetworkUnreachable => REPLY_NETWORK_UNREACHABLE,
        DialErrorKind::HostUnreachable | DialErrorKind::Other => REPLY_HOST_UNREACHABLE,
    }
}

async fn send_reply<W>(w: &mut W, code: u8, bind: Option<&TargetAddr>) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    w.write_all(&encode_reply(code, bind)).await?;
    w.flush().await?;
    Ok(())
}
