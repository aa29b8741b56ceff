//! Upstream SOCKS5 egress.
//!
//! Tunnels connections through a remote SOCKS5 server, with optional
//! username/password authentication. This is the factory registered
//! under the `"socks5"` outbound type.

use super::{Outbound, ProxyStream};
use crate::error::{DialError, DialErrorKind};
use crate::net::{decode_address, encode_target, TargetAddr, SOCKS5_VERSION};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const AUTH_NONE: u8 = 0x00;
const AUTH_PASSWORD: u8 = 0x02;
const CMD_CONNECT: u8 = 0x01;

/// Configuration payload for the `"socks5"` outbound factory
#[derive(Debug, Clone, Deserialize)]
pub struct Socks5OutboundConfig {
    /// `HOST:PORT` of the upstream SOCKS5 server
    pub address: String,
    /// Optional login, enables username/password authentication
    #[serde(default)]
    pub username: Option<String>,
    /// Password for the login
    #[serde(default)]
    pub password: Option<String>,
}

/// Egress that forwards connections through an upstream SOCKS5 server
#[derive(Debug)]
pub struct Socks5Outbound {
    server: String,
    username: Option<String>,
    password: Option<String>,
}

/// Factory entry point for the `"socks5"` outbound type
pub fn from_config(raw: serde_json::Value) -> Result<Arc<dyn Outbound>> {
    let conf: Socks5OutboundConfig =
        serde_json::from_value(raw).context("invalid socks5 outbound config")?;
    Ok(Arc::new(Socks5Outbound::new(conf)?))
}

impl Socks5Outbound {
    /// Validate the configuration and build the adapter
    pub fn new(conf: Socks5OutboundConfig) -> Result<Self> {
        if conf.address.is_empty() {
            bail!("socks5 outbound requires an address");
        }
        if let Some(user) = &conf.username {
            if user.is_empty() || user.len() > 255 {
                bail!("socks5 outbound username must be 1-255 bytes");
            }
            let pass_len = conf.password.as_deref().map(str::len).unwrap_or(0);
            if pass_len == 0 || pass_len > 255 {
                bail!("socks5 outbound password must be 1-255 bytes");
            }
        }
        Ok(Socks5Outbound {
            server: conf.address,
            username: conf.username,
            password: conf.password,
        })
    }

    async fn handshake(
        &self,
        stream: &mut TcpStream,
        target: &TargetAddr,
    ) -> Result<(), UpstreamError> {
        let method = if self.username.is_some() {
            AUTH_PASSWORD
        } else {
            AUTH_NONE
        };
        stream.write_all(&[SOCKS5_VERSION, 0x01, method]).await?;

        let mut selected = [0u8; 2];
        stream.read_exact(&mut selected).await?;
        if selected != [SOCKS5_VERSION, method] {
            return Err(UpstreamError::Io(io::Error::new(
                io::ErrorKind::Other,
                "upstream rejected authentication method",
            )));
        }

        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            let mut sub = vec![0x01, user.len() as u8];
            sub.extend_from_slice(user.as_bytes());
            sub.push(pass.len() as u8);
            sub.extend_from_slice(pass.as_bytes());
            stream.write_all(&sub).await?;

            let mut status = [0u8; 2];
            stream.read_exact(&mut status).await?;
            if status[1] != 0x00 {
                return Err(UpstreamError::Io(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "upstream rejected credentials",
                )));
            }
        }

        let mut request = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];
        request.extend_from_slice(&encode_target(target));
        stream.write_all(&request).await?;

        let mut header = [0u8; 3];
        stream.read_exact(&mut header).await?;
        // Drain the bound address so the stream starts at relay payload.
        decode_address(stream)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        if header[1] != 0x00 {
            return Err(UpstreamError::Connect(header[1]));
        }

        Ok(())
    }
}

/// Handshake failure: either transport IO or an explicit upstream reply
#[derive(Debug)]
enum UpstreamError {
    Io(io::Error),
    Connect(u8),
}

impl From<io::Error> for UpstreamError {
    fn from(e: io::Error) -> Self {
        UpstreamError::Io(e)
    }
}

/// Map an upstream SOCKS5 reply code onto a dial failure class
fn kind_for_reply(code: u8) -> DialErrorKind {
    match code {
        0x03 => DialErrorKind::NetworkUnreachable,
        0x04 => DialErrorKind::HostUnreachable,
        0x05 => DialErrorKind::Refused,
        _ => DialErrorKind::Other,
    }
}

fn parse_dial_addr(addr: &str) -> io::Result<TargetAddr> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "missing port in address"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid port in address"))?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    let target = match host.parse::<IpAddr>() {
        Ok(ip) => TargetAddr::ip(ip, port),
        Err(_) => {
            if host.is_empty() || host.len() > 255 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "hostname must be 1-255 bytes",
                ));
            }
            TargetAddr::domain(host, port)
        }
    };
    Ok(target)
}

#[async_trait]
impl Outbound for Socks5Outbound {
    async fn dial(&self, addr: &str) -> Result<Box<dyn ProxyStream>, DialError> {
        let target = parse_dial_addr(addr).map_err(|e| DialError::new(addr, e))?;

        let mut stream = TcpStream::connect(&self.server)
            .await
            .map_err(|e| DialError::new(&self.server, e))?;

        match self.handshake(&mut stream, &target).await {
            Ok(()) => {}
            Err(UpstreamError::Io(e)) => return Err(DialError::new(addr, e)),
            Err(UpstreamError::Connect(code)) => {
                return Err(DialError::with_kind(
                    kind_for_reply(code),
                    addr,
                    io::Error::new(
                        io::ErrorKind::Other,
                        format!("upstream CONNECT failed with code {:#04x}", code),
                    ),
                ));
            }
        }

        Ok(Box::new(stream))
    }

    async fn resolve(&self, host: &str) -> Result<IpAddr> {
        // Name resolution is not delegated upstream; FQDN targets are
        // passed through in the CONNECT request instead.
        let addrs = self.lookup_host(host).await?;
        let first = addrs
            .first()
            .with_context(|| format!("no address found for: {}", host))?;
        first
            .parse()
            .with_context(|| format!("resolver returned a non-IP answer for: {}", host))
    }

    async fn lookup_host(&self, host: &str) -> Result<Vec<String>> {
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .with_context(|| format!("lookup failed for: {}", host))?
            .map(|sa| sa.ip().to_string())
            .collect();
        Ok(addrs)
    }
}
