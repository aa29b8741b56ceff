//! Direct egress: the platform TCP connector and resolver.

use super::{Outbound, ProxyStream};
use crate::error::DialError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::IpAddr;
use tokio::net::TcpStream;

/// Egress that dials destinations directly from this host
#[derive(Debug, Default)]
pub struct DirectOutbound;

#[async_trait]
impl Outbound for DirectOutbound {
    async fn dial(&self, addr: &str) -> Result<Box<dyn ProxyStream>, DialError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| DialError::new(addr, e))?;
        Ok(Box::new(stream))
    }

    async fn resolve(&self, host: &str) -> Result<IpAddr> {
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
