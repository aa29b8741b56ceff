//! Blackhole egress: every dial is refused.

use super::{Outbound, ProxyStream};
use crate::error::DialError;
use anyhow::Result;
use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr};

/// Egress that drops all traffic routed to it
#[derive(Debug, Default)]
pub struct BlockOutbound;

#[async_trait]
impl Outbound for BlockOutbound {
    async fn dial(&self, addr: &str) -> Result<Box<dyn ProxyStream>, DialError> {
        Err(DialError::new(
            addr,
            io::Error::new(io::ErrorKind::ConnectionRefused, "destination is blocked"),
        ))
    }

    async fn resolve(&self, _host: &str) -> Result<IpAddr> {
        Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    async fn lookup_host(&self, _host: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
