//! Egress adapters.
//!
//! An outbound is a named sink with a dial and a resolve operation used
//! to reach upstream destinations. `direct` and `block` are always
//! available; the `proxy` name is bound at startup to whatever the
//! configured outbound factory produces. The factory table is fixed at
//! program start; there is no runtime registration.

mod block;
mod direct;
mod dnscache;
mod socks5;

pub use block::BlockOutbound;
pub use direct::DirectOutbound;
pub use dnscache::CachedOutbound;
pub use socks5::Socks5Outbound;

use crate::error::DialError;
use crate::net::StreamDyn;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpStream;

/// Name of the always-present direct TCP egress
pub const DIRECT: &str = "direct";
/// Name of the always-present blackhole egress
pub const BLOCK: &str = "block";
/// Name bound to the configured tunnel outbound
pub const PROXY: &str = "proxy";

/// A stream produced by an egress dial.
///
/// `local_addr` feeds the SOCKS5 bind-address reply; adapters whose
/// streams have no meaningful local address return `None`.
pub trait ProxyStream: StreamDyn {
    /// Local address of the upstream connection, when there is one
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl ProxyStream for TcpStream {
    fn local_addr(&self) -> Option<SocketAddr> {
        TcpStream::local_addr(self).ok()
    }
}

impl ProxyStream for tokio_rustls::client::TlsStream<Box<dyn ProxyStream>> {
    fn local_addr(&self) -> Option<SocketAddr> {
        self.get_ref().0.local_addr()
    }
}

/// An egress adapter: dial upstream destinations and resolve hostnames.
///
/// Adapters are shared read-only across all connections; every method
/// must be safe to call concurrently.
#[async_trait]
pub trait Outbound: Debug + Send + Sync {
    /// Open a TCP-like stream to `addr` (`host:port` dial string)
    async fn dial(&self, addr: &str) -> Result<Box<dyn ProxyStream>, DialError>;

    /// Resolve a hostname to a single IP
    async fn resolve(&self, host: &str) -> Result<IpAddr>;

    /// Look up all addresses for a hostname, as strings
    async fn lookup_host(&self, host: &str) -> Result<Vec<String>>;

    /// Release adapter resources. The default does nothing.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Constructor for a configured outbound: takes the opaque config
/// payload and returns an adapter or a configuration error.
pub type OutboundFactory = fn(serde_json::Value) -> Result<Arc<dyn Outbound>>;

/// The fixed factory table, populated from the known outbound modules.
/// Frozen before the accept loop begins.
pub fn builtin_factories() -> HashMap<&'static str, OutboundFactory> {
    let mut factories: HashMap<&'static str, OutboundFactory> = HashMap::new();
    factories.insert("socks5", socks5::from_config);
    factories
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_factories_contains_socks5() {
        let factories = builtin_factories();
        assert!(factories.contains_key("socks5"));
        assert!(!factories.contains_key("wireguard"));
    }

    #[test]
    fn test_outbound_names() {
        assert_eq!(DIRECT, "direct");
        assert_eq!(BLOCK, "block");
        assert_eq!(PROXY, "proxy");
    }
}
