//! Destination address representation.
//!
//! A destination is an IP literal or a fully qualified domain name plus a
//! port. A domain destination may additionally carry the IP it resolved
//! to; dial strings prefer the resolved form.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// The host part of a destination address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAddr {
    /// IPv4 or IPv6 literal
    Ip(IpAddr),
    /// Fully qualified domain name (at most 255 bytes on the wire)
    Domain(String),
}

/// A destination address with optional resolved IP.
///
/// `resolved` is only ever set for `Domain` hosts and is the single
/// mutation a destination sees after the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddr {
    /// Host as the client supplied it
    pub host: HostAddr,
    /// IP obtained from the egress resolver, if any
    pub resolved: Option<IpAddr>,
    /// Destination port
    pub port: u16,
}

impl TargetAddr {
    /// Create a destination from an IP literal
    pub fn ip(ip: IpAddr, port: u16) -> Self {
        TargetAddr {
            host: HostAddr::Ip(ip),
            resolved: None,
            port,
        }
    }

    /// Create a destination from a domain name
    pub fn domain(domain: impl Into<String>, port: u16) -> Self {
        TargetAddr {
            host: HostAddr::Domain(domain.into()),
            resolved: None,
            port,
        }
    }

    /// The domain name, if this destination is domain-addressed
    pub fn domain_name(&self) -> Option<&str> {
        match &self.host {
            HostAddr::Domain(d) => Some(d),
            HostAddr::Ip(_) => None,
        }
    }

    /// The IP to dial: the literal host IP, or the resolved IP for
    /// domain hosts
    pub fn ip_addr(&self) -> Option<IpAddr> {
        match &self.host {
            HostAddr::Ip(ip) => Some(*ip),
            HostAddr::Domain(_) => self.resolved,
        }
    }

    /// Whether the destination can be dialed without further resolution
    pub fn is_resolved(&self) -> bool {
        self.ip_addr().is_some()
    }

    /// Record the IP this destination resolved to
    pub fn set_resolved(&mut self, ip: IpAddr) {
        self.resolved = Some(ip);
    }

    /// Render a string suitable to dial, preferring the IP form
    pub fn dial_addr(&self) -> String {
        match self.ip_addr() {
            Some(ip) => SocketAddr::new(ip, self.port).to_string(),
            None => match &self.host {
                HostAddr::Domain(d) => format!("{}:{}", d, self.port),
                HostAddr::Ip(_) => unreachable!(),
            },
        }
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        TargetAddr::ip(addr.ip(), addr.port())
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            HostAddr::Domain(d) => match self.resolved {
                Some(ip) => write!(f, "{} ({}):{}", d, ip, self.port),
                None => write!(f, "{}:{}", d, self.port),
            },
            HostAddr::Ip(ip) => write!(f, "{}", SocketAddr::new(*ip, self.port)),
        }
    }
}
