//! Error types for mixproxy
//!
//! This module defines the custom error types used throughout the proxy.

use std::io;
use thiserror::Error;

/// Main error type for proxy operations
#[derive(Error, Debug)]
pub enum ProxyError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error (always fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// SOCKS protocol error
    #[error("SOCKS error: {0}")]
    Socks(#[from] SocksError),

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Http(String),

    /// DNS resolution error
    #[error("Resolve error: {0}")]
    Resolve(String),

    /// Upstream dial error
    #[error(transparent)]
    Dial(#[from] DialError),
}

/// SOCKS specific errors
#[derive(Error, Debug)]
pub enum SocksError {
    /// Unsupported SOCKS version (SOCKS4 greetings land here)
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// No acceptable authentication method
    #[error("No acceptable authentication method")]
    NoAcceptableMethod,

    /// Authentication failed
    #[error("Authentication failed")]
    AuthFailed,

    /// Command not supported
    #[error("Command not supported: {0}")]
    CommandNotSupported(u8),

    /// Address type not supported
    #[error("Address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// Invalid address field
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Classification of upstream dial failures.
///
/// Dial errors are classified where they occur so that protocol handlers
/// can map them to wire reply codes without inspecting error strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialErrorKind {
    /// The remote host actively refused the connection
    Refused,
    /// No route to the destination network
    NetworkUnreachable,
    /// The destination host is unreachable (includes timeouts)
    HostUnreachable,
    /// Anything else
    Other,
}

impl From<io::ErrorKind> for DialErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::ConnectionRefused => DialErrorKind::Refused,
            io::ErrorKind::NetworkUnreachable => DialErrorKind::NetworkUnreachable,
            io::ErrorKind::HostUnreachable
            | io::ErrorKind::TimedOut
            | io::ErrorKind::AddrNotAvailable => DialErrorKind::HostUnreachable,
            _ => DialErrorKind::Other,
        }
    }
}

/// Failure to establish an upstream connection
#[derive(Error, Debug)]
#[error("dial {addr} failed: {source}")]
pub struct DialError {
    /// Failure classification
    pub kind: DialErrorKind,
    /// The address that was being dialed
    pub addr: String,
    /// Underlying IO error
    #[source]
    pub source: io::Error,
}

impl DialError {
    /// Wrap an IO error from a connect attempt, classifying it by kind
    pub fn new(addr: impl Into<String>, source: io::Error) -> Self {
        DialError {
            kind: DialErrorKind::from(source.kind()),
            addr: addr.into(),
            source,
        }
    }

    /// Create a dial error with an explicit classification
    pub fn with_kind(kind: DialErrorKind, addr: impl Into<String>, source: io::Error) -> Self {
        DialError {
            kind,
            addr: addr.into(),
            source,
        }
    }
}
