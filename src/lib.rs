//! # mixproxy - mixed SOCKS5/HTTP forward proxy
//!
//! mixproxy is a local forward proxy that speaks SOCKS5 and HTTP/1.x on
//! the same listener and forwards every session through a rule-selected
//! egress: direct TCP, a blackhole, or a configured tunnel such as an
//! upstream SOCKS5 server.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mixproxy::config::load_config;
//! use mixproxy::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("config.json")?;
//!     let server = Server::new(&config)?;
//!     server.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! client ──► inbound (mixed/socks5/http) ──► router ──► egress ──► target
//! ```
//!
//! Each accepted connection is served by its own task. The first byte of
//! a `mixed` connection selects the protocol handler; the handler builds
//! the destination metadata, asks the router for an egress, resolves the
//! hostname through that egress's cached resolver, dials, and relays.

#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod inbound;
pub mod net;
pub mod outbound;
pub mod route;
pub mod server;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::ProxyError;
pub use server::Server;

/// Version of the mixproxy library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "mixproxy");
    }
}
