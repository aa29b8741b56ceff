//! Configuration module for mixproxy
//!
//! Provides the frozen configuration object consumed by the server. The
//! file format is JSON; outbound factory payloads are kept as raw values
//! and interpreted by the factory that consumes them.

mod server;

pub use server::{
    Config, InboundConfig, InboundKind, ListenConfig, LogConfig, OutboundConfig, RouteConfig,
    RuleConfig, User,
};

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a JSON string
pub fn parse_config(content: &str) -> Result<Config> {
    serde_json::from_str(content).with_context(|| "Failed to parse configuration")
}
