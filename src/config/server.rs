//! Server configuration types.
//!
//! Mirrors the on-disk JSON structure: a list of inbounds, an optional
//! routing table, an optional configured outbound, and logging options.

use serde::{Deserialize, Serialize};

/// Top-level configuration for a proxy server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listeners to start
    pub inbounds: Vec<InboundConfig>,

    /// Routing table, optional
    #[serde(default)]
    pub route: RouteConfig,

    /// The configured tunnel outbound, bound to the `"proxy"` egress name
    #[serde(default)]
    pub outbound: Option<OutboundConfig>,

    /// Logging options
    #[serde(default)]
    pub log: LogConfig,
}

/// A single inbound listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundConfig {
    /// Protocol spoken on the listener
    #[serde(rename = "type")]
    pub kind: InboundKind,

    /// Listener settings
    pub config: ListenConfig,
}

/// Inbound protocol selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundKind {
    /// HTTP proxy (absolute-URI forwarding, CONNECT, Upgrade)
    Http,
    /// SOCKS4; accepted in config, the handler rejects v4 handshakes
    Socks4,
    /// SOCKS5
    Socks5,
    /// Protocol detected from the first byte of each connection
    Mixed,
}

/// Settings shared by all inbound kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    /// `HOST:PORT` to listen on
    pub address: String,

    /// Optional user list; when present, SOCKS5 requires
    /// username/password authentication against it
    #[serde(default)]
    pub users: Vec<User>,
}

/// A configured proxy user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Login name
    pub user_name: String,
    /// Password, optional in the schema (treated as empty when absent)
    #[serde(default)]
    pub password: Option<String>,
}

/// Routing table configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Fallback egress name; defaults to `"proxy"` when unset
    #[serde(default, rename = "final")]
    pub final_outbound: Option<String>,

    /// Ordered match rules, first match wins
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// A single routing rule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Exact domain names to match
    #[serde(default)]
    pub domain: Vec<String>,

    /// Domain suffixes to match
    #[serde(default, rename = "domainSuffix")]
    pub domain_suffix: Vec<String>,

    /// Accepted for schema compatibility; not consulted by the router
    #[serde(default, rename = "domainPath")]
    pub domain_path: Option<String>,

    /// Name of the egress to use on match
    pub outbound: String,
}

/// The configured tunnel outbound
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Factory name, looked up in the outbound factory table
    #[serde(rename = "type")]
    pub kind: String,

    /// Opaque factory payload, interpreted by the factory
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Logging options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn or error
    #[serde(default)]
    pub level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_kind_lowercase_names() {
        let kind: InboundKind = serde_json::from_str("\"mixed\"").unwrap();
        assert_eq!(kind, InboundKind::Mixed);
        let kind: InboundKind = serde_json::from_str("\"socks4\"").unwrap();
        assert_eq!(kind, InboundKind::Socks4);
    }

    #[test]
    fn test_user_password_optional() {
        let user: User = serde_json::from_str(r#"{ "user_name": "bob" }"#).unwrap();
        assert_eq!(user.user_name, "bob");
        assert!(user.password.is_none());
    }

    #[test]
    fn test_route_config_default_is_empty() {
        let route = RouteConfig::default();
        assert!(route.final_outbound.is_none());
        assert!(route.rules.is_empty());
    }

    #[test]
    fn test_rule_domain_path_parsed_but_unused() {
        let rule: RuleConfig = serde_json::from_str(
            r#"{ "domainPath": "/etc/domains.txt", "outbound": "direct" }"#,
        )
        .unwrap();
        assert_eq!(rule.domain_path.as_deref(), Some("/etc/domains.txt"));
        assert_eq!(rule.outbound, "direct");
    }
}
