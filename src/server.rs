//! Server assembly.
//!
//! Builds the egress table, router and inbound listeners from a frozen
//! configuration, then runs the accept loops. All construction errors
//! are configuration errors and abort startup; nothing is reloaded at
//! runtime.

use crate::config::Config;
use crate::error::ProxyError;
use crate::inbound::Inbound;
use crate::outbound::{
    builtin_factories, BlockOutbound, CachedOutbound, DirectOutbound, Outbound, BLOCK, DIRECT,
    PROXY,
};
use crate::route::Router;
use anyhow::Result;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// A fully constructed proxy server
#[derive(Debug)]
pub struct Server {
    inbounds: Vec<Arc<Inbound>>,
    router: Arc<Router>,
    outbounds: HashMap<String, Arc<dyn Outbound>>,
    shutdown: broadcast::Sender<()>,
}

impl Server {
    /// Build a server from configuration.
    ///
    /// The egress table always carries `direct` and `block`; a
    /// configured outbound is constructed through the factory table and
    /// bound to the `proxy` name. The direct and configured egresses get
    /// the DNS cache wrapper.
    pub fn new(config: &Config) -> Result<Self, ProxyError> {
        if config.inbounds.is_empty() {
            return Err(ProxyError::Config("no inbounds configured".to_string()));
        }

        let mut inbounds = Vec::with_capacity(config.inbounds.len());
        for inbound in &config.inbounds {
            inbounds.push(Arc::new(Inbound::new(inbound)?));
        }

        let mut outbounds: HashMap<String, Arc<dyn Outbound>> = HashMap::new();
        outbounds.insert(
            DIRECT.to_string(),
            Arc::new(CachedOutbound::new(Arc::new(DirectOutbound))),
        );
        outbounds.insert(BLOCK.to_string(), Arc::new(BlockOutbound));

        if let Some(outbound) = &config.outbound {
            let factories = builtin_factories();
            let factory = factories.get(outbound.kind.as_str()).ok_or_else(|| {
                ProxyError::Config(format!("unsupported outbound type: {}", outbound.kind))
            })?;
            let adaptor = factory(outbound.config.clone())
                .map_err(|e| ProxyError::Config(format!("outbound {}: {:#}", outbound.kind, e)))?;
            outbounds.insert(
                PROXY.to_string(),
                Arc::new(CachedOutbound::new(adaptor)),
            );
        }

        let router = Arc::new(Router::new(&config.route, &outbounds)?);
        let (shutdown, _) = broadcast::channel(1);

        Ok(Server {
            inbounds,
            router,
            outbounds,
            shutdown,
        })
    }

    /// Bind every listener and start the accept loops.
    ///
    /// Returns the bound addresses; binding eagerly means port clashes
    /// surface as startup errors rather than dead listeners.
    pub async fn start(&self) -> Result<Vec<SocketAddr>> {
        let mut addrs = Vec::with_capacity(self.inbounds.len());
        for inbound in &self.inbounds {
            let listener = inbound.bind().await?;
            let addr = listener.local_addr()?;
            info!("listening on {}", addr);
            addrs.push(addr);

            tokio::spawn(Arc::clone(inbound).run_on(
                listener,
                Arc::clone(&self.router),
                self.shutdown.subscribe(),
            ));
        }
        Ok(addrs)
    }

    /// Stop accepting connections and release the egresses. Connections
    /// already in flight drain on their own.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(());
        for (name, outbound) in &self.outbounds {
            if let Err(e) = outbound.close().await {
                warn!("closing outbound {} failed: {:#}", name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn mixed_config(extra: &str) -> Config {
        let json = format!(
            r#"{{
  "inbounds": [ {{ "type": "mixed", "config": {{ "address": "127.0.0.1:0" }} }} ],
  "route": {{ "final": "direct" }}{}
}}"#,
            extra
        );
        parse_config(&json).unwrap()
    }

    #[tokio::test]
    async fn test_server_builds_and_starts() {
        let server = Server::new(&mixed_config("")).unwrap();
        let addrs = server.start().await.unwrap();
        assert_eq!(addrs.len(), 1);
        assert!(addrs[0].port() > 0);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_default_final_without_outbound_is_rejected() {
        let config = parse_config(
            r#"{ "inbounds": [ { "type": "mixed", "config": { "address": "127.0.0.1:0" } } ] }"#,
        )
        .unwrap();

        // route.final defaults to "proxy", which no config defined.
        let err = Server::new(&config).unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[tokio::test]
    async fn test_configured_outbound_becomes_proxy() {
        let config = parse_config(
            r#"{
  "inbounds": [ { "type": "mixed", "config": { "address": "127.0.0.1:0" } } ],
  "outbound": { "type": "socks5", "config": { "address": "127.0.0.1:61080" } }
}"#,
        )
        .unwrap();

        // With an outbound configured, the default final of "proxy" resolves.
        let server = Server::new(&config).unwrap();
        assert!(server.outbounds.contains_key(PROXY));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_outbound_type_is_rejected() {
        let config = parse_config(
            r#"{
  "inbounds": [ { "type": "mixed", "config": { "address": "127.0.0.1:0" } } ],
  "outbound": { "type": "wireguard", "config": {} }
}"#,
        )
        .unwrap();

        let err = Server::new(&config).unwrap_err();
        assert!(err.to_string().contains("unsupported outbound type"));
    }

    #[tokio::test]
    async fn test_no_inbounds_is_rejected() {
        let config = parse_config(r#"{ "inbounds": [] }"#).unwrap();
        assert!(Server::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_bind_conflict_surfaces_at_start() {
        let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = blocker.local_addr().unwrap();

        let json = format!(
            r#"{{
  "inbounds": [ {{ "type": "http", "config": {{ "address": "{}" }} }} ],
  "route": {{ "final": "direct" }}
}}"#,
            addr
        );
        let server = Server::new(&parse_config(&json).unwrap()).unwrap();
        assert!(server.start().await.is_err());
        server.stop().await;
    }
}
