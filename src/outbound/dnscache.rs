//! DNS-caching egress wrapper.
//!
//! Wraps another egress and caches its hostname lookups. Resolution
//! shuffles the cached answers uniformly and returns the first one that
//! parses as a numeric IP. A background task refreshes every cached host
//! on a fixed interval and exits when the wrapper is closed.

use super::{Outbound, ProxyStream};
use crate::error::{DialError, ProxyError};
use anyhow::Result;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

/// How often the background task re-resolves every cached host
const REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    /// Always non-empty while the entry exists
    addrs: Vec<String>,
    inserted_at: Instant,
}

/// Caching wrapper around another egress.
///
/// The cache map sits behind a single mutex; the refresher swaps entries
/// under the same lock.
#[derive(Debug)]
pub struct CachedOutbound {
    inner: Arc<dyn Outbound>,
    cache: Arc<Mutex<HashMap<String, CacheEntry>>>,
    shutdown: broadcast::Sender<()>,
}

impl CachedOutbound {
    /// Wrap `inner` and start the periodic refresh task.
    ///
    /// The task holds the shutdown receiver and exits on [`close`],
    /// before the wrapped egress is released.
    ///
    /// [`close`]: Outbound::close
    pub fn new(inner: Arc<dyn Outbound>) -> Self {
        let cache: Arc<Mutex<HashMap<String, CacheEntry>>> = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown, mut shutdown_rx) = broadcast::channel(1);

        let task_cache = Arc::clone(&cache);
        let task_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
            // interval fires immediately once; the cache is still empty then
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => refresh(&task_cache, task_inner.as_ref()).await,
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        CachedOutbound {
            inner,
            cache,
            shutdown,
        }
    }

    #[cfg(test)]
    async fn cached_addrs(&self, host: &str) -> Option<Vec<String>> {
        self.cache.lock().await.get(host).map(|e| e.addrs.clone())
    }
}

/// Re-resolve every cached host and swap the entries in place.
/// Hosts that fail to re-resolve keep their previous answers.
async fn refresh(cache: &Mutex<HashMap<String, CacheEntry>>, inner: &dyn Outbound) {
    let hosts: Vec<String> = cache.lock().await.keys().cloned().collect();
    debug!("refreshing {} cached DNS entries", hosts.len());

    for host in hosts {
        match inner.lookup_host(&host).await {
            Ok(addrs) if !addrs.is_empty() => {
                let mut cache = cache.lock().await;
                if let Some(previous) = cache.get(&host) {
                    debug!("refreshed {} after {:?}", host, previous.inserted_at.elapsed());
                }
                cache.insert(
                    host,
                    CacheEntry {
                        addrs,
                        inserted_at: Instant::now(),
                    },
                );
            }
            Ok(_) => warn!("refresh returned no addresses for {}, keeping stale entry", host),
            Err(e) => warn!("refresh failed for {}: {}", host, e),
        }
    }
}

#[async_trait]
impl Outbound for CachedOutbound {
    async fn dial(&self, addr: &str) -> Result<Box<dyn ProxyStream>, DialError> {
        self.inner.dial(addr).await
    }

    async fn resolve(&self, host: &str) -> Result<IpAddr> {
        let cached = {
            let cache = self.cache.lock().await;
            cache
                .get(host)
                .filter(|entry| !entry.addrs.is_empty())
                .map(|entry| entry.addrs.clone())
        };

        let mut addrs = match cached {
            Some(addrs) => addrs,
            None => {
                let addrs = self.inner.lookup_host(host).await?;
                if addrs.is_empty() {
                    return Err(ProxyError::Resolve(format!("no address found for: {}", host)).into());
                }
                self.cache.lock().await.insert(
                    host.to_string(),
                    CacheEntry {
                        addrs: addrs.clone(),
                        inserted_at: Instant::now(),
                    },
                );
                addrs
            }
        };

        addrs.shuffle(&mut rand::thread_rng());

        let mut last_err = None;
        for addr in &addrs {
            match addr.parse::<IpAddr>() {
                Ok(ip) => return Ok(ip),
                Err(e) => last_err = Some(e),
            }
        }
        Err(ProxyError::Resolve(format!(
            "no parseable address for {}: {}",
            host,
            last_err.expect("address list is non-empty")
        ))
        .into())
    }

    async fn lookup_host(&self, host: &str) -> Result<Vec<String>> {
        self.inner.lookup_host(host).await
    }

    async fn close(&self) -> Result<()> {
        // One shutdown signal for the refresher, then close through.
        let _ = self.shutdown.send(());
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Inner egress that counts lookups and serves a fixed answer
    #[derive(Debug)]
    struct FixedResolver {
        answers: Vec<String>,
        lookups: AtomicUsize,
    }

    impl FixedResolver {
        fn new(answers: Vec<&str>) -> Self {
            FixedResolver {
                answers: answers.into_iter().map(String::from).collect(),
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Outbound for FixedResolver {
        async fn dial(&self, addr: &str) -> Result<Box<dyn ProxyStream>, DialError> {
            Err(DialError::new(
                addr,
                std::io::Error::new(std::io::ErrorKind::Other, "not dialable"),
            ))
        }

        async fn resolve(&self, _host: &str) -> Result<IpAddr> {
            unreachable!("wrapper must not delegate resolve")
        }

        async fn lookup_host(&self, _host: &str) -> Result<Vec<String>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.answers.clone())
        }
    }

    #[tokio::test]
    async fn test_resolve_caches_lookups() {
        let inner = Arc::new(FixedResolver::new(vec!["10.0.0.1"]));
        let cached = CachedOutbound::new(Arc::clone(&inner) as Arc<dyn Outbound>);

        let ip = cached.resolve("example.com").await.unwrap();
        assert_eq!(ip, "10.0.0.1".parse::<IpAddr>().unwrap());

        let ip = cached.resolve("example.com").await.unwrap();
        assert_eq!(ip, "10.0.0.1".parse::<IpAddr>().unwrap());

        // Second resolve came from the cache.
        assert_eq!(inner.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(
            cached.cached_addrs("example.com").await.unwrap(),
            vec!["10.0.0.1"]
        );
    }

    #[tokio::test]
    async fn test_resolve_returns_some_member_of_answer_set() {
        let inner = Arc::new(FixedResolver::new(vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]));
        let cached = CachedOutbound::new(inner as Arc<dyn Outbound>);

        for _ in 0..16 {
            let ip = cached.resolve("example.com").await.unwrap().to_string();
            assert!(["10.0.0.1", "10.0.0.2", "10.0.0.3"].contains(&ip.as_str()));
        }
    }

    #[tokio::test]
    async fn test_resolve_empty_answer_is_error() {
        let inner = Arc::new(FixedResolver::new(vec![]));
        let cached = CachedOutbound::new(inner as Arc<dyn Outbound>);

        let err = cached.resolve("nowhere.invalid").await.unwrap_err();
        assert!(err.to_string().contains("no address found"));
        // Nothing was cached for the failed host.
        assert!(cached.cached_addrs("nowhere.invalid").await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_skips_unparseable_entries() {
        let inner = Arc::new(FixedResolver::new(vec!["not-an-ip", "192.0.2.7"]));
        let cached = CachedOutbound::new(inner as Arc<dyn Outbound>);

        let ip = cached.resolve("example.com").await.unwrap();
        assert_eq!(ip, "192.0.2.7".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_all_unparseable_is_error() {
        let inner = Arc::new(FixedResolver::new(vec!["bogus", "also-bogus"]));
        let cached = CachedOutbound::new(inner as Arc<dyn Outbound>);

        let err = cached.resolve("example.com").await.unwrap_err();
        assert!(err.to_string().contains("no parseable address"));
    }

    #[tokio::test]
    async fn test_close_stops_refresher_and_closes_inner() {
        let inner = Arc::new(FixedResolver::new(vec!["10.0.0.1"]));
        let cached = CachedOutbound::new(inner as Arc<dyn Outbound>);

        cached.resolve("example.com").await.unwrap();
        cached.close().await.unwrap();
        // Closing again is as idempotent as the inner close.
        cached.close().await.unwrap();
    }
}
