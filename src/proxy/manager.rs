//! Proxy rotation with health tracking.

use chrono::Utc;
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::models::{Proxy, ProxyHealth};
use super::prober::ProxyProber;
use crate::error::EngineError;
use crate::jobs::JobKind;
use crate::server::metrics;

/// Owns the proxy set. Readers (`select`) vastly outnumber writers (health loop and
/// failure feedback), hence the `RwLock`.
pub struct ProxyManager {
    proxies: RwLock<Vec<Proxy>>,
    cursor: AtomicUsize,
    prober: Arc<dyn ProxyProber>,
    failure_threshold: u32,
    check_interval: Duration,
}

impl ProxyManager {
    pub fn new(
        proxies: Vec<Proxy>,
        prober: Arc<dyn ProxyProber>,
        failure_threshold: u32,
        check_interval: Duration,
    ) -> Self {
        metrics::set_healthy_proxies(proxies.len());
        Self {
            proxies: RwLock::new(proxies),
            cursor: AtomicUsize::new(0),
            prober,
            failure_threshold: failure_threshold.max(1),
            check_interval,
        }
    }

    /// Round-robin over selectable proxies.
    pub async fn select(&self, kind: JobKind) -> Result<Proxy, EngineError> {
        let proxies = self.proxies.read().await;
        let selectable: Vec<&Proxy> = proxies.iter().filter(|p| p.is_selectable()).collect();
        if selectable.is_empty() {
            return Err(EngineError::NoHealthyProxy);
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % selectable.len();
        let proxy = selectable[index].clone();
        debug!("Selected proxy {} for {} job", proxy.url, kind);
        Ok(proxy)
    }

    /// Record a failed use. Ejects the proxy after `failure_threshold` consecutive failures.
    pub async fn report_failure(&self, url: &str) {
        let mut proxies = self.proxies.write().await;
        let Some(proxy) = proxies.iter_mut().find(|p| p.url == url) else {
            return;
        };
        proxy.consecutive_failures += 1;
        if proxy.consecutive_failures >= self.failure_threshold
            && proxy.health != ProxyHealth::Unhealthy
        {
            proxy.health = ProxyHealth::Unhealthy;
            warn!(
                "Proxy {} ejected after {} consecutive failures",
                url, proxy.consecutive_failures
            );
            metrics::set_healthy_proxies(count_selectable(&proxies));
        }
    }

    /// Record a successful use.
    pub async fn report_success(&self, url: &str) {
        let mut proxies = self.proxies.write().await;
        if let Some(proxy) = proxies.iter_mut().find(|p| p.url == url) {
            proxy.consecutive_failures = 0;
            if proxy.health == ProxyHealth::Unknown {
                proxy.health = ProxyHealth::Healthy;
            }
        }
    }

    /// Probe every proxy once. Probes run concurrently without holding the lock.
    pub async fn check_health(&self) {
        let snapshot = self.snapshot().await;
        if snapshot.is_empty() {
            return;
        }

        let outcomes = join_all(snapshot.iter().map(|proxy| async move {
            let result = self.prober.probe(proxy).await;
            (proxy.url.clone(), result)
        }))
        .await;

        let now = Utc::now();
        let mut proxies = self.proxies.write().await;
        for (url, result) in outcomes {
            let Some(proxy) = proxies.iter_mut().find(|p| p.url == url) else {
                continue;
            };
            proxy.last_checked = Some(now);
            match result {
                Ok(()) => {
                    if proxy.health != ProxyHealth::Healthy {
                        info!("Proxy {} is healthy", url);
                    }
                    proxy.health = ProxyHealth::Healthy;
                    proxy.consecutive_failures = 0;
                }
                Err(e) => {
                    if proxy.health != ProxyHealth::Unhealthy {
                        warn!("Proxy {} failed health probe: {:#}", url, e);
                    }
                    proxy.health = ProxyHealth::Unhealthy;
                    proxy.consecutive_failures += 1;
                }
            }
        }
        let healthy = count_selectable(&proxies);
        metrics::set_healthy_proxies(healthy);
        debug!("Proxy health check done: {}/{} healthy", healthy, proxies.len());
    }

    /// Probe on a fixed interval until `shutdown` fires. The first probe runs immediately.
    pub async fn run_health_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "Proxy health loop started (interval {:?})",
            self.check_interval
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => self.check_health().await,
            }
        }
        info!("Proxy health loop stopped");
    }

    pub async fn snapshot(&self) -> Vec<Proxy> {
        self.proxies.read().await.clone()
    }

    pub async fn healthy_count(&self) -> usize {
        count_selectable(&self.proxies.read().await)
    }

    pub async fn is_empty(&self) -> bool {
        self.proxies.read().await.is_empty()
    }
}

fn count_selectable(proxies: &[Proxy]) -> usize {
    proxies.iter().filter(|p| p.is_selectable()).count()
}
