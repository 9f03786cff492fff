//! Health probes for outbound proxies.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use super::models::Proxy;

#[async_trait]
pub trait ProxyProber: Send + Sync {
    /// Succeeds if a lightweight request through `proxy` succeeds.
    async fn probe(&self, proxy: &Proxy) -> Result<()>;
}

/// Issues a GET to a fixed URL through the proxy.
pub struct HttpProxyProber {
    probe_url: String,
    timeout: Duration,
}

impl HttpProxyProber {
    pub fn new(probe_url: String, timeout: Duration) -> Self {
        Self { probe_url, timeout }
    }
}

#[async_trait]
impl ProxyProber for HttpProxyProber {
    async fn probe(&self, proxy: &Proxy) -> Result<()> {
        let client = reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(&proxy.url).context("Invalid proxy url")?)
            .timeout(self.timeout)
            .build()
            .context("Failed to create probe client")?;

        let response = client
            .get(&self.probe_url)
            .send()
            .await
            .with_context(|| format!("Probe through {} failed", proxy.url))?;

        if response.status().is_success() {
            Ok(())
        } else {
            anyhow::bail!(
                "Probe through {} returned status {}",
                proxy.url,
                response.status()
            )
        }
    }
}
