use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub security_url: Option<String>,
    pub ai_url: Option<String>,

    pub engine: Option<EngineConfig>,
    pub proxy: Option<ProxyConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub worker_pool_size: Option<usize>,
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub queue_capacity: Option<usize>,
    pub enrichment_timeout_secs: Option<u64>,
    pub shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy URLs, e.g. "socks5://10.0.0.2:1080". Replaces any list given on the CLI.
    pub endpoints: Option<Vec<String>>,
    pub health_check_interval_secs: Option<u64>,
    pub probe_url: Option<String>,
    pub probe_timeout_secs: Option<u64>,
    pub failure_threshold: Option<u32>,
    pub direct_fallback: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
