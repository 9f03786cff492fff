mod file_config;

pub use file_config::{EngineConfig, FileConfig, ProxyConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// Mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub security_url: String,
    pub ai_url: String,
    pub worker_pool_size: usize,
    pub proxies: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub security_url: String,
    pub ai_url: String,

    pub engine: EngineSettings,
    pub proxy: ProxySettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;
        if !db_dir.is_dir() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        let security_url = file.security_url.unwrap_or_else(|| cli.security_url.clone());
        let ai_url = file.ai_url.unwrap_or_else(|| cli.ai_url.clone());

        let defaults = EngineSettings::default();
        let engine_file = file.engine.unwrap_or_default();
        let engine = EngineSettings {
            worker_pool_size: engine_file
                .worker_pool_size
                .unwrap_or(cli.worker_pool_size),
            max_attempts: engine_file.max_attempts.unwrap_or(defaults.max_attempts),
            initial_backoff_ms: engine_file
                .initial_backoff_ms
                .unwrap_or(defaults.initial_backoff_ms),
            max_backoff_ms: engine_file
                .max_backoff_ms
                .unwrap_or(defaults.max_backoff_ms),
            backoff_multiplier: engine_file
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
            queue_capacity: engine_file
                .queue_capacity
                .unwrap_or(defaults.queue_capacity),
            enrichment_timeout_secs: engine_file
                .enrichment_timeout_secs
                .unwrap_or(defaults.enrichment_timeout_secs),
            shutdown_timeout_secs: engine_file
                .shutdown_timeout_secs
                .unwrap_or(defaults.shutdown_timeout_secs),
        };
        engine.validate()?;

        let proxy_defaults = ProxySettings::default();
        let proxy_file = file.proxy.unwrap_or_default();
        let proxy = ProxySettings {
            endpoints: proxy_file
                .endpoints
                .unwrap_or_else(|| cli.proxies.clone()),
            health_check_interval_secs: proxy_file
                .health_check_interval_secs
                .unwrap_or(proxy_defaults.health_check_interval_secs),
            probe_url: proxy_file.probe_url.unwrap_or(proxy_defaults.probe_url),
            probe_timeout_secs: proxy_file
                .probe_timeout_secs
                .unwrap_or(proxy_defaults.probe_timeout_secs),
            failure_threshold: proxy_file
                .failure_threshold
                .unwrap_or(proxy_defaults.failure_threshold),
            direct_fallback: proxy_file
                .direct_fallback
                .unwrap_or(proxy_defaults.direct_fallback),
        };
        if proxy.failure_threshold == 0 {
            bail!("proxy.failure_threshold must be at least 1");
        }

        Ok(Self {
            db_dir,
            port,
            metrics_port,
            security_url,
            ai_url,
            engine,
            proxy,
        })
    }

    pub fn job_db_path(&self) -> PathBuf {
        self.db_dir.join("jobs.db")
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub worker_pool_size: usize,
    /// Attempts (first try included) before a job is dead-lettered.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Maximum number of non-terminal jobs.
    pub queue_capacity: usize,
    pub enrichment_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl EngineSettings {
    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            bail!("worker_pool_size must be at least 1");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be at least 1");
        }
        if self.backoff_multiplier <= 1.0 {
            bail!(
                "backoff_multiplier must be greater than 1.0, got {}",
                self.backoff_multiplier
            );
        }
        Ok(())
    }

    pub fn enrichment_timeout(&self) -> Duration {
        Duration::from_secs(self.enrichment_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_pool_size: 10,
            max_attempts: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 300_000, // 5 minutes
            backoff_multiplier: 2.0,
            queue_capacity: 1000,
            enrichment_timeout_secs: 30,
            shutdown_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub endpoints: Vec<String>,
    pub health_check_interval_secs: u64,
    pub probe_url: String,
    pub probe_timeout_secs: u64,
    /// Consecutive failed uses before a proxy is ejected.
    pub failure_threshold: u32,
    /// Run jobs without a proxy when none is healthy, instead of failing the attempt.
    pub direct_fallback: bool,
}

impl ProxySettings {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            health_check_interval_secs: 300,
            probe_url: "http://httpbin.org/ip".to_string(),
            probe_timeout_secs: 10,
            failure_threshold: 3,
            direct_fallback: true,
        }
    }
}
