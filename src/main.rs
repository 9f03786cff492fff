use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use osint_engine::config::{AppConfig, CliConfig, FileConfig};
use osint_engine::enrichment::{EnrichmentService, HttpEnrichmentClient};
use osint_engine::extraction::Extractors;
use osint_engine::proxy::{HttpProxyProber, Proxy, ProxyManager};
use osint_engine::server::{self, ServerConfig};
use osint_engine::{Engine, EngineContext, RequestsLoggingLevel, SqliteJobStore};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the job database.
    #[clap(long, env = "DB_DIR", value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 8080)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// Base URL of the security configuration service.
    #[clap(long, env = "SECURITY_SERVICE_URL", default_value = "http://localhost:8081")]
    pub security_url: String,

    /// Base URL of the AI analysis service.
    #[clap(long, env = "AI_SERVICE_URL", default_value = "http://localhost:8082")]
    pub ai_url: String,

    /// Number of concurrent workers.
    #[clap(long, env = "WORKER_POOL_SIZE", default_value_t = 10)]
    pub worker_pool_size: usize,

    /// Proxy URL to rotate through. Repeat for several proxies.
    #[clap(long = "proxy")]
    pub proxies: Vec<String>,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    if let Err(e) = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
    {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        port: cli_args.port,
        metrics_port: cli_args.metrics_port,
        security_url: cli_args.security_url.clone(),
        ai_url: cli_args.ai_url.clone(),
        worker_pool_size: cli_args.worker_pool_size,
        proxies: cli_args.proxies.clone(),
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Initializing metrics...");
    server::metrics::init_metrics();

    info!("Opening job database at {:?}...", config.job_db_path());
    let store = Arc::new(SqliteJobStore::new(config.job_db_path())?);

    let proxies = config
        .proxy
        .endpoints
        .iter()
        .map(|url| Proxy::parse(url))
        .collect::<Result<Vec<_>>>()?;
    info!("Loaded {} proxy endpoint(s)", proxies.len());
    let prober = Arc::new(HttpProxyProber::new(
        config.proxy.probe_url.clone(),
        config.proxy.probe_timeout(),
    ));
    let proxy_manager = Arc::new(ProxyManager::new(
        proxies,
        prober,
        config.proxy.failure_threshold,
        config.proxy.health_check_interval(),
    ));

    info!(
        "Enrichment services: security at {}, AI at {}",
        config.security_url, config.ai_url
    );
    let enrichment: Arc<dyn EnrichmentService> = Arc::new(HttpEnrichmentClient::new(
        &config.security_url,
        &config.ai_url,
        config.engine.enrichment_timeout(),
    )?);

    let shutdown_timeout = config.engine.shutdown_timeout();
    let ctx = EngineContext::new(
        config.engine.clone(),
        store,
        proxy_manager,
        enrichment,
        Extractors::baseline(),
    )
    .with_direct_fallback(config.proxy.direct_fallback);
    let engine = Arc::new(Engine::new(ctx));

    engine
        .start()
        .await
        .context("Engine failed to start")?;

    let server_shutdown = CancellationToken::new();
    let server_config = ServerConfig {
        port: config.port,
        metrics_port: config.metrics_port,
        requests_logging_level: cli_args.logging_level,
    };
    let mut server_task = tokio::spawn(server::run_server(
        server_config,
        engine.clone(),
        server_shutdown.clone(),
    ));

    let server_result = tokio::select! {
        result = &mut server_task => Some(result),
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            None
        }
    };

    let report = engine.shutdown(shutdown_timeout).await?;
    info!(
        "Engine drained: {} worker(s) aborted, {} job(s) released",
        report.aborted_workers, report.released_jobs
    );

    server_shutdown.cancel();
    let server_result = match server_result {
        Some(result) => result,
        None => server_task.await,
    };
    match server_result {
        Ok(result) => result,
        Err(e) => {
            error!("Server task failed: {}", e);
            Err(e.into())
        }
    }
}
