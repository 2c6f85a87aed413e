//! Hearth - cache-aside synchronization engine

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod listeners;

use config::{Config, LoggingConfig};
use hearth_core::{CacheNode, CacheRegistry, SyncBridge};
use hearth_db::Database;
use hearth_tier::{CacheTier, MemoryTier, RedisTier};
use listeners::{AppContext, PingListener};

/// Hearth - keeps a record store warm behind a Redis cache tier
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Redis connection URL, overrides [redis]
    #[arg(long, env = "HEARTH_REDIS_URL")]
    redis_url: Option<String>,

    /// SQLite database path, overrides [database]
    #[arg(long, env = "HEARTH_DATABASE")]
    database: Option<String>,

    /// Run a single flush sweep and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(&args.config)?;
    if let Some(url) = args.redis_url {
        config.redis.connection.url = Some(url);
    }
    if let Some(path) = args.database {
        config.database.path = path;
    }

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Hearth v{}", env!("CARGO_PKG_VERSION"));

    if config.metrics.enabled {
        init_metrics(&config.metrics.bind_address)?;
    }

    // Initialize database
    if let Some(parent) = Path::new(&config.database.path).parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let db_url = format!("sqlite:{}?mode=rwc", config.database.path);
    let db = Database::new(&db_url)
        .await
        .context("Failed to open the record store")?;

    // Initialize cache tier
    let tier: Arc<dyn CacheTier> = match config.redis.backend.as_str() {
        "redis" => {
            info!("Cache tier: {}", config.redis.connection.redacted_url());
            Arc::new(RedisTier::new(config.redis.connection.clone()))
        }
        "memory" => {
            warn!("Using the in-process memory tier; cached state is lost on exit");
            Arc::new(MemoryTier::new())
        }
        other => bail!("Unknown cache backend: {}", other),
    };

    // Register cache nodes
    let settings = config.cache.clone().validate();
    let registry = Arc::new(CacheRegistry::new(tier.clone(), settings.clone()));
    for node in &config.nodes {
        let definition = node
            .definition(&settings)
            .with_context(|| format!("Invalid cache node '{}'", node.name))?;
        registry.register_cache_node(CacheNode::new(
            definition,
            tier.clone(),
            Arc::new(db.model(&node.name)),
        ));
    }
    if registry.node_count() == 0 {
        warn!("No cache nodes configured");
    }

    if args.once {
        tier.connect()
            .await
            .context("Failed to connect the cache tier")?;
        let summary = registry.sync_all().await;
        info!(
            "Sweep complete: {} nodes, {} entries, {} changed, {} evicted, {} errors",
            summary.nodes, summary.entries, summary.changed, summary.evicted, summary.errors
        );
        tier.disconnect().await;
        db.close().await;
        return Ok(());
    }

    registry
        .initialize()
        .await
        .context("Failed to initialize the cache registry")?;

    // Start the sync bridge
    let bridge = Arc::new(
        SyncBridge::builder(settings.bridge_channel.clone(), registry.clone())
            .listener(PingListener)
            .build(),
    );
    let ctx = Arc::new(AppContext {
        registry: registry.clone(),
        publisher: bridge.publisher(),
    });
    bridge
        .initialize(ctx)
        .await
        .context("Failed to start the sync bridge")?;

    info!(
        "Hearth running with {} cache nodes on channel '{}'",
        registry.node_count(),
        bridge.channel()
    );

    shutdown_signal().await;

    bridge.shutdown();
    registry.shutdown().await;
    db.close().await;

    info!("Hearth stopped");
    Ok(())
}

/// Initialize logging
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Install the Prometheus exporter with its own HTTP listener
fn init_metrics(bind_address: &str) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("Invalid metrics bind address: {}", bind_address))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install the Prometheus exporter")?;

    info!("Metrics available at http://{}/metrics", addr);
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for the shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
