//! ShardCache - sharded in-memory cache
//!
//! Runs the configured cache nodes and the router in one process.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use shardcache::config::Config;
use shardcache::health::HealthServer;
use shardcache::metrics::Metrics;
use shardcache::node::CacheNode;
use shardcache::router::Router;
use std::sync::Arc;
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting ShardCache");

    // Load configuration
    let config = if let Some(config_path) = std::env::args().nth(1) {
        info!("Loading configuration from {}", config_path);
        Config::from_file(&config_path)?
    } else {
        info!("Using default configuration (set SHARDCACHE_* env vars to customize)");
        Config::from_env()
    };
    config.validate()?;

    info!("Configuration: {:?}", config);

    // Build tokio runtime with configured worker threads
    let mut runtime_builder = Builder::new_multi_thread();
    if config.router.worker_threads > 0 {
        runtime_builder.worker_threads(config.router.worker_threads);
        info!("Using {} worker threads", config.router.worker_threads);
    } else {
        info!("Using default worker threads (auto-detected)");
    }
    let runtime = runtime_builder.enable_all().build()?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: Config) -> anyhow::Result<()> {
    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();
    let metrics = Arc::new(Metrics::new());

    if config.backup.enabled {
        tokio::fs::create_dir_all(&config.backup.dir).await?;
        info!("Backups in {:?} every {}s", config.backup.dir, config.backup.interval_secs);
    }

    // Start every cache node
    let mut node_tasks = Vec::with_capacity(config.nodes.len());
    for node_config in &config.nodes {
        let node = Arc::new(
            CacheNode::open(node_config, &config, Arc::clone(&metrics), cancel_token.clone()).await,
        );
        node_tasks.push(tokio::spawn(async move {
            let id = node.id().to_string();
            if let Err(e) = node.run().await {
                error!(node = %id, "Cache node error: {}", e);
            }
        }));
    }

    let router = Arc::new(Router::new(&config, Arc::clone(&metrics), cancel_token.clone()));

    // Start health server in separate thread if enabled
    let health_server = if config.metrics.enabled {
        let health = Arc::new(HealthServer::new(
            Arc::clone(&metrics),
            Arc::clone(router.ring()),
        ));
        let health_clone = Arc::clone(&health);
        let metrics_config = config.metrics.clone();

        std::thread::spawn(move || {
            if let Err(e) = health_clone.run(&metrics_config) {
                error!("Health server error: {}", e);
            }
        });

        Some(health)
    } else {
        None
    };

    if let Some(ref health) = health_server {
        health.set_ready(true);
        info!("ShardCache is ready");
    }

    // Setup signal handlers
    let cancel_for_signal = cancel_token.clone();
    let health_for_signal = health_server.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
            }
            _ = terminate() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
        cancel_for_signal.cancel();
        if let Some(health) = health_for_signal {
            health.stop();
        }
    });

    if let Err(e) = router.run().await {
        error!("Router error: {}", e);
        cancel_token.cancel();
        if let Some(health) = &health_server {
            health.stop();
        }
    }

    // Nodes write their final backups before returning
    for task in node_tasks {
        if let Err(e) = task.await {
            error!("Cache node task failed: {}", e);
        }
    }

    info!("ShardCache stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
