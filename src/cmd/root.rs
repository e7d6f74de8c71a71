//! Main daemon command - composition root and server loop

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bollard::Docker;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use nimbus_daemon::config::Configuration;
use nimbus_daemon::coordinator::InvocationCoordinator;
use nimbus_daemon::database::Database;
use nimbus_daemon::executor::{ExecutorRegistry, SandboxExecutor, StandardExecutor};
use nimbus_daemon::metrics::{spawn_flush_task, MetricStore, MetricsCollector};
use nimbus_daemon::router::{self, AppState};

/// Run the daemon
pub async fn run(config_path: &str) -> Result<()> {
    info!("Loading configuration from: {}", config_path);
    let config = Arc::new(Configuration::load(config_path)?);

    info!("  API: {}:{}", config.api.host, config.api.port);
    info!("  Function database: {}", config.database.path.display());
    info!("  Metric database: {}", config.metrics.path.display());
    info!("  Sandbox runtime: {}", config.docker.sandbox_runtime);

    // Persistent stores: functions/executions and metrics stay separable
    let db = Arc::new(Database::open(&config.database.path)?);
    let metric_store = Arc::new(MetricStore::open(&config.metrics.path)?);
    let collector = Arc::new(MetricsCollector::new(metric_store));

    let docker =
        Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;

    // One executor per backend; all per-function state lives inside them
    let standard = Arc::new(StandardExecutor::new(
        docker.clone(),
        config.docker.clone(),
        &config.pool,
    ));
    let sandbox = Arc::new(SandboxExecutor::new(docker, config.docker.clone()));

    let mut registry = ExecutorRegistry::new();
    registry.register(standard.clone());
    registry.register(sandbox);
    let registry = Arc::new(registry);
    info!("Registered {} execution backends", registry.len());

    // Background actors, stopped through the shutdown token
    let shutdown = CancellationToken::new();
    let eviction_handle = standard.start_eviction(shutdown.clone());
    let flush_handle = spawn_flush_task(
        collector.clone(),
        Duration::from_secs(config.metrics.flush_interval_secs),
        shutdown.clone(),
    );

    let coordinator = Arc::new(InvocationCoordinator::new(
        db.clone(),
        registry,
        collector.clone(),
    ));

    let state = AppState {
        db,
        coordinator,
        collector,
        config: config.clone(),
    };
    let app = router::build_router(state);

    let bind_addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port)
        .parse()
        .context("Invalid bind address")?;

    info!("Starting HTTP server on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;

    let shutdown_signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install CTRL+C handler");
            warn!("Received shutdown signal, stopping...");
            shutdown_signal.cancel();
        })
        .await?;

    // The eviction actor drains the pool and the flush actor writes the
    // last metric batch before exiting
    let _ = eviction_handle.await;
    let _ = flush_handle.await;

    info!("Daemon stopped");
    Ok(())
}
