use parley::config::Config;
use parley::infrastructure::relay::{ConnectionRegistry, RelayRouter};
use parley::interface::api::{build_router, init_metrics, spawn_stats_task, RelayState};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Parley signaling relay");
    info!("Configuration loaded: {:?}", config);

    info!("Initializing Prometheus metrics exporter");
    let prometheus_handle = init_metrics()?;

    let registry = Arc::new(ConnectionRegistry::new());
    let router = Arc::new(RelayRouter::new(registry.clone()));
    let state = RelayState::new(router, config.relay.outbound_queue);

    let stats_task = spawn_stats_task(
        registry,
        Duration::from_secs(config.relay.stats_interval_secs),
    );

    let app = build_router(state, prometheus_handle);
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!("Signaling relay listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down...");
        })
        .await?;

    if let Some(task) = stats_task {
        task.abort();
    }
    info!("Signaling relay stopped");
    Ok(())
}
