use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use roombook::config::Config;
use roombook::lifecycle::LifecycleService;
use roombook::permission::PermissionResolver;
use roombook::store::InMemoryStore;
use roombook::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    roombook::observability::init(config.metrics_port);

    let table = config.permission_table()?;
    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.wal_path();
    let store = InMemoryStore::open(&wal_path)?;
    let service = Arc::new(LifecycleService::new(store, PermissionResolver::new(table), config.policy));

    info!("roombook started");
    info!("  wal: {}", wal_path.display());
    info!("  sweep interval: {:?}", config.sweep_interval);
    info!("  compact threshold: {}", config.compact_threshold);
    info!("  no-show outcome: {:?}", config.policy.no_show);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let sweeper = tokio::spawn(sweeper::run_sweeper(service.clone(), config.sweep_interval));
    let compactor = tokio::spawn(sweeper::run_compactor(
        service.clone(),
        config.compact_threshold,
        Duration::from_secs(30),
    ));

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received, stopping background tasks");
    sweeper.abort();
    compactor.abort();
    let _ = sweeper.await;
    let _ = compactor.await;

    // Leave a compact log behind for the next start.
    if let Err(e) = service.store().compact() {
        tracing::error!("final compaction failed: {e}");
    }
    info!("roombook stopped");
    Ok(())
}
