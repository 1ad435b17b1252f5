//! laureld - achievement engine daemon
//!
//! Opens the store, seeds the badge catalog and runs the scheduled jobs until
//! interrupted.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use laurel_service::{Engine, EngineConfig, Scheduler, SystemClock, TracingSink};
use laurel_store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,laurel=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting laureld");

    // Load configuration from environment
    let config = EngineConfig::from_env();

    tracing::info!(
        data_dir = %config.data_dir,
        registry_ttl_secs = config.registry_ttl.as_secs(),
        store_timeout_ms = %config.store_timeout.as_millis(),
        top_n = config.leaderboard_top_n,
        retention_days = config.leaderboard_retention_days,
        seed_catalog = config.seed_catalog,
        "Engine configuration loaded"
    );

    let store = open_store(&config)?;
    let engine = Arc::new(Engine::new(
        store,
        config.clone(),
        Arc::new(TracingSink),
        Arc::new(SystemClock),
    ));

    if config.seed_catalog {
        let inserted = engine.seed_catalog().await?;
        tracing::info!(inserted, "Badge catalog checked");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = Arc::new(Scheduler::new(Arc::clone(&engine))).spawn(shutdown_rx);
    tracing::info!(jobs = handles.len(), "Scheduler started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    shutdown_tx.send(true)?;

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Job task did not stop cleanly");
        }
    }

    tracing::info!("laureld stopped");
    Ok(())
}

#[cfg(feature = "rocksdb-backend")]
fn open_store(config: &EngineConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    Ok(Arc::new(laurel_store::RocksStore::open(&config.data_dir)?))
}

#[cfg(not(feature = "rocksdb-backend"))]
fn open_store(config: &EngineConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    tracing::warn!(
        data_dir = %config.data_dir,
        "Built without rocksdb-backend; using an in-memory store"
    );
    Ok(Arc::new(laurel_store::MemoryStore::new()))
}
