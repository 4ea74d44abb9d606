//! Counter aggregation server
//!
//! Serves the line protocol over TCP. See `incr::config` for the
//! environment variables and the TOML file layout.
//!
//! With the `memory` backend the store is hydrated from the last snapshot
//! at startup, snapshotted every interval and once more on Ctrl-C. With the
//! `durable` backend every counter is its own record under the data
//! directory.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use incr::config::{BackendKind, EngineConfig};
use incr::observability::init_tracing;
use incr::persistence::{LocalFsObjectStore, SnapshotManager};
use incr::server::CounterServer;
use incr::store::{AggregationStore, CounterBackend, DurableStore};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = EngineConfig::load()?;
    init_tracing(&config.log_filter, config.log_json)?;

    let ladder = Arc::new(config.ladder()?);
    let objects = Arc::new(LocalFsObjectStore::new(&config.data_dir));
    info!(
        backend = ?config.backend,
        data_dir = %config.data_dir.display(),
        resolutions = ladder.len(),
        "starting counter server"
    );
    if config.snapshot_compress && !cfg!(feature = "compression") {
        warn!("snapshot compression requested but the compression feature is disabled");
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    };

    match config.backend {
        BackendKind::Memory => {
            let store = AggregationStore::new(ladder).with_skew_window(config.skew_window_secs);
            let manager =
                SnapshotManager::new(store.clone(), Arc::clone(&objects), config.snapshot_config());
            manager.hydrate().await;
            let snapshots = manager.spawn();

            let backend: Arc<dyn CounterBackend> = Arc::new(store);
            CounterServer::bind(&config.listen_addr, backend)
                .await?
                .run_until(shutdown)
                .await;
            snapshots.shutdown().await;
        }
        BackendKind::Durable => {
            let store = DurableStore::new(objects, ladder).with_skew_window(config.skew_window_secs);
            let backend: Arc<dyn CounterBackend> = Arc::new(store);
            CounterServer::bind(&config.listen_addr, backend)
                .await?
                .run_until(shutdown)
                .await;
        }
    }

    info!("counter server stopped");
    Ok(())
}
