// crates/partid-daemon/src/main.rs
//
// Binary entrypoint for the PartID daemon.
//
// Initializes tracing, parses CLI arguments, loads configuration, opens
// durable storage, restores and seeds the catalog, spawns the maintenance
// scheduler, and serves the JSON-RPC API until Ctrl-C.

mod config;
mod scheduler;
mod seed;
mod state;

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use config::DaemonConfig;
use scheduler::MaintenanceScheduler;
use state::{NodeState, NodeStateMachine};

use partid_core::{CatalogPersistence, WeightStatePersistence};
use partid_engine::IdentificationEngine;
use partid_rpc::{PartIdRpcServer, RpcConfig};
use partid_store::MemoryPersistence;

/// PartID daemon: multi-modal part identification behind a JSON-RPC API.
#[derive(Parser, Debug)]
#[command(name = "partid-daemon", version, about = "PartID identification daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "~/.partid/config.toml")]
    config: String,

    /// Data directory; overrides `data_dir` from the config file.
    #[arg(long)]
    data_dir: Option<String>,

    /// Catalog seed file; overrides `catalog_seed` from the config file.
    #[arg(long)]
    seed: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration from TOML file, falling back to defaults if the file
    // is missing or invalid. The warning is emitted once tracing is up.
    let config_path = expand_tilde(&args.config);
    let (mut daemon_config, load_error) = match DaemonConfig::load(&config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (DaemonConfig::default(), Some(e.to_string())),
    };

    // Initialize tracing subscriber for structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(daemon_config.log_level.clone())
            }),
        )
        .init();

    match load_error {
        None => tracing::info!("Loaded configuration from {}", config_path),
        Some(e) => tracing::warn!(
            "Could not load config from {}: {}. Using defaults.",
            config_path,
            e
        ),
    }

    // CLI flags override the config file.
    if let Some(dir) = args.data_dir {
        daemon_config.data_dir = dir;
    }
    if let Some(seed) = args.seed {
        daemon_config.catalog_seed = Some(seed);
    }

    tracing::info!("PartID Daemon v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Data directory: {}", daemon_config.data_dir);
    tracing::info!(
        "RPC endpoint: {}:{}",
        daemon_config.rpc_host,
        daemon_config.rpc_port
    );
    tracing::info!("Embedding dimension: {}", daemon_config.engine.dimension);

    let start_time = Instant::now();
    let mut state_machine = NodeStateMachine::new();

    // ---------------------------------------------------------------
    // Storage and engine.
    // ---------------------------------------------------------------
    state_machine.transition(NodeState::Loading)?;
    let (catalog, weights) = open_persistence(&daemon_config)?;
    let engine = Arc::new(IdentificationEngine::with_persistence(
        daemon_config.engine.clone(),
        catalog,
        weights,
    )?);

    let restored = engine.catalog_stats();
    tracing::info!(
        "Catalog restored: {} entries (ANN {})",
        restored.live,
        if restored.ann_active { "active" } else { "inactive" }
    );

    if let Some(seed_path) = &daemon_config.catalog_seed {
        let seed_path = expand_tilde(seed_path);
        if let Err(e) = seed::apply_seed(&engine, &seed_path).await {
            tracing::error!("Failed to apply catalog seed {}: {}", seed_path, e);
            return Err(e.into());
        }
    }

    // ---------------------------------------------------------------
    // Background maintenance and RPC.
    // ---------------------------------------------------------------
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let maintenance = MaintenanceScheduler::new(
        engine.clone(),
        Duration::from_secs(daemon_config.maintenance_interval_secs.max(1)),
        daemon_config.rebuild_delta_ratio,
        chrono::Duration::seconds(daemon_config.max_index_age_secs),
    );
    let maintenance_handle = tokio::spawn(async move {
        maintenance.run(shutdown_rx).await;
    });

    let rpc_config = RpcConfig {
        host: daemon_config.rpc_host.clone(),
        port: daemon_config.rpc_port,
        rate_limit: daemon_config.rate_limit.clone(),
    };
    let rpc_server = PartIdRpcServer::new(rpc_config, engine.clone()).with_start_time(start_time);

    state_machine.transition(NodeState::Serving)?;

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };
    if let Err(e) = rpc_server.start_with_shutdown(shutdown_signal).await {
        tracing::error!("RPC server error: {}", e);
    }

    state_machine.transition(NodeState::ShuttingDown)?;
    let _ = shutdown_tx.send(true);
    if let Err(e) = maintenance_handle.await {
        tracing::warn!("Maintenance task ended abnormally: {}", e);
    }

    let metrics = engine.metrics().await;
    tracing::info!(
        identify_calls = metrics.identify_calls,
        assigned = metrics.assigned,
        bom_negative_events = metrics.bom_negative_events,
        "PartID daemon shut down gracefully"
    );
    Ok(())
}

type PersistencePair = (
    Arc<dyn CatalogPersistence>,
    Arc<dyn WeightStatePersistence>,
);

/// Open RocksDB under the data directory, or in-memory storage when
/// configured (or when built without the `rocksdb` feature).
fn open_persistence(config: &DaemonConfig) -> Result<PersistencePair, Box<dyn std::error::Error>> {
    if config.in_memory {
        tracing::warn!("Running with in-memory storage; catalog and weights are not durable");
        return Ok(memory_persistence());
    }

    #[cfg(feature = "rocksdb")]
    {
        let data_dir = expand_tilde(&config.data_dir);
        std::fs::create_dir_all(&data_dir)?;
        let path = format!("{}/catalog_rocksdb", data_dir);
        let store = Arc::new(
            partid_store::RocksStore::open(&path)
                .map_err(|e| format!("Failed to open RocksDB at {}: {}", path, e))?,
        );
        tracing::info!("RocksDB opened at {}", path);
        let catalog: Arc<dyn CatalogPersistence> = store.clone();
        let weights: Arc<dyn WeightStatePersistence> = store;
        Ok((catalog, weights))
    }

    #[cfg(not(feature = "rocksdb"))]
    {
        tracing::warn!("Built without RocksDB support; using in-memory storage");
        Ok(memory_persistence())
    }
}

fn memory_persistence() -> PersistencePair {
    let memory = Arc::new(MemoryPersistence::new());
    let catalog: Arc<dyn CatalogPersistence> = memory.clone();
    let weights: Arc<dyn WeightStatePersistence> = memory;
    (catalog, weights)
}

/// Expand a leading `~/` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}/{}", home.display(), rest);
        }
    }
    path.to_string()
}
