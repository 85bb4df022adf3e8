// crates/partid-daemon/src/scheduler.rs
//
// Maintenance scheduler for the PartID daemon.
//
// Every interval: prune stale entries, then rebuild the ANN index if the
// unindexed delta, tombstones, or index age say it is due. Both steps run on
// blocking threads inside the engine and publish by snapshot swap, so
// identify calls continue undisturbed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use partid_core::PartIdError;
use partid_engine::{IdentificationEngine, PruneReport};

/// What one maintenance pass did.
#[derive(Debug, Clone)]
pub struct MaintenanceReport {
    pub pruned: PruneReport,
    pub rebuilt: bool,
    pub generation: u64,
}

pub struct MaintenanceScheduler {
    engine: Arc<IdentificationEngine>,
    interval: Duration,
    rebuild_delta_ratio: f64,
    max_index_age: chrono::Duration,
}

impl MaintenanceScheduler {
    pub fn new(
        engine: Arc<IdentificationEngine>,
        interval: Duration,
        rebuild_delta_ratio: f64,
        max_index_age: chrono::Duration,
    ) -> Self {
        Self {
            engine,
            interval,
            rebuild_delta_ratio,
            max_index_age,
        }
    }

    /// Run passes until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Maintenance scheduler started (interval={}s, delta_ratio={})",
            self.interval.as_secs(),
            self.rebuild_delta_ratio
        );

        let mut ticker = tokio::time::interval(self.interval);
        // The first tick completes immediately; skip it so startup isn't
        // followed by an instant rebuild.
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Maintenance scheduler received shutdown signal");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!("Maintenance pass failed: {}", e);
                    }
                }
            }
        }
    }

    /// One prune-then-maybe-rebuild pass.
    pub async fn run_once(&self) -> Result<MaintenanceReport, PartIdError> {
        let pruned = self.engine.prune_index().await?;
        if pruned.removed() > 0 {
            tracing::info!(
                by_age = pruned.by_age,
                by_size = pruned.by_size,
                remaining = pruned.remaining,
                "Pruned catalog"
            );
        }

        let stats = self.engine.catalog_stats();
        let rebuilt = stats.needs_rebuild(self.rebuild_delta_ratio, self.max_index_age);
        let generation = if rebuilt {
            let after = self.engine.rebuild_index().await?;
            tracing::info!(
                generation = after.generation,
                live = after.live,
                ann_active = after.ann_active,
                "Rebuilt index"
            );
            after.generation
        } else {
            tracing::trace!(
                delta = stats.delta,
                tombstones = stats.tombstones,
                "Index rebuild not due"
            );
            stats.generation
        };

        Ok(MaintenanceReport {
            pruned,
            rebuilt,
            generation,
        })
    }
}
