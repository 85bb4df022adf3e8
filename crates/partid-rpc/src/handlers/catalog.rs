// crates/partid-rpc/src/handlers/catalog.rs
//
// Catalog handlers: Upsert, Remove, Stats, Rebuild, Prune.
// These go straight to the engine's Vector Store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use partid_core::{CatalogEntry, EntryKey};
use partid_engine::{IdentificationEngine, PruneReport, StoreStats};

// ---------------------------------------------------------------------------
// Upsert
// ---------------------------------------------------------------------------

/// Insert or replace a batch of catalog entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertEntriesRequest {
    pub entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertEntriesResponse {
    /// Entries written.
    pub written: usize,
    /// Store state after the write.
    pub stats: StoreStats,
}

/// Handle an Upsert request.
///
/// The batch is all-or-nothing: one entry with the wrong dimension rejects
/// the whole request.
pub async fn handle_upsert_entries(
    engine: &Arc<IdentificationEngine>,
    request: UpsertEntriesRequest,
) -> Result<UpsertEntriesResponse, String> {
    if request.entries.is_empty() {
        return Err("entries must not be empty".to_string());
    }
    let written = engine
        .upsert_entries(request.entries)
        .map_err(|e| format!("Upsert failed: {}", e))?;
    Ok(UpsertEntriesResponse {
        written,
        stats: engine.catalog_stats(),
    })
}

// ---------------------------------------------------------------------------
// Remove
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveEntryRequest {
    pub entry_id: String,
    pub variant_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveEntryResponse {
    /// False when the entry was not in the catalog.
    pub removed: bool,
}

pub async fn handle_remove_entry(
    engine: &Arc<IdentificationEngine>,
    request: RemoveEntryRequest,
) -> Result<RemoveEntryResponse, String> {
    let key = EntryKey::new(request.entry_id, request.variant_id);
    let removed = engine
        .remove_entry(&key)
        .map_err(|e| format!("Remove failed: {}", e))?;
    Ok(RemoveEntryResponse { removed })
}

// ---------------------------------------------------------------------------
// Stats / Rebuild / Prune
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogStatsRequest {}

pub async fn handle_catalog_stats(
    engine: &Arc<IdentificationEngine>,
    _request: CatalogStatsRequest,
) -> Result<StoreStats, String> {
    Ok(engine.catalog_stats())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RebuildIndexRequest {}

/// Handle a Rebuild request. Returns once the new snapshot is published.
pub async fn handle_rebuild_index(
    engine: &Arc<IdentificationEngine>,
    _request: RebuildIndexRequest,
) -> Result<StoreStats, String> {
    engine
        .rebuild_index()
        .await
        .map_err(|e| format!("Rebuild failed: {}", e))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneIndexRequest {}

pub async fn handle_prune_index(
    engine: &Arc<IdentificationEngine>,
    _request: PruneIndexRequest,
) -> Result<PruneReport, String> {
    engine
        .prune_index()
        .await
        .map_err(|e| format!("Prune failed: {}", e))
}
