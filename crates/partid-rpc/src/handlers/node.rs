// crates/partid-rpc/src/handlers/node.rs
//
// Node info, health and metrics handlers: GetNodeInfo, GetHealth, GetMetrics.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use partid_engine::{IdentificationEngine, MetricsSnapshot};

// ---------------------------------------------------------------------------
// GetNodeInfo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetNodeInfoRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetNodeInfoResponse {
    /// Software version.
    pub version: String,
    /// Uptime in seconds (0 when the start time is unknown).
    pub uptime_seconds: u64,
    /// Embedding dimension every request must match.
    pub dimension: usize,
    /// Configured Stage-2 reranker.
    pub reranker: String,
}

pub async fn handle_get_node_info(
    engine: &Arc<IdentificationEngine>,
    _request: GetNodeInfoRequest,
    start_time: Option<Instant>,
) -> Result<GetNodeInfoResponse, String> {
    let config = engine.config();
    Ok(GetNodeInfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0),
        dimension: config.dimension,
        reranker: format!("{:?}", config.matcher.rerank),
    })
}

// ---------------------------------------------------------------------------
// GetHealth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetHealthRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetHealthResponse {
    /// Overall health: "healthy", "degraded", or "unhealthy".
    pub status: String,
    /// Catalog has at least one live entry.
    pub index_ok: bool,
    /// No commit ever drove a ledger line below zero.
    pub inventory_ok: bool,
    pub index_size: usize,
    pub open_jobs: usize,
    /// Human-readable details.
    pub details: Option<String>,
}

/// Handle a GetHealth request.
///
/// A BOM-negative event is unhealthy: the ledger invariant has been broken.
/// An empty catalog is degraded: every identify call would come back
/// unresolved.
pub async fn handle_get_health(
    engine: &Arc<IdentificationEngine>,
    _request: GetHealthRequest,
) -> Result<GetHealthResponse, String> {
    let metrics = engine.metrics().await;
    let index_ok = metrics.index_size > 0;
    let inventory_ok = metrics.bom_negative_events == 0;

    let (status, details) = if !inventory_ok {
        (
            "unhealthy",
            Some(format!(
                "{} BOM-negative events recorded",
                metrics.bom_negative_events
            )),
        )
    } else if !index_ok {
        ("degraded", Some("Catalog is empty".to_string()))
    } else {
        ("healthy", None)
    };

    Ok(GetHealthResponse {
        status: status.to_string(),
        index_ok,
        inventory_ok,
        index_size: metrics.index_size,
        open_jobs: metrics.open_jobs,
        details,
    })
}

// ---------------------------------------------------------------------------
// GetMetrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetMetricsRequest {}

pub async fn handle_get_metrics(
    engine: &Arc<IdentificationEngine>,
    _request: GetMetricsRequest,
) -> Result<MetricsSnapshot, String> {
    Ok(engine.metrics().await)
}
