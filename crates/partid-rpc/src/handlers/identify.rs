// crates/partid-rpc/src/handlers/identify.rs
//
// Identify handler: one image's detections in, one committed assignment out.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use partid_core::{AssignmentResult, QueryObservation};
use partid_engine::IdentificationEngine;

/// Request to identify every detection of one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyRequest {
    /// Job whose BOM constrains the assignment.
    pub job_id: String,
    pub image_id: String,
    pub observations: Vec<QueryObservation>,
}

/// Response carrying the committed assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub result: AssignmentResult,
    /// Wall-clock time spent inside the engine.
    pub elapsed_ms: u64,
}

/// Handle an Identify request.
///
/// Observations that fail validation come back as unresolved entries rather
/// than failing the call; only job lookup and exhausted commit retries are
/// errors.
pub async fn handle_identify(
    engine: &Arc<IdentificationEngine>,
    request: IdentifyRequest,
) -> Result<IdentifyResponse, String> {
    let start = std::time::Instant::now();
    let result = engine
        .identify(&request.job_id, &request.image_id, request.observations)
        .await
        .map_err(|e| format!("Identify failed: {}", e))?;

    tracing::debug!(
        job_id = %request.job_id,
        image_id = %request.image_id,
        assigned = result.assignments.len(),
        unresolved = result.unresolved.len(),
        "identify handled"
    );

    Ok(IdentifyResponse {
        result,
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}
