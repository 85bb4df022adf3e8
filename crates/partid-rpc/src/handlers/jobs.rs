// crates/partid-rpc/src/handlers/jobs.rs
//
// Job lifecycle handlers: OpenJob, CloseJob, Remaining, Report.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use partid_core::EntryKey;
use partid_engine::{BomSnapshot, IdentificationEngine, JobStats, LedgerReport};

// ---------------------------------------------------------------------------
// OpenJob
// ---------------------------------------------------------------------------

/// The BOM snapshot is the request body.
pub type OpenJobRequest = BomSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenJobResponse {
    pub job_id: String,
    /// Ledger as opened: every line with its full expected quantity.
    pub report: LedgerReport,
}

pub async fn handle_open_job(
    engine: &Arc<IdentificationEngine>,
    request: OpenJobRequest,
) -> Result<OpenJobResponse, String> {
    engine
        .open_job(&request)
        .await
        .map_err(|e| format!("Open job failed: {}", e))?;
    let report = engine
        .job_report(&request.job_id)
        .await
        .map_err(|e| format!("Open job failed: {}", e))?;
    Ok(OpenJobResponse {
        job_id: request.job_id,
        report,
    })
}

// ---------------------------------------------------------------------------
// CloseJob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseJobRequest {
    pub job_id: String,
}

/// Handle a CloseJob request. Returns the final ledger.
pub async fn handle_close_job(
    engine: &Arc<IdentificationEngine>,
    request: CloseJobRequest,
) -> Result<LedgerReport, String> {
    engine
        .close_job(&request.job_id)
        .await
        .map_err(|e| format!("Close job failed: {}", e))
}

// ---------------------------------------------------------------------------
// Remaining
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemainingRequest {
    pub job_id: String,
    pub entry_id: String,
    pub variant_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemainingResponse {
    pub job_id: String,
    pub key: EntryKey,
    /// Zero for entries not on the BOM.
    pub remaining: u32,
}

pub async fn handle_remaining(
    engine: &Arc<IdentificationEngine>,
    request: RemainingRequest,
) -> Result<RemainingResponse, String> {
    let key = EntryKey::new(request.entry_id, request.variant_id);
    let remaining = engine
        .remaining(&request.job_id, &key)
        .await
        .map_err(|e| format!("Remaining failed: {}", e))?;
    Ok(RemainingResponse {
        job_id: request.job_id,
        key,
        remaining,
    })
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReportRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReportResponse {
    pub report: LedgerReport,
    pub stats: JobStats,
}

pub async fn handle_job_report(
    engine: &Arc<IdentificationEngine>,
    request: JobReportRequest,
) -> Result<JobReportResponse, String> {
    let report = engine
        .job_report(&request.job_id)
        .await
        .map_err(|e| format!("Job report failed: {}", e))?;
    let stats = engine
        .job_stats(&request.job_id)
        .await
        .map_err(|e| format!("Job report failed: {}", e))?;
    Ok(JobReportResponse { report, stats })
}
