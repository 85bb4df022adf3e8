// crates/partid-engine/src/metrics.rs
//
// Operational counters surfaced for SLO monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Engine-level counters. Component counters (matcher, inventory, controller,
/// store) are read from the components when a snapshot is taken.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub identify_calls: AtomicU64,
    pub observations: AtomicU64,
    pub invalid_observations: AtomicU64,
    pub assigned: AtomicU64,
    pub unresolved: AtomicU64,
    pub commit_retries: AtomicU64,
    pub commit_failures: AtomicU64,
    pub feedback_events: AtomicU64,
    pub feedback_ignored: AtomicU64,
}

impl EngineMetrics {
    pub fn incr(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Point-in-time metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub identify_calls: u64,
    pub observations: u64,
    pub invalid_observations: u64,
    pub assigned: u64,
    pub unresolved: u64,
    /// Lifetime fraction of queries that entered Stage 2.
    pub stage2_rate: f64,
    /// Stage-2 entry rate over the gate's rolling window.
    pub stage2_rate_rolling: f64,
    pub stage2_timeouts: u64,
    pub stage2_errors: u64,
    pub margin_threshold: f32,
    pub w_txt: f32,
    pub weight_adjustments_24h: usize,
    pub rate_limited_events: u64,
    pub feedback_events: u64,
    pub feedback_ignored: u64,
    /// Must stay 0.
    pub bom_negative_events: u64,
    pub commit_conflicts: u64,
    pub commit_retries: u64,
    pub commit_failures: u64,
    pub open_jobs: usize,
    pub hard_templates: usize,
    pub index_size: usize,
    pub index_delta: usize,
    pub index_generation: u64,
    pub index_age_secs: i64,
}
