// crates/partid-matcher/src/matcher.rs
//
// TwoStageMatcher: STAGE1 -> (ambiguous?) -> STAGE2 -> RESOLVED.
//
// Callers pass the snapshot and fusion weight they loaded for the current
// request, so every observation of one image is scored against the same view.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use partid_core::{
    top_margin, HardPairOracle, MatchOutcome, PartIdError, QueryObservation, Resolution,
};
use partid_store::IndexSnapshot;

use crate::fusion::stage1;
use crate::gate::{AmbiguityGate, GateConfig};
use crate::rerank::{RerankStrategy, Reranker};

/// Matcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Broad-recall depth per modality.
    #[serde(default = "default_k1")]
    pub k1: usize,
    /// Shortlist length kept after fusion.
    #[serde(default = "default_k2")]
    pub k2: usize,
    /// Stage-2 deadline in milliseconds.
    #[serde(default = "default_stage2_timeout_ms")]
    pub stage2_timeout_ms: u64,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub rerank: RerankStrategy,
}

fn default_k1() -> usize {
    50
}

fn default_k2() -> usize {
    5
}

fn default_stage2_timeout_ms() -> u64 {
    50
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            k2: default_k2(),
            stage2_timeout_ms: default_stage2_timeout_ms(),
            gate: GateConfig::default(),
            rerank: RerankStrategy::default(),
        }
    }
}

/// Matcher counters since startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherStats {
    pub queries: u64,
    pub stage2_entries: u64,
    pub stage2_timeouts: u64,
    pub stage2_errors: u64,
    /// Lifetime Stage-2 entry rate.
    pub stage2_rate: f64,
    /// Stage-2 entry rate over the gate's rolling window.
    pub rolling_stage2_rate: f64,
    pub margin_threshold: f32,
}

pub struct TwoStageMatcher {
    config: MatcherConfig,
    gate: AmbiguityGate,
    reranker: Arc<dyn Reranker>,
    hard_pairs: Option<Arc<dyn HardPairOracle>>,
    queries: AtomicU64,
    stage2_entries: AtomicU64,
    stage2_timeouts: AtomicU64,
    stage2_errors: AtomicU64,
}

impl std::fmt::Debug for TwoStageMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoStageMatcher")
            .field("config", &self.config)
            .field("reranker", &self.reranker.name())
            .finish()
    }
}

impl TwoStageMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            gate: AmbiguityGate::new(config.gate.clone()),
            reranker: config.rerank.build(),
            config,
            hard_pairs: None,
            queries: AtomicU64::new(0),
            stage2_entries: AtomicU64::new(0),
            stage2_timeouts: AtomicU64::new(0),
            stage2_errors: AtomicU64::new(0),
        }
    }

    /// Replace the configured reranker.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    /// Bias the gate with known hard pairs.
    pub fn with_hard_pairs(mut self, oracle: Arc<dyn HardPairOracle>) -> Self {
        self.hard_pairs = Some(oracle);
        self
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn gate(&self) -> &AmbiguityGate {
        &self.gate
    }

    /// Rank catalog candidates for one observation.
    pub async fn match_observation(
        &self,
        observation: &QueryObservation,
        snapshot: Arc<IndexSnapshot>,
        w_txt: f32,
    ) -> Result<MatchOutcome, PartIdError> {
        observation.validate(snapshot.dimension())?;
        self.queries.fetch_add(1, Ordering::Relaxed);

        let s1 = stage1(
            &snapshot,
            observation,
            w_txt,
            self.config.k1,
            self.config.k2,
        );
        let margin = top_margin(&s1.candidates);
        let top_score = s1.candidates.first().map(|c| c.fused_score).unwrap_or(0.0);
        let hard_pair = match (&self.hard_pairs, s1.candidates.get(0), s1.candidates.get(1)) {
            (Some(oracle), Some(a), Some(b)) => oracle.is_hard_pair(&a.key, &b.key),
            _ => false,
        };

        let decision = self
            .gate
            .decide(s1.candidates.len(), margin, top_score, hard_pair);

        let mut outcome = MatchOutcome {
            observation_id: observation.observation_id.clone(),
            margin,
            candidates: s1.candidates,
            resolution: Resolution::Stage1,
            degraded: false,
            w_txt: s1.w_txt,
            visual_top: s1.visual_top,
            text_top: s1.text_top,
        };

        if !decision.enter_stage2 {
            tracing::trace!(
                observation = %observation.observation_id,
                margin,
                "Resolved in Stage 1"
            );
            return Ok(outcome);
        }

        self.stage2_entries.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            observation = %observation.observation_id,
            margin,
            threshold = decision.threshold,
            reason = ?decision.reason,
            "{}",
            PartIdError::AmbiguousMatch {
                observation_id: observation.observation_id.clone(),
                margin,
            }
        );

        let deadline = Duration::from_millis(self.config.stage2_timeout_ms);
        let rerank = self.reranker.rerank(
            observation,
            outcome.candidates.clone(),
            snapshot,
            s1.w_txt,
        );
        match tokio::time::timeout(deadline, rerank).await {
            Ok(Ok(mut reranked)) => {
                reranked.truncate(self.config.k2);
                for (rank, c) in reranked.iter_mut().enumerate() {
                    c.rank = rank;
                }
                outcome.margin = top_margin(&reranked);
                outcome.candidates = reranked;
                outcome.resolution = Resolution::Stage2;
            }
            Ok(Err(e)) => {
                self.stage2_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    observation = %observation.observation_id,
                    reranker = self.reranker.name(),
                    error = %e,
                    "Stage 2 failed; using Stage-1 ranking"
                );
                outcome.resolution = Resolution::Degraded;
                outcome.degraded = true;
            }
            Err(_) => {
                self.stage2_timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    observation = %observation.observation_id,
                    reranker = self.reranker.name(),
                    timeout_ms = self.config.stage2_timeout_ms,
                    "Stage 2 timed out; using Stage-1 ranking"
                );
                outcome.resolution = Resolution::Degraded;
                outcome.degraded = true;
            }
        }
        Ok(outcome)
    }

    pub fn stats(&self) -> MatcherStats {
        let queries = self.queries.load(Ordering::Relaxed);
        let stage2_entries = self.stage2_entries.load(Ordering::Relaxed);
        MatcherStats {
            queries,
            stage2_entries,
            stage2_timeouts: self.stage2_timeouts.load(Ordering::Relaxed),
            stage2_errors: self.stage2_errors.load(Ordering::Relaxed),
            stage2_rate: if queries == 0 {
                0.0
            } else {
                stage2_entries as f64 / queries as f64
            },
            rolling_stage2_rate: self.gate.rolling_rate(),
            margin_threshold: self.gate.threshold(),
        }
    }
}
