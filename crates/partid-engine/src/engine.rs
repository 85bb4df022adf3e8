// crates/partid-engine/src/engine.rs
//
// IdentificationEngine: the public surface of the PartID subsystem.
//
// identify() flow for one image:
//   1. load the store snapshot and w_txt once
//   2. match every observation concurrently (one task each, joined in order)
//   3. filter candidates by the job's remaining capacity
//   4. solve the joint assignment
//   5. commit to the ledger; on CommitConflict go back to 3
//   6. feed the miner and the provenance cache

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::Duration;
use tokio::task::JoinSet;

use partid_assign::{AssignmentSolver, SolverRow};
use partid_calibrate::{FusionWeightController, HardCaseMiner};
use partid_core::{
    AssignmentResult, CatalogEntry, CatalogPersistence, EntryKey, FeedbackOutcome,
    FusionWeightState, HardPairOracle, HardTemplate, MatchOutcome, PartIdError, QaFeedback,
    QueryObservation, UnresolvedObservation, UnresolvedReason, WeightStatePersistence,
};
use partid_inventory::{BomSnapshot, InventoryRegistry, JobStats, LedgerReport};
use partid_matcher::{Reranker, TwoStageMatcher};
use partid_store::{PruneReport, StoreStats, VectorStore};

use crate::config::EngineConfig;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::provenance::{Provenance, ProvenanceCache};

pub struct IdentificationEngine {
    config: EngineConfig,
    store: Arc<VectorStore>,
    matcher: Arc<TwoStageMatcher>,
    solver: AssignmentSolver,
    inventory: InventoryRegistry,
    controller: FusionWeightController,
    miner: Arc<HardCaseMiner>,
    provenance: Mutex<ProvenanceCache>,
    metrics: EngineMetrics,
}

impl std::fmt::Debug for IdentificationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentificationEngine")
            .field("store", &self.store)
            .field("matcher", &self.matcher)
            .field("controller", &self.controller)
            .finish()
    }
}

impl IdentificationEngine {
    /// In-memory engine with an empty catalog.
    pub fn new(config: EngineConfig) -> Result<Self, PartIdError> {
        config.validate()?;
        let store = Arc::new(VectorStore::new(config.dimension, config.ann.clone()));
        let controller = FusionWeightController::new(config.controller.clone(), None)?;
        Ok(Self::assemble(config, store, controller))
    }

    /// Engine backed by durable catalog and weight-state storage.
    pub fn with_persistence(
        config: EngineConfig,
        catalog: Arc<dyn CatalogPersistence>,
        weights: Arc<dyn WeightStatePersistence>,
    ) -> Result<Self, PartIdError> {
        config.validate()?;
        let store = Arc::new(VectorStore::load(
            catalog,
            config.dimension,
            config.ann.clone(),
        )?);
        let controller = FusionWeightController::new(config.controller.clone(), Some(weights))?;
        Ok(Self::assemble(config, store, controller))
    }

    fn assemble(
        config: EngineConfig,
        store: Arc<VectorStore>,
        controller: FusionWeightController,
    ) -> Self {
        let miner = Arc::new(HardCaseMiner::new(config.miner.clone()));
        let matcher = TwoStageMatcher::new(config.matcher.clone())
            .with_hard_pairs(miner.clone() as Arc<dyn HardPairOracle>);
        Self {
            solver: AssignmentSolver::new(config.solver.clone()),
            provenance: Mutex::new(ProvenanceCache::new(config.provenance_capacity)),
            matcher: Arc::new(matcher),
            inventory: InventoryRegistry::new(),
            metrics: EngineMetrics::default(),
            store,
            controller,
            miner,
            config,
        }
    }

    /// Swap in a custom Stage-2 reranker.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        let matcher = TwoStageMatcher::new(self.config.matcher.clone())
            .with_reranker(reranker)
            .with_hard_pairs(self.miner.clone() as Arc<dyn HardPairOracle>);
        self.matcher = Arc::new(matcher);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Identify every observation of one image and commit the assignment
    /// against the job's inventory.
    pub async fn identify(
        &self,
        job_id: &str,
        image_id: &str,
        observations: Vec<QueryObservation>,
    ) -> Result<AssignmentResult, PartIdError> {
        self.identify_with(job_id, image_id, observations, || std::future::ready(()))
            .await
    }

    /// `identify` with `before_commit` awaited after each attempt's solve and
    /// before its ledger commit.
    async fn identify_with<F, Fut>(
        &self,
        job_id: &str,
        image_id: &str,
        observations: Vec<QueryObservation>,
        mut before_commit: F,
    ) -> Result<AssignmentResult, PartIdError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let job = self.inventory.get(job_id).await?;
        EngineMetrics::incr(&self.metrics.identify_calls, 1);
        EngineMetrics::incr(&self.metrics.observations, observations.len() as u64);

        let snapshot = self.store.snapshot();
        let w_txt = self.controller.current_weight();
        let order: Vec<String> = observations
            .iter()
            .map(|o| o.observation_id.clone())
            .collect();

        // Stage 1 / Stage 2 per observation.
        let mut invalid: Vec<(usize, String)> = Vec::new();
        let mut seen = HashSet::new();
        let mut tasks = JoinSet::new();
        for (idx, obs) in observations.into_iter().enumerate() {
            if !seen.insert(obs.observation_id.clone()) {
                invalid.push((idx, "duplicate observation id".to_string()));
                continue;
            }
            let matcher = self.matcher.clone();
            let snapshot = snapshot.clone();
            tasks.spawn(async move {
                let outcome = matcher.match_observation(&obs, snapshot, w_txt).await;
                (idx, outcome)
            });
        }

        let mut outcomes: Vec<Option<MatchOutcome>> = vec![None; order.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, Ok(outcome))) => outcomes[idx] = Some(outcome),
                Ok((idx, Err(e))) => {
                    tracing::debug!(
                        observation = %order[idx],
                        error = %e,
                        "Observation rejected"
                    );
                    invalid.push((idx, e.to_string()));
                }
                Err(e) => {
                    return Err(PartIdError::InvalidState(format!("matcher task failed: {}", e)));
                }
            }
        }
        EngineMetrics::incr(&self.metrics.invalid_observations, invalid.len() as u64);

        for outcome in outcomes.iter().flatten() {
            self.miner.observe_match(outcome);
        }

        // Filter, solve, commit; re-filter and re-solve on conflict.
        let valid: Vec<&MatchOutcome> = outcomes.iter().flatten().collect();
        let lists: Vec<_> = valid.iter().map(|o| o.candidates.clone()).collect();
        let max_attempts = self.config.max_commit_retries + 1;
        let mut attempt = 0;
        let (mut result, reservation) = loop {
            attempt += 1;
            let reservation = job.reserve_batch(&lists).await;
            let rows: Vec<SolverRow> = valid
                .iter()
                .zip(reservation.lists.iter())
                .map(|(o, candidates)| SolverRow {
                    observation_id: o.observation_id.clone(),
                    candidates: candidates.clone(),
                })
                .collect();
            let result = self
                .solver
                .solve(job_id, image_id, &rows, &reservation.capacity)?;

            before_commit().await;
            match job.commit(&result).await {
                Ok(()) => break (result, reservation),
                Err(e @ PartIdError::CommitConflict { .. }) => {
                    if attempt >= max_attempts {
                        EngineMetrics::incr(&self.metrics.commit_failures, 1);
                        tracing::warn!(
                            job = %job_id,
                            image = %image_id,
                            attempts = attempt,
                            "Commit retries exhausted"
                        );
                        return Err(e);
                    }
                    EngineMetrics::incr(&self.metrics.commit_retries, 1);
                    tracing::warn!(
                        job = %job_id,
                        image = %image_id,
                        attempt,
                        error = %e,
                        "Commit conflict; re-filtering and re-solving"
                    );
                }
                Err(e) => return Err(e),
            }
        };
        result.commit_attempts = attempt;

        // Candidates that existed but were all filtered by inventory.
        for (pos, outcome) in valid.iter().enumerate() {
            if outcome.candidates.is_empty() || !reservation.lists[pos].is_empty() {
                continue;
            }
            if let Some(u) = result
                .unresolved
                .iter_mut()
                .find(|u| u.observation_id == outcome.observation_id)
            {
                u.reason = UnresolvedReason::CapacityExhausted;
                u.detail = Some("all candidates have exhausted inventory".to_string());
            }
        }
        for (idx, detail) in invalid {
            result.unresolved.push(UnresolvedObservation {
                observation_id: order[idx].clone(),
                reason: UnresolvedReason::InvalidObservation,
                detail: Some(detail),
            });
        }
        // Report unresolved in input order.
        let first_index: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .rev()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        result.unresolved.sort_by_key(|u| {
            first_index
                .get(u.observation_id.as_str())
                .copied()
                .unwrap_or(usize::MAX)
        });

        result.degraded_observations = valid
            .iter()
            .filter(|o| o.degraded)
            .map(|o| o.observation_id.clone())
            .collect();

        {
            let mut cache = self.provenance.lock().unwrap_or_else(|e| e.into_inner());
            for outcome in &valid {
                cache.insert(
                    outcome.observation_id.clone(),
                    Provenance {
                        visual_top: outcome.visual_top.clone(),
                        text_top: outcome.text_top.clone(),
                    },
                );
            }
        }
        for a in &result.assignments {
            if let Some(outcome) = valid.iter().find(|o| o.observation_id == a.observation_id) {
                self.miner.observe_resolution(outcome, &a.key);
            }
        }

        EngineMetrics::incr(&self.metrics.assigned, result.assignments.len() as u64);
        EngineMetrics::incr(&self.metrics.unresolved, result.unresolved.len() as u64);
        tracing::info!(
            job = %job_id,
            image = %image_id,
            assigned = result.assignments.len(),
            unresolved = result.unresolved.len(),
            degraded = result.degraded_observations.len(),
            attempts = attempt,
            "Image identified"
        );
        Ok(result)
    }

    /// Feed one QA signal to the weight controller, tagging it from the
    /// provenance cache when it arrives without modality agreement.
    pub async fn submit_feedback(
        &self,
        mut feedback: QaFeedback,
    ) -> Result<FeedbackOutcome, PartIdError> {
        EngineMetrics::incr(&self.metrics.feedback_events, 1);
        if feedback.agreement.is_none() {
            let provenance = self
                .provenance
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(&feedback.query_id)
                .cloned();
            match provenance {
                Some(p) => feedback.agreement = p.agreement(&feedback.resolved),
                None => {
                    EngineMetrics::incr(&self.metrics.feedback_ignored, 1);
                    return Ok(FeedbackOutcome::Ignored {
                        reason: format!("unknown query {}", feedback.query_id),
                    });
                }
            }
        }
        let outcome = self.controller.submit(&feedback).await?;
        if matches!(outcome, FeedbackOutcome::Ignored { .. }) {
            EngineMetrics::incr(&self.metrics.feedback_ignored, 1);
        }
        Ok(outcome)
    }

    pub fn get_weight_state(&self) -> FusionWeightState {
        (*self.controller.state()).clone()
    }

    pub fn get_hard_templates(&self) -> Vec<HardTemplate> {
        self.miner.templates()
    }

    pub async fn open_job(&self, bom: &BomSnapshot) -> Result<(), PartIdError> {
        self.inventory.open_job(bom).await.map(|_| ())
    }

    pub async fn close_job(&self, job_id: &str) -> Result<LedgerReport, PartIdError> {
        self.inventory.close_job(job_id).await
    }

    pub async fn remaining(&self, job_id: &str, key: &EntryKey) -> Result<u32, PartIdError> {
        Ok(self.inventory.get(job_id).await?.remaining(key).await)
    }

    pub async fn job_report(&self, job_id: &str) -> Result<LedgerReport, PartIdError> {
        Ok(self.inventory.get(job_id).await?.report().await)
    }

    pub async fn job_stats(&self, job_id: &str) -> Result<JobStats, PartIdError> {
        Ok(self.inventory.get(job_id).await?.stats().await)
    }

    /// Insert or replace catalog entries. Returns how many were written.
    pub fn upsert_entries(&self, entries: Vec<CatalogEntry>) -> Result<usize, PartIdError> {
        let n = entries.len();
        self.store.upsert_batch(entries)?;
        Ok(n)
    }

    pub fn remove_entry(&self, key: &EntryKey) -> Result<bool, PartIdError> {
        self.store.remove(key)
    }

    pub fn catalog_stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Rebuild the ANN graphs on a blocking thread.
    pub async fn rebuild_index(&self) -> Result<StoreStats, PartIdError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.rebuild())
            .await
            .map_err(|e| PartIdError::InvalidState(format!("rebuild task failed: {}", e)))?
    }

    /// Prune with the configured age and size limits.
    pub async fn prune_index(&self) -> Result<PruneReport, PartIdError> {
        let store = self.store.clone();
        let max_age = self.config.prune_max_age_secs.map(Duration::seconds);
        let max_size = self.config.prune_max_size;
        tokio::task::spawn_blocking(move || store.prune(max_age, max_size))
            .await
            .map_err(|e| PartIdError::InvalidState(format!("prune task failed: {}", e)))?
    }

    pub async fn metrics(&self) -> MetricsSnapshot {
        let m = &self.metrics;
        let matcher = self.matcher.stats();
        let weights = self.controller.state();
        let store = self.store.stats();
        MetricsSnapshot {
            identify_calls: EngineMetrics::get(&m.identify_calls),
            observations: EngineMetrics::get(&m.observations),
            invalid_observations: EngineMetrics::get(&m.invalid_observations),
            assigned: EngineMetrics::get(&m.assigned),
            unresolved: EngineMetrics::get(&m.unresolved),
            stage2_rate: matcher.stage2_rate,
            stage2_rate_rolling: matcher.rolling_stage2_rate,
            stage2_timeouts: matcher.stage2_timeouts,
            stage2_errors: matcher.stage2_errors,
            margin_threshold: matcher.margin_threshold,
            w_txt: weights.w_txt,
            weight_adjustments_24h: self.controller.adjustments_last_window(),
            rate_limited_events: weights.rate_limited_events,
            feedback_events: EngineMetrics::get(&m.feedback_events),
            feedback_ignored: EngineMetrics::get(&m.feedback_ignored),
            bom_negative_events: self.inventory.bom_negative_events().await,
            commit_conflicts: self.inventory.commit_conflicts().await,
            commit_retries: EngineMetrics::get(&m.commit_retries),
            commit_failures: EngineMetrics::get(&m.commit_failures),
            open_jobs: self.inventory.job_ids().await.len(),
            hard_templates: self.miner.len(),
            index_size: store.live,
            index_delta: store.delta,
            index_generation: store.generation,
            index_age_secs: store.index_age_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partid_core::{hash_embedding, Assignment, Embedding, ModalityAgreement, Resolution};
    use partid_inventory::BomLine;

    const DIM: usize = 32;

    fn visual(id: &str) -> Embedding {
        hash_embedding(&format!("{id}:visual"), DIM)
    }

    fn text(id: &str) -> Embedding {
        hash_embedding(&format!("{id}:text"), DIM)
    }

    fn entry(id: &str) -> CatalogEntry {
        CatalogEntry::new(
            EntryKey::new(id, "std"),
            visual(id),
            text(id),
            hash_embedding(&format!("{id}:tags"), DIM),
        )
    }

    fn obs(obs_id: &str, looks_like: &str, hint: Option<&str>) -> QueryObservation {
        QueryObservation {
            observation_id: obs_id.to_string(),
            image_id: "img-1".to_string(),
            crop_bbox: None,
            visual: visual(looks_like),
            text_hint: hint.map(text),
            detector_confidence: 0.9,
        }
    }

    async fn engine_with(ids: &[&str], bom: &[(&str, u32)]) -> IdentificationEngine {
        let engine = IdentificationEngine::new(EngineConfig::with_dimension(DIM)).unwrap();
        engine
            .upsert_entries(ids.iter().map(|id| entry(id)).collect())
            .unwrap();
        engine
            .open_job(&BomSnapshot::new(
                "job-1",
                bom.iter()
                    .map(|(id, n)| BomLine::new(*id, "std", *n))
                    .collect(),
            ))
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_identify_assigns_exact_matches() {
        let engine = engine_with(&["A", "B", "C"], &[("A", 1), ("B", 1), ("C", 1)]).await;
        let result = engine
            .identify(
                "job-1",
                "img-1",
                vec![obs("o1", "B", None), obs("o2", "A", None)],
            )
            .await
            .unwrap();
        assert_eq!(result.assignment_for("o1").unwrap().key.entry_id, "B");
        assert_eq!(result.assignment_for("o2").unwrap().key.entry_id, "A");
        assert_eq!(result.commit_attempts, 1);
        assert_eq!(
            engine.remaining("job-1", &EntryKey::new("A", "std")).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let engine = engine_with(&["A"], &[("A", 1)]).await;
        let err = engine
            .identify("nope", "img", vec![obs("o1", "A", None)])
            .await
            .unwrap_err();
        assert!(matches!(err, PartIdError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_bad_observation_does_not_abort_batch() {
        let engine = engine_with(&["A", "B"], &[("A", 1), ("B", 1)]).await;
        let mut bad = obs("o2", "B", None);
        bad.visual = hash_embedding("short", DIM / 2);
        let dup = obs("o1", "B", None);
        let result = engine
            .identify("job-1", "img-1", vec![obs("o1", "A", None), bad, dup])
            .await
            .unwrap();
        assert_eq!(result.assignments.len(), 1);
        assert_eq!(result.unresolved.len(), 2);
        assert!(result
            .unresolved
            .iter()
            .all(|u| u.reason == UnresolvedReason::InvalidObservation));
    }

    #[tokio::test]
    async fn test_exhausted_inventory_reported() {
        let engine = engine_with(&["A"], &[("A", 1)]).await;
        engine
            .identify("job-1", "img-1", vec![obs("o1", "A", None)])
            .await
            .unwrap();
        let result = engine
            .identify("job-1", "img-2", vec![obs("o2", "A", None)])
            .await
            .unwrap();
        assert!(result.assignments.is_empty());
        assert_eq!(result.unresolved[0].reason, UnresolvedReason::CapacityExhausted);
    }

    #[tokio::test]
    async fn test_feedback_tagged_from_provenance() {
        let engine = engine_with(&["A", "B"], &[("A", 1), ("B", 1)]).await;
        engine
            .identify("job-1", "img-1", vec![obs("o1", "A", Some("A"))])
            .await
            .unwrap();

        let outcome = engine
            .submit_feedback(QaFeedback {
                query_id: "o1".to_string(),
                resolved: EntryKey::new("A", "std"),
                correct: true,
                agreement: None,
                at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        assert!(matches!(outcome, FeedbackOutcome::Recorded { .. }));

        let unknown = engine
            .submit_feedback(QaFeedback {
                query_id: "never-seen".to_string(),
                resolved: EntryKey::new("A", "std"),
                correct: true,
                agreement: None,
                at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        assert!(matches!(unknown, FeedbackOutcome::Ignored { .. }));

        let explicit = engine
            .submit_feedback(QaFeedback {
                query_id: "never-seen".to_string(),
                resolved: EntryKey::new("A", "std"),
                correct: false,
                agreement: Some(ModalityAgreement {
                    text_agreed: true,
                    visual_agreed: true,
                }),
                at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        assert!(matches!(explicit, FeedbackOutcome::Recorded { .. }));

        let metrics = engine.metrics().await;
        assert_eq!(metrics.feedback_events, 3);
        assert_eq!(metrics.feedback_ignored, 1);
    }

    #[tokio::test]
    async fn test_metrics_and_maintenance() {
        let engine = engine_with(&["A", "B"], &[("A", 1)]).await;
        engine
            .identify("job-1", "img-1", vec![obs("o1", "A", None)])
            .await
            .unwrap();
        let stats = engine.rebuild_index().await.unwrap();
        assert_eq!(stats.indexed, 2);
        let report = engine.prune_index().await.unwrap();
        assert_eq!(report.remaining, 2);

        let m = engine.metrics().await;
        assert_eq!(m.identify_calls, 1);
        assert_eq!(m.bom_negative_events, 0);
        assert_eq!(m.index_size, 2);
        assert_eq!(m.open_jobs, 1);
        assert!((m.w_txt - 0.3).abs() < 1e-6);
    }

    /// A result from another caller that takes one unit of `id`.
    fn rival_commit(id: &str) -> AssignmentResult {
        let mut r = AssignmentResult::empty("job-1", "img-rival");
        r.assignments.push(Assignment {
            observation_id: "rival".to_string(),
            key: EntryKey::new(id, "std"),
            cost: 0.0,
            fused_score: 1.0,
        });
        r
    }

    #[tokio::test]
    async fn test_commit_conflict_refilters_and_resolves() {
        let engine = engine_with(&["A", "B"], &[("A", 1), ("B", 1)]).await;
        let job = engine.inventory.get("job-1").await.unwrap();
        let rival = rival_commit("A");

        // Another caller takes A between this call's solve and its commit.
        let mut fired = false;
        let result = engine
            .identify_with("job-1", "img-1", vec![obs("o1", "A", None)], || {
                let fire = !std::mem::replace(&mut fired, true);
                let job = job.clone();
                let rival = rival.clone();
                async move {
                    if fire {
                        job.commit(&rival).await.unwrap();
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.assignment_for("o1").unwrap().key.entry_id, "B");
        assert_eq!(result.commit_attempts, 2);
        let a = EntryKey::new("A", "std");
        let b = EntryKey::new("B", "std");
        assert_eq!(engine.remaining("job-1", &a).await.unwrap(), 0);
        assert_eq!(engine.remaining("job-1", &b).await.unwrap(), 0);

        let m = engine.metrics().await;
        assert_eq!(m.commit_conflicts, 1);
        assert_eq!(m.commit_retries, 1);
        assert_eq!(m.commit_failures, 0);
        assert_eq!(m.bom_negative_events, 0);
    }

    #[tokio::test]
    async fn test_commit_conflict_surfaces_when_retries_exhausted() {
        let mut config = EngineConfig::with_dimension(DIM);
        config.max_commit_retries = 0;
        let engine = IdentificationEngine::new(config).unwrap();
        engine.upsert_entries(vec![entry("A"), entry("B")]).unwrap();
        engine
            .open_job(&BomSnapshot::new(
                "job-1",
                vec![BomLine::new("A", "std", 1), BomLine::new("B", "std", 1)],
            ))
            .await
            .unwrap();
        let job = engine.inventory.get("job-1").await.unwrap();
        let rival = rival_commit("A");

        let err = engine
            .identify_with("job-1", "img-1", vec![obs("o1", "A", None)], || {
                let job = job.clone();
                let rival = rival.clone();
                async move {
                    job.commit(&rival).await.unwrap();
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PartIdError::CommitConflict { .. }));

        // Only the rival's unit is gone; the refused commit changed nothing.
        let a = EntryKey::new("A", "std");
        let b = EntryKey::new("B", "std");
        assert_eq!(engine.remaining("job-1", &a).await.unwrap(), 0);
        assert_eq!(engine.remaining("job-1", &b).await.unwrap(), 1);

        let m = engine.metrics().await;
        assert_eq!(m.commit_failures, 1);
        assert_eq!(m.commit_retries, 0);
        assert_eq!(m.assigned, 0);
        assert_eq!(m.bom_negative_events, 0);
    }

    #[tokio::test]
    async fn test_stage1_resolution_for_distinct_parts() {
        let engine = engine_with(&["A", "B", "C"], &[("A", 1), ("B", 1), ("C", 1)]).await;
        let snapshot = engine.store().snapshot();
        let outcome = engine
            .matcher
            .match_observation(&obs("o1", "C", Some("C")), snapshot, 0.3)
            .await
            .unwrap();
        assert_eq!(outcome.resolution, Resolution::Stage1);
        assert_eq!(outcome.top().unwrap().key.entry_id, "C");
    }
}
