// crates/partid-matcher/src/rerank.rs
//
// Stage-2 re-ranking seam and the two provided strategies.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use partid_core::{
    cosine_similarity, rank_candidates, CandidateScore, Modality, PartIdError, QueryObservation,
};
use partid_store::IndexSnapshot;

use crate::fusion::fuse;

/// Heavier comparison applied to an ambiguous shortlist.
///
/// Implementations return the candidates re-scored and re-ranked. They may be
/// cancelled at any `.await` point when the Stage-2 deadline expires.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &'static str;

    async fn rerank(
        &self,
        query: &QueryObservation,
        candidates: Vec<CandidateScore>,
        snapshot: Arc<IndexSnapshot>,
        w_txt: f32,
    ) -> Result<Vec<CandidateScore>, PartIdError>;
}

/// Which provided reranker to build from config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RerankStrategy {
    /// Exact recompute; tag similarity breaks near-ties only.
    Exact { tie_epsilon: f32 },
    /// Tag similarity blended additively into the fused score.
    TagBlend { tag_weight: f32 },
}

impl Default for RerankStrategy {
    fn default() -> Self {
        RerankStrategy::Exact { tie_epsilon: 0.005 }
    }
}

impl RerankStrategy {
    pub fn build(&self) -> Arc<dyn Reranker> {
        match *self {
            RerankStrategy::Exact { tie_epsilon } => Arc::new(ExactRerank { tie_epsilon }),
            RerankStrategy::TagBlend { tag_weight } => Arc::new(TagBlendRerank { tag_weight }),
        }
    }
}

/// Recompute similarities exactly and attach tag similarity.
///
/// Tag vectors share the text embedding space, so the hint is compared when
/// present and the crop embedding otherwise. Candidates no longer in the
/// snapshot are dropped.
fn rescore(
    query: &QueryObservation,
    candidates: Vec<CandidateScore>,
    snapshot: &IndexSnapshot,
    w_txt: f32,
) -> Vec<CandidateScore> {
    let visual_q = query.visual.as_slice();
    let text_q = query.text_hint.as_ref().map(|h| h.as_slice());
    let tag_q = text_q.unwrap_or(visual_q);

    candidates
        .into_iter()
        .filter_map(|mut c| {
            let stored = snapshot.get(&c.key)?;
            let entry = &stored.entry;
            c.visual_sim = cosine_similarity(visual_q, entry.vector(Modality::Visual));
            let text_sim = text_q.map(|q| cosine_similarity(q, entry.vector(Modality::Text)));
            c.text_sim = text_sim.unwrap_or(0.0);
            c.fused_score = fuse(c.visual_sim, text_sim, w_txt);
            c.tag_sim = Some(cosine_similarity(tag_q, entry.vector(Modality::Tag)));
            Some(c)
        })
        .collect()
}

/// Exact re-score; within runs of fused scores closer than `tie_epsilon`,
/// higher tag similarity wins and the run's scores are re-spread to match.
#[derive(Debug, Clone)]
pub struct ExactRerank {
    pub tie_epsilon: f32,
}

impl Default for ExactRerank {
    fn default() -> Self {
        Self { tie_epsilon: 0.005 }
    }
}

#[async_trait]
impl Reranker for ExactRerank {
    fn name(&self) -> &'static str {
        "exact"
    }

    async fn rerank(
        &self,
        query: &QueryObservation,
        candidates: Vec<CandidateScore>,
        snapshot: Arc<IndexSnapshot>,
        w_txt: f32,
    ) -> Result<Vec<CandidateScore>, PartIdError> {
        let mut scored = rescore(query, candidates, &snapshot, w_txt);
        rank_candidates(&mut scored);

        // Group near-ties against the run leader, then order each run by tag.
        let mut start = 0;
        while start < scored.len() {
            let leader = scored[start].fused_score;
            let mut end = start + 1;
            while end < scored.len() && leader - scored[end].fused_score < self.tie_epsilon {
                end += 1;
            }
            scored[start..end].sort_by(|a, b| {
                b.tag_sim
                    .unwrap_or(0.0)
                    .partial_cmp(&a.tag_sim.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.key.cmp(&b.key))
            });
            spread_run(&mut scored[start..end], leader, self.tie_epsilon);
            start = end;
        }
        for (rank, c) in scored.iter_mut().enumerate() {
            c.rank = rank;
        }
        Ok(scored)
    }
}

/// Rewrite a near-tie run's fused scores so they strictly decrease in the
/// run's new order, so the assignment cost follows the tag tie-break.
///
/// Scores step down from `leader` by `tie_epsilon / len`, so every score
/// moves by less than `tie_epsilon` and stays above the next run's leader.
fn spread_run(run: &mut [CandidateScore], leader: f32, tie_epsilon: f32) {
    if run.len() < 2 {
        return;
    }
    let step = tie_epsilon / run.len() as f32;
    for (k, c) in run.iter_mut().enumerate() {
        c.fused_score = leader - step * k as f32;
    }
}

/// Adds `tag_weight * tag_sim` to every fused score.
#[derive(Debug, Clone)]
pub struct TagBlendRerank {
    pub tag_weight: f32,
}

#[async_trait]
impl Reranker for TagBlendRerank {
    fn name(&self) -> &'static str {
        "tag_blend"
    }

    async fn rerank(
        &self,
        query: &QueryObservation,
        candidates: Vec<CandidateScore>,
        snapshot: Arc<IndexSnapshot>,
        w_txt: f32,
    ) -> Result<Vec<CandidateScore>, PartIdError> {
        let mut scored = rescore(query, candidates, &snapshot, w_txt);
        for c in &mut scored {
            c.fused_score += self.tag_weight * c.tag_sim.unwrap_or(0.0);
        }
        rank_candidates(&mut scored);
        Ok(scored)
    }
}
