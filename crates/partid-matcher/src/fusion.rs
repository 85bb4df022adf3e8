// crates/partid-matcher/src/fusion.rs
//
// Stage 1: broad recall over the visual and text sub-indices, union, fill-in
// of the missing modality by exact lookup, and weighted fusion.

use std::collections::BTreeMap;

use partid_core::{
    rank_candidates, CandidateScore, EntryKey, Modality, QueryObservation,
};
use partid_store::IndexSnapshot;

/// Fused score for one candidate.
///
/// Without a text term the visual similarity stands alone.
pub fn fuse(visual_sim: f32, text_sim: Option<f32>, w_txt: f32) -> f32 {
    match text_sim {
        Some(t) => w_txt * t + (1.0 - w_txt) * visual_sim,
        None => visual_sim,
    }
}

/// Ranked shortlist from Stage 1 plus the single-modality winners.
#[derive(Debug, Clone)]
pub struct Stage1Result {
    /// Top-`k2` by fused score.
    pub candidates: Vec<CandidateScore>,
    pub visual_top: Option<EntryKey>,
    pub text_top: Option<EntryKey>,
    /// Weight actually applied (0 when the query has no text hint).
    pub w_txt: f32,
}

/// Run Stage 1 for one observation against one snapshot.
pub fn stage1(
    snapshot: &IndexSnapshot,
    observation: &QueryObservation,
    w_txt: f32,
    k1: usize,
    k2: usize,
) -> Stage1Result {
    let visual_q = observation.visual.as_slice();
    let text_q = observation.text_hint.as_ref().map(|h| h.as_slice());

    let visual_hits = snapshot.search(visual_q, k1, Modality::Visual);
    let text_hits = text_q
        .map(|q| snapshot.search(q, k1, Modality::Text))
        .unwrap_or_default();

    let visual_top = visual_hits.first().map(|h| h.key().clone());
    let text_top = text_hits.first().map(|h| h.key().clone());

    // key -> (visual_sim, text_sim)
    let mut union: BTreeMap<EntryKey, (Option<f32>, Option<f32>)> = BTreeMap::new();
    for hit in &visual_hits {
        union.entry(hit.key().clone()).or_default().0 = Some(hit.similarity);
    }
    for hit in &text_hits {
        union.entry(hit.key().clone()).or_default().1 = Some(hit.similarity);
    }

    let mut candidates: Vec<CandidateScore> = union
        .into_iter()
        .filter_map(|(key, (v, t))| {
            let visual_sim = match v {
                Some(v) => v,
                None => snapshot.similarity(&key, visual_q, Modality::Visual)?,
            };
            let text_sim = match (t, text_q) {
                (Some(t), _) => Some(t),
                (None, Some(q)) => snapshot.similarity(&key, q, Modality::Text),
                (None, None) => None,
            };
            Some(CandidateScore {
                fused_score: fuse(visual_sim, text_sim, w_txt),
                key,
                visual_sim,
                text_sim: text_sim.unwrap_or(0.0),
                rank: 0,
                tag_sim: None,
            })
        })
        .collect();

    rank_candidates(&mut candidates);
    candidates.truncate(k2);

    Stage1Result {
        candidates,
        visual_top,
        text_top,
        w_txt: if text_q.is_some() { w_txt } else { 0.0 },
    }
}
