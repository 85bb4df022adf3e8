// crates/partid-core/src/observation.rs
//
// Per-detection query types and the ranked candidates produced for them.

use serde::{Deserialize, Serialize};

use crate::catalog::EntryKey;
use crate::embedding::Embedding;
use crate::error::PartIdError;

/// Axis-aligned crop rectangle in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One detection instance from the Detector Service.
///
/// Ephemeral: created per inference call, discarded after assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryObservation {
    pub observation_id: String,
    pub image_id: String,
    #[serde(default)]
    pub crop_bbox: Option<BoundingBox>,
    /// Crop embedding.
    pub visual: Embedding,
    /// Optional textual hint (OCR label, operator note) embedding.
    #[serde(default)]
    pub text_hint: Option<Embedding>,
    pub detector_confidence: f32,
}

impl QueryObservation {
    /// Validate the observation against the store dimension.
    pub fn validate(&self, dimension: usize) -> Result<(), PartIdError> {
        self.visual.check_dimension(dimension)?;
        if let Some(hint) = &self.text_hint {
            hint.check_dimension(dimension)?;
        }
        if !(0.0..=1.0).contains(&self.detector_confidence) {
            return Err(PartIdError::InvalidState(format!(
                "detector confidence {} outside [0, 1]",
                self.detector_confidence
            )));
        }
        Ok(())
    }
}

/// Score of one catalog entry for one query at one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub key: EntryKey,
    pub visual_sim: f32,
    pub text_sim: f32,
    /// `w_txt * text_sim + (1 - w_txt) * visual_sim`, or the Stage-2 score.
    pub fused_score: f32,
    /// 0-based position in the ranked list.
    pub rank: usize,
    /// Semantic-tag similarity, filled in by Stage 2 only.
    #[serde(default)]
    pub tag_sim: Option<f32>,
}

/// Sort candidates by fused score descending (key ascending on ties) and
/// renumber their ranks.
pub fn rank_candidates(candidates: &mut [CandidateScore]) {
    candidates.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
    for (rank, c) in candidates.iter_mut().enumerate() {
        c.rank = rank;
    }
}

/// Gap between the top two fused scores; the top score itself when only one
/// candidate exists, 0.0 when there are none.
pub fn top_margin(candidates: &[CandidateScore]) -> f32 {
    match candidates {
        [] => 0.0,
        [only] => only.fused_score,
        [first, second, ..] => first.fused_score - second.fused_score,
    }
}

/// How a query left the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Unambiguous after broad recall.
    Stage1,
    /// Ambiguous, re-ranked by the heavier comparison.
    Stage2,
    /// Ambiguous, but Stage 2 timed out or failed; Stage-1 ranking used.
    Degraded,
}

/// Matcher output for one observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub observation_id: String,
    /// Final ranked candidate list (length ≤ K2).
    pub candidates: Vec<CandidateScore>,
    /// Top-1/top-2 fused margin of `candidates`.
    pub margin: f32,
    pub resolution: Resolution,
    pub degraded: bool,
    /// Fusion weight this query was scored with.
    pub w_txt: f32,
    /// Entry ranked first by visual similarity alone.
    pub visual_top: Option<EntryKey>,
    /// Entry ranked first by text similarity alone (None without a hint).
    pub text_top: Option<EntryKey>,
}

impl MatchOutcome {
    pub fn top(&self) -> Option<&CandidateScore> {
        self.candidates.first()
    }

    pub fn entered_stage2(&self) -> bool {
        matches!(self.resolution, Resolution::Stage2 | Resolution::Degraded)
    }
}
