// crates/partid-core/src/feedback.rs
//
// QA feedback events, the persisted fusion-weight state, and hard templates.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::EntryKey;

/// Whether each single-modality ranking put the resolved entry first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModalityAgreement {
    pub text_agreed: bool,
    pub visual_agreed: bool,
}

/// One pass/fail signal from the QA Feedback Channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaFeedback {
    /// Observation id the resolution was made for.
    pub query_id: String,
    pub resolved: EntryKey,
    pub correct: bool,
    /// Filled in by the engine from its provenance cache when absent.
    #[serde(default)]
    pub agreement: Option<ModalityAgreement>,
    #[serde(default = "Utc::now")]
    pub at: DateTime<Utc>,
}

/// Numbers that justified a weight change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentEvidence {
    /// Decay-weighted accuracy of the text ranking.
    pub text_accuracy: f64,
    /// Decay-weighted accuracy of the visual ranking.
    pub visual_accuracy: f64,
    /// Effective (decay-weighted) sample count.
    pub samples: f64,
    /// Threshold the delta had to clear.
    pub required_delta: f64,
}

/// Audit record of one applied weight change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightAdjustment {
    pub at: DateTime<Utc>,
    pub from: f32,
    pub to: f32,
    pub evidence: AdjustmentEvidence,
}

/// The fusion weight and everything needed to audit how it got there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionWeightState {
    pub w_txt: f32,
    pub w_min: f32,
    pub w_max: f32,
    /// Rolling fraction of QA events marked correct.
    pub rolling_accuracy: f64,
    /// Feedback-triggered changes refused by the rate limit.
    pub rate_limited_events: u64,
    pub adjustments: Vec<WeightAdjustment>,
    pub updated_at: DateTime<Utc>,
}

impl FusionWeightState {
    /// Fresh state with `w_txt` clamped into its bounds.
    pub fn new(w_txt: f32, w_min: f32, w_max: f32) -> Self {
        Self {
            w_txt: w_txt.clamp(w_min, w_max),
            w_min,
            w_max,
            rolling_accuracy: 0.0,
            rate_limited_events: 0,
            adjustments: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Adjustments applied within `window` before `now`.
    pub fn adjustments_within(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let cutoff = now - window;
        self.adjustments.iter().filter(|a| a.at > cutoff).count()
    }
}

/// A pair of catalog entries the engine tends to confuse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardTemplate {
    /// Lexicographically smaller key of the pair.
    pub entry_a: EntryKey,
    pub entry_b: EntryKey,
    /// Margin seen at the most recent observation.
    pub observed_margin: f32,
    /// Smallest margin ever seen for this pair.
    pub min_margin: f32,
    pub observations: u64,
    /// Observation ids supporting the template (bounded).
    pub example_refs: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// What the controller did with one feedback event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FeedbackOutcome {
    /// Evidence recorded; no adjustment warranted yet.
    Recorded { w_txt: f32 },
    /// Evidence triggered a change that is now in effect.
    Adjusted { from: f32, to: f32 },
    /// Evidence warranted a change but the window budget is exhausted.
    RateLimited { w_txt: f32 },
    /// Feedback could not be tagged with modality agreement.
    Ignored { reason: String },
}
