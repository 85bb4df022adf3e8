// crates/partid-rpc/src/handlers/feedback.rs
//
// QA feedback and calibration handlers: SubmitFeedback, GetWeightState,
// ListTemplates.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use partid_core::{FeedbackOutcome, FusionWeightState, HardTemplate, QaFeedback};
use partid_engine::IdentificationEngine;

// ---------------------------------------------------------------------------
// SubmitFeedback
// ---------------------------------------------------------------------------

/// The QA event itself is the request body. `agreement` may be omitted when
/// `query_id` names an observation this engine resolved recently.
pub type SubmitFeedbackRequest = QaFeedback;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitFeedbackResponse {
    pub outcome: FeedbackOutcome,
    /// Weight in effect after the event.
    pub w_txt: f32,
}

pub async fn handle_submit_feedback(
    engine: &Arc<IdentificationEngine>,
    request: SubmitFeedbackRequest,
) -> Result<SubmitFeedbackResponse, String> {
    let outcome = engine
        .submit_feedback(request)
        .await
        .map_err(|e| format!("Feedback failed: {}", e))?;
    Ok(SubmitFeedbackResponse {
        outcome,
        w_txt: engine.get_weight_state().w_txt,
    })
}

// ---------------------------------------------------------------------------
// GetWeightState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetWeightStateRequest {
    /// Return at most this many of the most recent adjustments (default: all).
    #[serde(default)]
    pub max_adjustments: Option<usize>,
}

pub async fn handle_get_weight_state(
    engine: &Arc<IdentificationEngine>,
    request: GetWeightStateRequest,
) -> Result<FusionWeightState, String> {
    let mut state = engine.get_weight_state();
    if let Some(max) = request.max_adjustments {
        let skip = state.adjustments.len().saturating_sub(max);
        state.adjustments.drain(..skip);
    }
    Ok(state)
}

// ---------------------------------------------------------------------------
// ListTemplates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTemplatesRequest {
    /// Maximum templates to return (default 100).
    #[serde(default)]
    pub limit: Option<usize>,
    /// Only templates seen at least this many times.
    #[serde(default)]
    pub min_observations: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTemplatesResponse {
    pub templates: Vec<HardTemplate>,
    /// Templates matching the filter before `limit` was applied.
    pub total: usize,
}

pub async fn handle_list_templates(
    engine: &Arc<IdentificationEngine>,
    request: ListTemplatesRequest,
) -> Result<ListTemplatesResponse, String> {
    let min_obs = request.min_observations.unwrap_or(0);
    let mut templates: Vec<HardTemplate> = engine
        .get_hard_templates()
        .into_iter()
        .filter(|t| t.observations >= min_obs)
        .collect();
    let total = templates.len();
    templates.truncate(request.limit.unwrap_or(100));
    Ok(ListTemplatesResponse { templates, total })
}
