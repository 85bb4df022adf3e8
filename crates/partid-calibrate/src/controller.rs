// crates/partid-calibrate/src/controller.rs
//
// Fusion Weight Controller.
//
// Readers get `w_txt` from an atomically swapped `FusionWeightState`. One
// writer at a time (a tokio mutex) folds a feedback event into the evidence
// window and decides whether to step the weight. Every state change, weight or
// bookkeeping, is written through persistence first and published only if the
// write succeeded.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use partid_core::{
    AdjustmentEvidence, FeedbackOutcome, FusionWeightState, PartIdError, QaFeedback,
    WeightAdjustment, WeightStatePersistence,
};

use crate::evidence::{EvidenceEvent, EvidenceWindow};

/// Controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Starting weight when nothing is persisted.
    #[serde(default = "default_initial_w_txt")]
    pub initial_w_txt: f32,
    #[serde(default = "default_w_min")]
    pub w_min: f32,
    #[serde(default = "default_w_max")]
    pub w_max: f32,
    /// Size of one adjustment.
    #[serde(default = "default_step")]
    pub step: f32,
    /// Effective samples required before any adjustment.
    #[serde(default = "default_min_samples")]
    pub min_samples: f64,
    /// Minimum accuracy gap between modalities.
    #[serde(default = "default_delta_threshold")]
    pub delta_threshold: f64,
    /// Standard errors the gap must also clear.
    #[serde(default = "default_z")]
    pub z: f64,
    #[serde(default = "default_evidence_half_life_secs")]
    pub evidence_half_life_secs: i64,
    /// Events older than this are dropped.
    #[serde(default = "default_evidence_window_secs")]
    pub evidence_window_secs: i64,
    #[serde(default = "default_max_adjustments_per_window")]
    pub max_adjustments_per_window: usize,
    #[serde(default = "default_adjustment_window_secs")]
    pub adjustment_window_secs: i64,
    /// Smoothing factor for `rolling_accuracy`.
    #[serde(default = "default_accuracy_smoothing")]
    pub accuracy_smoothing: f64,
    /// Audit entries retained in the state.
    #[serde(default = "default_max_audit_entries")]
    pub max_audit_entries: usize,
}

fn default_initial_w_txt() -> f32 {
    0.3
}

fn default_w_min() -> f32 {
    0.1
}

fn default_w_max() -> f32 {
    0.6
}

fn default_step() -> f32 {
    0.02
}

fn default_min_samples() -> f64 {
    30.0
}

fn default_delta_threshold() -> f64 {
    0.05
}

fn default_z() -> f64 {
    2.0
}

fn default_evidence_half_life_secs() -> i64 {
    6 * 3600
}

fn default_evidence_window_secs() -> i64 {
    72 * 3600
}

fn default_max_adjustments_per_window() -> usize {
    3
}

fn default_adjustment_window_secs() -> i64 {
    24 * 3600
}

fn default_accuracy_smoothing() -> f64 {
    0.05
}

fn default_max_audit_entries() -> usize {
    256
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            initial_w_txt: default_initial_w_txt(),
            w_min: default_w_min(),
            w_max: default_w_max(),
            step: default_step(),
            min_samples: default_min_samples(),
            delta_threshold: default_delta_threshold(),
            z: default_z(),
            evidence_half_life_secs: default_evidence_half_life_secs(),
            evidence_window_secs: default_evidence_window_secs(),
            max_adjustments_per_window: default_max_adjustments_per_window(),
            adjustment_window_secs: default_adjustment_window_secs(),
            accuracy_smoothing: default_accuracy_smoothing(),
            max_audit_entries: default_max_audit_entries(),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), PartIdError> {
        if !(0.0..=1.0).contains(&self.w_min)
            || !(0.0..=1.0).contains(&self.w_max)
            || self.w_min > self.w_max
        {
            return Err(PartIdError::Config(format!(
                "weight bounds [{}, {}] must satisfy 0 <= w_min <= w_max <= 1",
                self.w_min, self.w_max
            )));
        }
        if self.step <= 0.0 {
            return Err(PartIdError::Config("step must be positive".to_string()));
        }
        // The rate limit counts adjustments in the audit log.
        if self.max_audit_entries < self.max_adjustments_per_window {
            return Err(PartIdError::Config(format!(
                "max_audit_entries ({}) must be at least max_adjustments_per_window ({})",
                self.max_audit_entries, self.max_adjustments_per_window
            )));
        }
        Ok(())
    }

    fn adjustment_window(&self) -> Duration {
        Duration::seconds(self.adjustment_window_secs)
    }
}

pub struct FusionWeightController {
    config: ControllerConfig,
    state: ArcSwap<FusionWeightState>,
    evidence: Mutex<EvidenceWindow>,
    persistence: Option<Arc<dyn WeightStatePersistence>>,
}

impl std::fmt::Debug for FusionWeightController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FusionWeightController")
            .field("w_txt", &self.current_weight())
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}

impl FusionWeightController {
    /// Restore the persisted state if there is one, else start from config.
    ///
    /// A restored weight is re-clamped to the configured bounds.
    pub fn new(
        config: ControllerConfig,
        persistence: Option<Arc<dyn WeightStatePersistence>>,
    ) -> Result<Self, PartIdError> {
        config.validate()?;
        let restored = match &persistence {
            Some(p) => p.load_weight_state()?,
            None => None,
        };
        let state = match restored {
            Some(mut s) => {
                s.w_min = config.w_min;
                s.w_max = config.w_max;
                s.w_txt = s.w_txt.clamp(config.w_min, config.w_max);
                tracing::info!(w_txt = s.w_txt, "Fusion weight restored");
                s
            }
            None => FusionWeightState::new(config.initial_w_txt, config.w_min, config.w_max),
        };

        Ok(Self {
            config,
            state: ArcSwap::from_pointee(state),
            evidence: Mutex::new(EvidenceWindow::new()),
            persistence,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// The weight new queries should use.
    pub fn current_weight(&self) -> f32 {
        self.state.load().w_txt
    }

    pub fn state(&self) -> Arc<FusionWeightState> {
        self.state.load_full()
    }

    pub fn adjustments_last_window(&self) -> usize {
        self.state
            .load()
            .adjustments_within(Utc::now(), self.config.adjustment_window())
    }

    pub async fn submit(&self, feedback: &QaFeedback) -> Result<FeedbackOutcome, PartIdError> {
        self.submit_at(feedback, Utc::now()).await
    }

    /// Fold one feedback event in, judging rate limits as of `now`.
    pub async fn submit_at(
        &self,
        feedback: &QaFeedback,
        now: DateTime<Utc>,
    ) -> Result<FeedbackOutcome, PartIdError> {
        let Some(agreement) = feedback.agreement else {
            return Ok(FeedbackOutcome::Ignored {
                reason: format!("no modality agreement for query {}", feedback.query_id),
            });
        };

        let mut evidence = self.evidence.lock().await;
        evidence.push(EvidenceEvent {
            at: feedback.at,
            text_scored: agreement.text_agreed == feedback.correct,
            visual_scored: agreement.visual_agreed == feedback.correct,
        });
        evidence.expire(now, Duration::seconds(self.config.evidence_window_secs));

        let current = self.state.load_full();
        let mut next = (*current).clone();
        let alpha = self.config.accuracy_smoothing;
        let hit = if feedback.correct { 1.0 } else { 0.0 };
        next.rolling_accuracy = (1.0 - alpha) * current.rolling_accuracy + alpha * hit;
        next.updated_at = now;

        let summary = evidence.summarize(now, Duration::seconds(self.config.evidence_half_life_secs));
        let required_delta = self
            .config
            .delta_threshold
            .max(self.config.z * summary.standard_error);
        let warranted = summary.effective_samples >= self.config.min_samples
            && summary.delta().abs() > required_delta;

        if !warranted {
            self.persist(&next)?;
            self.state.store(Arc::new(next));
            return Ok(FeedbackOutcome::Recorded {
                w_txt: current.w_txt,
            });
        }

        let used = current.adjustments_within(now, self.config.adjustment_window());
        if used >= self.config.max_adjustments_per_window {
            next.rate_limited_events += 1;
            tracing::warn!(
                w_txt = current.w_txt,
                delta = summary.delta(),
                adjustments = used,
                "{}",
                PartIdError::RateLimited(format!(
                    "{} adjustments in the last {}s",
                    used, self.config.adjustment_window_secs
                ))
            );
            self.persist(&next)?;
            self.state.store(Arc::new(next));
            return Ok(FeedbackOutcome::RateLimited {
                w_txt: current.w_txt,
            });
        }

        let direction = if summary.delta() > 0.0 { 1.0 } else { -1.0 };
        let from = current.w_txt;
        let to = (from + direction * self.config.step).clamp(self.config.w_min, self.config.w_max);

        if (to - from).abs() < f32::EPSILON {
            evidence.clear();
            tracing::debug!(w_txt = from, "Weight already at bound; evidence consumed");
            self.persist(&next)?;
            self.state.store(Arc::new(next));
            return Ok(FeedbackOutcome::Recorded { w_txt: from });
        }

        next.w_txt = to;
        next.adjustments.push(WeightAdjustment {
            at: now,
            from,
            to,
            evidence: AdjustmentEvidence {
                text_accuracy: summary.text_accuracy,
                visual_accuracy: summary.visual_accuracy,
                samples: summary.effective_samples,
                required_delta,
            },
        });
        let excess = next
            .adjustments
            .len()
            .saturating_sub(self.config.max_audit_entries);
        next.adjustments.drain(..excess);

        self.persist(&next)?;
        self.state.store(Arc::new(next));
        evidence.clear();
        tracing::info!(
            from,
            to,
            text_accuracy = summary.text_accuracy,
            visual_accuracy = summary.visual_accuracy,
            samples = summary.effective_samples,
            "Fusion weight adjusted"
        );
        Ok(FeedbackOutcome::Adjusted { from, to })
    }

    fn persist(&self, state: &FusionWeightState) -> Result<(), PartIdError> {
        match &self.persistence {
            Some(p) => p.save_weight_state(state).map_err(|e| {
                tracing::warn!(error = %e, "Weight state not persisted; keeping previous weight");
                e
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partid_core::{EntryKey, ModalityAgreement};
    use partid_store::MemoryPersistence;

    /// Feedback where text was right and visual wrong.
    fn text_wins(at: DateTime<Utc>, i: usize) -> QaFeedback {
        QaFeedback {
            query_id: format!("q{i}"),
            resolved: EntryKey::new("A", "std"),
            correct: true,
            agreement: Some(ModalityAgreement {
                text_agreed: true,
                visual_agreed: false,
            }),
            at,
        }
    }

    fn fast_config() -> ControllerConfig {
        ControllerConfig {
            min_samples: 10.0,
            ..ControllerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_untagged_feedback_ignored() {
        let c = FusionWeightController::new(ControllerConfig::default(), None).unwrap();
        let mut fb = text_wins(Utc::now(), 0);
        fb.agreement = None;
        assert!(matches!(
            c.submit(&fb).await.unwrap(),
            FeedbackOutcome::Ignored { .. }
        ));
    }

    #[tokio::test]
    async fn test_consistent_text_advantage_raises_weight() {
        let c = FusionWeightController::new(fast_config(), None).unwrap();
        let now = Utc::now();
        let mut adjusted = None;
        for i in 0..20 {
            if let FeedbackOutcome::Adjusted { from, to } =
                c.submit_at(&text_wins(now, i), now).await.unwrap()
            {
                adjusted = Some((from, to));
                break;
            }
        }
        let (from, to) = adjusted.expect("expected an adjustment");
        assert!((to - from - 0.02).abs() < 1e-6);
        assert!((c.current_weight() - 0.32).abs() < 1e-6);
        assert_eq!(c.state().adjustments.len(), 1);
    }

    #[tokio::test]
    async fn test_balanced_evidence_never_adjusts() {
        let c = FusionWeightController::new(fast_config(), None).unwrap();
        let now = Utc::now();
        for i in 0..200 {
            let mut fb = text_wins(now, i);
            fb.agreement = Some(ModalityAgreement {
                text_agreed: i % 2 == 0,
                visual_agreed: i % 2 == 0,
            });
            let out = c.submit_at(&fb, now).await.unwrap();
            assert!(matches!(out, FeedbackOutcome::Recorded { .. }));
        }
        assert!((c.current_weight() - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_thousand_events_in_a_day_stay_bounded_and_rate_limited() {
        let persistence = Arc::new(MemoryPersistence::new());
        let c = FusionWeightController::new(fast_config(), Some(persistence.clone())).unwrap();
        let start = Utc::now();
        let mut rate_limited = 0;
        for i in 0..1_000 {
            let at = start + Duration::seconds(i as i64 * 86); // spread over ~24h
            let out = c.submit_at(&text_wins(at, i), at).await.unwrap();
            if matches!(out, FeedbackOutcome::RateLimited { .. }) {
                rate_limited += 1;
            }
            let w = c.current_weight();
            assert!((0.1..=0.6).contains(&w));
        }
        let state = c.state();
        let end = start + Duration::seconds(999 * 86);
        assert!(state.adjustments_within(end, Duration::hours(24)) <= 3);
        assert_eq!(state.adjustments.len(), 3);
        assert!(rate_limited > 0);
        assert_eq!(state.rate_limited_events, rate_limited);
        // The persisted copy matches what readers see.
        let saved = persistence.load_weight_state().unwrap().unwrap();
        assert!((saved.w_txt - state.w_txt).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_weight_clamped_at_bound() {
        let config = ControllerConfig {
            initial_w_txt: 0.6,
            ..fast_config()
        };
        let c = FusionWeightController::new(config, None).unwrap();
        let now = Utc::now();
        for i in 0..100 {
            let out = c.submit_at(&text_wins(now, i), now).await.unwrap();
            assert!(!matches!(out, FeedbackOutcome::Adjusted { .. }));
        }
        assert!((c.current_weight() - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_old_weight() {
        let persistence = Arc::new(MemoryPersistence::new());
        let c = FusionWeightController::new(fast_config(), Some(persistence.clone())).unwrap();
        persistence.set_fail_writes(true);
        let now = Utc::now();
        let mut saw_error = false;
        for i in 0..20 {
            if c.submit_at(&text_wins(now, i), now).await.is_err() {
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);
        assert!((c.current_weight() - 0.3).abs() < 1e-6);
        assert!(c.state().adjustments.is_empty());
    }

    #[tokio::test]
    async fn test_restores_persisted_weight() {
        let persistence = Arc::new(MemoryPersistence::new());
        persistence
            .save_weight_state(&FusionWeightState::new(0.45, 0.1, 0.6))
            .unwrap();
        let c = FusionWeightController::new(ControllerConfig::default(), Some(persistence)).unwrap();
        assert!((c.current_weight() - 0.45).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_recorded_feedback_is_persisted() {
        let persistence = Arc::new(MemoryPersistence::new());
        let c = FusionWeightController::new(fast_config(), Some(persistence.clone())).unwrap();
        let now = Utc::now();
        let out = c.submit_at(&text_wins(now, 0), now).await.unwrap();
        assert!(matches!(out, FeedbackOutcome::Recorded { .. }));

        let state = c.state();
        assert!((state.rolling_accuracy - 0.05).abs() < 1e-9);
        let saved = persistence.load_weight_state().unwrap().unwrap();
        assert!((saved.rolling_accuracy - state.rolling_accuracy).abs() < 1e-12);
        assert_eq!(saved.updated_at, now);
    }

    #[test]
    fn test_audit_log_shorter_than_rate_limit_rejected() {
        let config = ControllerConfig {
            max_audit_entries: 2,
            max_adjustments_per_window: 3,
            ..ControllerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PartIdError::Config(_))
        ));
        let config = ControllerConfig {
            max_audit_entries: 3,
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let config = ControllerConfig {
            w_min: 0.7,
            w_max: 0.2,
            ..ControllerConfig::default()
        };
        assert!(FusionWeightController::new(config, None).is_err());
    }
}
