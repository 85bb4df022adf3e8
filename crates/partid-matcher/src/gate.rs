// crates/partid-matcher/src/gate.rs
//
// Ambiguity gate: decides whether a Stage-1 result goes to Stage 2.
//
// The margin threshold is self-tightening. Over the last `window` decisions,
// if the Stage-2 entry rate exceeds `stage2_budget` the threshold is
// multiplied by `tighten_factor` (never below `min_margin_threshold`); once
// the rate falls under half the budget it is divided back toward
// `base_margin_threshold`. Hence:
//   - margin < min_margin_threshold            -> always Stage 2
//   - margin >= base_margin_threshold * bias,
//     top-1 >= confidence_floor                 -> never Stage 2

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Margin threshold when the Stage-2 budget is not under pressure.
    #[serde(default = "default_base_margin_threshold")]
    pub base_margin_threshold: f32,
    /// Floor the threshold may tighten down to.
    #[serde(default = "default_min_margin_threshold")]
    pub min_margin_threshold: f32,
    /// Top-1 fused scores below this always enter Stage 2.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,
    /// Threshold multiplier applied when the top pair is a known hard pair.
    #[serde(default = "default_hard_pair_bias")]
    pub hard_pair_bias: f32,
    /// Target ceiling on the rolling Stage-2 entry rate.
    #[serde(default = "default_stage2_budget")]
    pub stage2_budget: f64,
    /// Number of recent decisions the rolling rate covers.
    #[serde(default = "default_window")]
    pub window: usize,
    /// Decisions needed before the threshold starts adapting.
    #[serde(default = "default_warmup")]
    pub warmup: usize,
    #[serde(default = "default_tighten_factor")]
    pub tighten_factor: f32,
}

fn default_base_margin_threshold() -> f32 {
    0.05
}

fn default_min_margin_threshold() -> f32 {
    0.01
}

fn default_confidence_floor() -> f32 {
    0.5
}

fn default_hard_pair_bias() -> f32 {
    1.5
}

fn default_stage2_budget() -> f64 {
    0.25
}

fn default_window() -> usize {
    200
}

fn default_warmup() -> usize {
    20
}

fn default_tighten_factor() -> f32 {
    0.9
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            base_margin_threshold: default_base_margin_threshold(),
            min_margin_threshold: default_min_margin_threshold(),
            confidence_floor: default_confidence_floor(),
            hard_pair_bias: default_hard_pair_bias(),
            stage2_budget: default_stage2_budget(),
            window: default_window(),
            warmup: default_warmup(),
            tighten_factor: default_tighten_factor(),
        }
    }
}

/// Why a query was (or was not) sent to Stage 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    Confident,
    LowMargin,
    LowConfidence,
    HardPair,
    NoCandidates,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateDecision {
    pub enter_stage2: bool,
    pub reason: GateReason,
    /// Threshold in force when the decision was made.
    pub threshold: f32,
}

#[derive(Debug)]
struct GateState {
    threshold: f32,
    recent: VecDeque<bool>,
    entered_in_window: usize,
}

/// Thread-safe ambiguity gate with a self-tightening threshold.
#[derive(Debug)]
pub struct AmbiguityGate {
    config: GateConfig,
    state: Mutex<GateState>,
}

impl AmbiguityGate {
    pub fn new(config: GateConfig) -> Self {
        let threshold = config
            .base_margin_threshold
            .max(config.min_margin_threshold);
        Self {
            state: Mutex::new(GateState {
                threshold,
                recent: VecDeque::with_capacity(config.window),
                entered_in_window: 0,
            }),
            config,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Decide for one query and record the decision in the rolling window.
    ///
    /// `candidates` is the number of Stage-1 candidates; with none there is
    /// nothing to re-rank.
    pub fn decide(
        &self,
        candidates: usize,
        margin: f32,
        top_score: f32,
        hard_pair: bool,
    ) -> GateDecision {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let threshold = state.threshold;

        let (enter_stage2, reason) = if candidates == 0 {
            (false, GateReason::NoCandidates)
        } else if candidates > 1 && margin < threshold {
            (true, GateReason::LowMargin)
        } else if top_score < self.config.confidence_floor {
            (true, GateReason::LowConfidence)
        } else if candidates > 1 && hard_pair && margin < threshold * self.config.hard_pair_bias {
            (true, GateReason::HardPair)
        } else {
            (false, GateReason::Confident)
        };

        if candidates > 0 {
            self.record(&mut state, enter_stage2);
        }

        GateDecision {
            enter_stage2,
            reason,
            threshold,
        }
    }

    fn record(&self, state: &mut GateState, entered: bool) {
        state.recent.push_back(entered);
        if entered {
            state.entered_in_window += 1;
        }
        while state.recent.len() > self.config.window.max(1) {
            if state.recent.pop_front() == Some(true) {
                state.entered_in_window -= 1;
            }
        }
        if state.recent.len() < self.config.warmup {
            return;
        }

        let rate = state.entered_in_window as f64 / state.recent.len() as f64;
        let before = state.threshold;
        if rate > self.config.stage2_budget {
            state.threshold =
                (state.threshold * self.config.tighten_factor).max(self.config.min_margin_threshold);
        } else if rate < self.config.stage2_budget / 2.0 {
            state.threshold =
                (state.threshold / self.config.tighten_factor).min(self.config.base_margin_threshold);
        }
        if (state.threshold - before).abs() > f32::EPSILON {
            tracing::debug!(
                rate,
                from = before,
                to = state.threshold,
                "Stage-2 margin threshold adapted"
            );
        }
    }

    /// Current margin threshold.
    pub fn threshold(&self) -> f32 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .threshold
    }

    /// Stage-2 entry rate over the rolling window.
    pub fn rolling_rate(&self) -> f64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.recent.is_empty() {
            0.0
        } else {
            state.entered_in_window as f64 / state.recent.len() as f64
        }
    }
}
