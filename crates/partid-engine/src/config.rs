// crates/partid-engine/src/config.rs
//
// Engine configuration: one table per component plus engine-level knobs.

use serde::{Deserialize, Serialize};

use partid_assign::SolverConfig;
use partid_calibrate::{ControllerConfig, MinerConfig};
use partid_core::PartIdError;
use partid_matcher::MatcherConfig;
use partid_store::AnnConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Embedding dimension shared by all catalog and query vectors.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Re-solve attempts after a ledger commit conflict.
    #[serde(default = "default_max_commit_retries")]
    pub max_commit_retries: u32,
    /// Queries remembered for tagging late QA feedback.
    #[serde(default = "default_provenance_capacity")]
    pub provenance_capacity: usize,
    /// Entries unmatched for longer than this are pruned.
    #[serde(default = "default_prune_max_age_secs")]
    pub prune_max_age_secs: Option<i64>,
    /// Catalog size cap applied by pruning.
    #[serde(default)]
    pub prune_max_size: Option<usize>,
    #[serde(default)]
    pub ann: AnnConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub miner: MinerConfig,
}

fn default_dimension() -> usize {
    512
}

fn default_max_commit_retries() -> u32 {
    3
}

fn default_provenance_capacity() -> usize {
    10_000
}

fn default_prune_max_age_secs() -> Option<i64> {
    Some(90 * 24 * 3600)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            max_commit_retries: default_max_commit_retries(),
            provenance_capacity: default_provenance_capacity(),
            prune_max_age_secs: default_prune_max_age_secs(),
            prune_max_size: None,
            ann: AnnConfig::default(),
            matcher: MatcherConfig::default(),
            solver: SolverConfig::default(),
            controller: ControllerConfig::default(),
            miner: MinerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults with a different embedding dimension.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), PartIdError> {
        if self.dimension == 0 {
            return Err(PartIdError::Config("dimension must be positive".to_string()));
        }
        if self.matcher.k1 == 0 || self.matcher.k2 == 0 {
            return Err(PartIdError::Config("k1 and k2 must be positive".to_string()));
        }
        if self.matcher.k2 > self.matcher.k1 * 2 {
            return Err(PartIdError::Config(format!(
                "k2 ({}) cannot exceed the Stage-1 union size 2*k1 ({})",
                self.matcher.k2,
                self.matcher.k1 * 2
            )));
        }
        if self.miner.mining_threshold > self.matcher.gate.base_margin_threshold {
            return Err(PartIdError::Config(format!(
                "mining_threshold ({}) must not exceed the gate margin threshold ({})",
                self.miner.mining_threshold, self.matcher.gate.base_margin_threshold
            )));
        }
        if !self.solver.unmatched_penalty.is_finite() || self.solver.unmatched_penalty <= 2.0 {
            return Err(PartIdError::Config(
                "unmatched_penalty must be finite and greater than any pairing cost".to_string(),
            ));
        }
        self.controller.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        EngineConfig::default().validate().unwrap();
        assert_eq!(EngineConfig::default().matcher.k1, 50);
        assert_eq!(EngineConfig::default().matcher.k2, 5);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            dimension = 64

            [matcher]
            k2 = 3

            [matcher.gate]
            stage2_budget = 0.2

            [controller]
            w_max = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.dimension, 64);
        assert_eq!(config.matcher.k1, 50);
        assert_eq!(config.matcher.k2, 3);
        assert!((config.matcher.gate.stage2_budget - 0.2).abs() < 1e-9);
        assert!((config.controller.w_max - 0.5).abs() < 1e-6);
        assert_eq!(config.max_commit_retries, 3);
        config.validate().unwrap();
    }

    #[test]
    fn test_mining_threshold_above_gate_rejected() {
        let mut config = EngineConfig::default();
        config.miner.mining_threshold = 0.2;
        assert!(config.validate().is_err());
    }
}
