// crates/partid-calibrate/src/lib.rs
//
// partid-calibrate: feedback-driven calibration.
//
// The Fusion Weight Controller keeps the text/visual fusion weight inside its
// bounds from QA feedback, rate limited and persisted before it takes effect.
// The Hard-Case Miner records confusable entry pairs.

pub mod controller;
pub mod evidence;
pub mod miner;

pub use controller::{ControllerConfig, FusionWeightController};
pub use evidence::{decay_weight, EvidenceEvent, EvidenceSummary, EvidenceWindow};
pub use miner::{HardCaseMiner, MinerConfig};
