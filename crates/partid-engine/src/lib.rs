// crates/partid-engine/src/lib.rs
//
// partid-engine: the PartID identification engine.
//
// Wires the Vector Store, Two-Stage Matcher, Inventory Constraint Module,
// Assignment Solver, Fusion Weight Controller and Hard-Case Miner behind one
// `IdentificationEngine`.

pub mod config;
pub mod engine;
pub mod metrics;
pub mod provenance;

pub use config::EngineConfig;
pub use engine::IdentificationEngine;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use provenance::{Provenance, ProvenanceCache};

// Re-export component types callers need to drive the engine.
pub use partid_inventory::{BomLine, BomSnapshot, JobStats, LedgerLine, LedgerReport};
pub use partid_store::{PruneReport, StoreStats};
