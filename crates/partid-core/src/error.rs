// crates/partid-core/src/error.rs

use thiserror::Error;

use crate::catalog::EntryKey;

/// Engine-wide error types for PartID.
///
/// Several variants are informational: `AmbiguousMatch`, `SolverInfeasible`
/// and `RateLimited` describe outcomes that the engine handles internally
/// (Stage-2 routing, partial results, refused weight changes). They exist so
/// telemetry and logs can name them with the same vocabulary.
#[derive(Debug, Error)]
pub enum PartIdError {
    /// Embedding length disagrees with the configured store dimension.
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Embedding is not L2-normalized or contains non-finite values.
    #[error("Invalid embedding: {0}")]
    InvalidEmbedding(String),

    /// Top-1/top-2 margin too small to resolve in Stage 1.
    #[error("Ambiguous match for observation {observation_id}: margin {margin:.4}")]
    AmbiguousMatch { observation_id: String, margin: f32 },

    /// Candidate filtered out because its BOM capacity is used up.
    #[error("Inventory exhausted for {key}")]
    InventoryExhausted { key: EntryKey },

    /// A ledger commit found less capacity than the assignment needs.
    #[error("Commit conflict in job {job_id}: {key} needs {needed}, {available} remaining")]
    CommitConflict {
        job_id: String,
        key: EntryKey,
        needed: u32,
        available: u32,
    },

    /// More observations than catalog capacity.
    #[error("Solver infeasible: {observations} observations, {capacity} capacity slots")]
    SolverInfeasible { observations: usize, capacity: usize },

    /// Weight controller adjustment budget exhausted.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Resource not found (job, entry, query).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid state transition or request.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Persistence layer error (RocksDB, in-memory store).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for PartIdError {
    fn from(e: serde_json::Error) -> Self {
        PartIdError::Serialization(e.to_string())
    }
}
