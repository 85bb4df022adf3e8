// crates/partid-core/src/lib.rs
//
// partid-core: Core types, traits, and vector math for the PartID engine.
//
// This is the leaf crate that all other crates in the workspace depend on.
// It defines the catalog and query data model, the assignment result, the
// fusion-weight state, the error taxonomy, and the persistence seams.

pub mod assignment;
pub mod catalog;
pub mod embedding;
pub mod error;
pub mod feedback;
pub mod observation;
pub mod traits;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use partid_core::CatalogEntry;`

pub use assignment::{Assignment, AssignmentResult, UnresolvedObservation, UnresolvedReason};
pub use catalog::{CatalogEntry, EntryKey, EntryUsage, Modality};
pub use embedding::{cosine_similarity, hash_embedding, Embedding, NORM_TOLERANCE};
pub use error::PartIdError;
pub use feedback::{
    AdjustmentEvidence, FeedbackOutcome, FusionWeightState, HardTemplate, ModalityAgreement,
    QaFeedback, WeightAdjustment,
};
pub use observation::{
    rank_candidates, top_margin, BoundingBox, CandidateScore, MatchOutcome, QueryObservation,
    Resolution,
};
pub use traits::{CatalogPersistence, HardPairOracle, WeightStatePersistence};
