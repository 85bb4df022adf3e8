// crates/partid-matcher/src/lib.rs
//
// partid-matcher: the Two-Stage Matcher.
//
// Stage 1 searches the visual and text sub-indices, fuses the two
// similarities with the current text weight, and keeps a short list. An
// ambiguity gate with a self-tightening margin threshold decides whether the
// short list goes to Stage 2, a pluggable re-ranker run under a deadline.

pub mod fusion;
pub mod gate;
pub mod matcher;
pub mod rerank;

pub use fusion::{fuse, stage1, Stage1Result};
pub use gate::{AmbiguityGate, GateConfig, GateDecision, GateReason};
pub use matcher::{MatcherConfig, MatcherStats, TwoStageMatcher};
pub use rerank::{ExactRerank, RerankStrategy, Reranker, TagBlendRerank};
