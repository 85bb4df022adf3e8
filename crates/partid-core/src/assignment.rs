// crates/partid-core/src/assignment.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::EntryKey;

/// One matched (observation, entry) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub observation_id: String,
    pub key: EntryKey,
    /// `1 - fused_score`.
    pub cost: f64,
    pub fused_score: f32,
}

/// Why an observation was left without an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// No candidate survived search and inventory filtering.
    NoCandidates,
    /// Candidates existed but their capacity went to lower-cost pairings.
    CapacityExhausted,
    /// The observation failed validation (e.g. dimension mismatch).
    InvalidObservation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedObservation {
    pub observation_id: String,
    pub reason: UnresolvedReason,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Partial bijection from an image's observations to catalog entries.
///
/// Every input observation appears exactly once, either in `assignments` or
/// in `unresolved`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentResult {
    pub job_id: String,
    pub image_id: String,
    pub assignments: Vec<Assignment>,
    pub unresolved: Vec<UnresolvedObservation>,
    /// Sum of `cost` over `assignments`.
    pub objective: f64,
    /// Observations whose Stage 2 timed out and fell back to Stage 1.
    #[serde(default)]
    pub degraded_observations: Vec<String>,
    /// Ledger commit attempts used (1 unless a conflict forced a re-solve).
    #[serde(default)]
    pub commit_attempts: u32,
}

impl AssignmentResult {
    pub fn empty(job_id: &str, image_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            image_id: image_id.to_string(),
            assignments: Vec::new(),
            unresolved: Vec::new(),
            objective: 0.0,
            degraded_observations: Vec::new(),
            commit_attempts: 0,
        }
    }

    /// How many units of each entry this result consumes.
    pub fn multiplicity(&self) -> BTreeMap<EntryKey, u32> {
        let mut counts = BTreeMap::new();
        for a in &self.assignments {
            *counts.entry(a.key.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn assignment_for(&self, observation_id: &str) -> Option<&Assignment> {
        self.assignments
            .iter()
            .find(|a| a.observation_id == observation_id)
    }

    pub fn is_unresolved(&self, observation_id: &str) -> bool {
        self.unresolved
            .iter()
            .any(|u| u.observation_id == observation_id)
    }
}
