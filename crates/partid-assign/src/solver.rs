// crates/partid-assign/src/solver.rs
//
// Joint assignment of an image's observations to catalog entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use partid_core::{
    Assignment, AssignmentResult, EntryKey, PartIdError, UnresolvedObservation, UnresolvedReason,
};

use crate::cost::{CostMatrix, SolverRow};
use crate::hungarian;

/// Solver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Cost of leaving an observation unmatched. Finite and far above any
    /// real pairing cost.
    #[serde(default = "default_unmatched_penalty")]
    pub unmatched_penalty: f64,
    /// Candidates with a fused score below this are not offered.
    #[serde(default)]
    pub min_assign_score: Option<f32>,
}

fn default_unmatched_penalty() -> f64 {
    1e6
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            unmatched_penalty: default_unmatched_penalty(),
            min_assign_score: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssignmentSolver {
    config: SolverConfig,
}

impl AssignmentSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Find the minimum-cost partial assignment of `rows` under `capacity`.
    ///
    /// Rows are reported in input order; every row ends up either assigned or
    /// unresolved. `commit_attempts` and `degraded_observations` are left for
    /// the caller to fill in.
    pub fn solve(
        &self,
        job_id: &str,
        image_id: &str,
        rows: &[SolverRow],
        capacity: &BTreeMap<EntryKey, u32>,
    ) -> Result<AssignmentResult, PartIdError> {
        let mut result = AssignmentResult::empty(job_id, image_id);

        // Apply the score floor, then set aside rows with nothing to offer.
        let mut active: Vec<(usize, SolverRow)> = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            let candidates: Vec<_> = row
                .candidates
                .iter()
                .filter(|c| {
                    self.config
                        .min_assign_score
                        .map_or(true, |floor| c.fused_score >= floor)
                })
                .filter(|c| capacity.get(&c.key).copied().unwrap_or(0) > 0)
                .cloned()
                .collect();
            if candidates.is_empty() {
                continue;
            }
            active.push((
                idx,
                SolverRow {
                    observation_id: row.observation_id.clone(),
                    candidates,
                },
            ));
        }

        let solver_rows: Vec<SolverRow> = active.iter().map(|(_, r)| r.clone()).collect();
        let matrix = CostMatrix::build(&solver_rows, capacity, self.config.unmatched_penalty);
        if solver_rows.len() > matrix.capacity_columns() {
            tracing::debug!(
                job = %job_id,
                image = %image_id,
                "{}",
                PartIdError::SolverInfeasible {
                    observations: solver_rows.len(),
                    capacity: matrix.capacity_columns(),
                }
            );
        }
        let matching = hungarian::solve(&matrix.cells)?;

        let mut outcome: Vec<Option<Assignment>> = vec![None; rows.len()];
        let mut had_candidates = vec![false; rows.len()];
        for (pos, (idx, row)) in active.iter().enumerate() {
            had_candidates[*idx] = true;
            let col = matching.row_to_col[pos];
            if !matrix.is_offered(pos, col) {
                continue;
            }
            if let Some(key) = &matrix.columns[col] {
                outcome[*idx] = Some(Assignment {
                    observation_id: row.observation_id.clone(),
                    key: key.clone(),
                    cost: matrix.cells[pos][col],
                    fused_score: matrix.scores[pos][col],
                });
            }
        }

        for (idx, row) in rows.iter().enumerate() {
            match outcome[idx].take() {
                Some(a) => {
                    result.objective += a.cost;
                    result.assignments.push(a);
                }
                None => result.unresolved.push(UnresolvedObservation {
                    observation_id: row.observation_id.clone(),
                    reason: if had_candidates[idx] {
                        UnresolvedReason::CapacityExhausted
                    } else {
                        UnresolvedReason::NoCandidates
                    },
                    detail: None,
                }),
            }
        }

        tracing::debug!(
            job = %job_id,
            image = %image_id,
            assigned = result.assignments.len(),
            unresolved = result.unresolved.len(),
            objective = result.objective,
            "Assignment solved"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partid_core::CandidateScore;

    fn cand(id: &str, fused: f32) -> CandidateScore {
        CandidateScore {
            key: EntryKey::new(id, "std"),
            visual_sim: fused,
            text_sim: 0.0,
            fused_score: fused,
            rank: 0,
            tag_sim: None,
        }
    }

    fn row(id: &str, cands: Vec<CandidateScore>) -> SolverRow {
        SolverRow {
            observation_id: id.to_string(),
            candidates: cands,
        }
    }

    fn caps(pairs: &[(&str, u32)]) -> BTreeMap<EntryKey, u32> {
        pairs
            .iter()
            .map(|(id, n)| (EntryKey::new(*id, "std"), *n))
            .collect()
    }

    #[test]
    fn test_capacity_forces_second_choice() {
        // Both prefer A, but only one A exists; joint optimum gives A to the
        // observation that loses more by switching.
        let rows = vec![
            row("o1", vec![cand("A", 0.95), cand("B", 0.90)]),
            row("o2", vec![cand("A", 0.90), cand("B", 0.40)]),
        ];
        let solver = AssignmentSolver::new(SolverConfig::default());
        let r = solver
            .solve("job", "img", &rows, &caps(&[("A", 1), ("B", 1)]))
            .unwrap();
        assert_eq!(r.assignment_for("o1").unwrap().key.entry_id, "B");
        assert_eq!(r.assignment_for("o2").unwrap().key.entry_id, "A");
        assert!((r.objective - (0.10 + 0.10)).abs() < 1e-5);
    }

    #[test]
    fn test_excess_observations_unresolved() {
        let rows = vec![
            row("o1", vec![cand("A", 0.9)]),
            row("o2", vec![cand("A", 0.8)]),
            row("o3", vec![]),
        ];
        let solver = AssignmentSolver::new(SolverConfig::default());
        let r = solver.solve("job", "img", &rows, &caps(&[("A", 1)])).unwrap();
        assert_eq!(r.assignments.len(), 1);
        assert_eq!(r.assignment_for("o1").unwrap().key.entry_id, "A");
        let o2 = r.unresolved.iter().find(|u| u.observation_id == "o2").unwrap();
        assert_eq!(o2.reason, UnresolvedReason::CapacityExhausted);
        let o3 = r.unresolved.iter().find(|u| u.observation_id == "o3").unwrap();
        assert_eq!(o3.reason, UnresolvedReason::NoCandidates);
        assert!(r.objective < 1.0);
    }

    #[test]
    fn test_multiplicity_respects_capacity() {
        let rows: Vec<SolverRow> = (0..5)
            .map(|i| row(&format!("o{i}"), vec![cand("A", 0.9), cand("B", 0.6)]))
            .collect();
        let solver = AssignmentSolver::new(SolverConfig::default());
        let capacity = caps(&[("A", 2), ("B", 2)]);
        let r = solver.solve("job", "img", &rows, &capacity).unwrap();
        for (key, n) in r.multiplicity() {
            assert!(n <= capacity[&key]);
        }
        assert_eq!(r.assignments.len(), 4);
        assert_eq!(r.unresolved.len(), 1);
    }

    #[test]
    fn test_min_assign_score_withholds_weak_pairs() {
        let rows = vec![row("o1", vec![cand("A", 0.2)])];
        let solver = AssignmentSolver::new(SolverConfig {
            min_assign_score: Some(0.5),
            ..SolverConfig::default()
        });
        let r = solver.solve("job", "img", &rows, &caps(&[("A", 1)])).unwrap();
        assert!(r.assignments.is_empty());
        assert_eq!(r.unresolved[0].reason, UnresolvedReason::NoCandidates);
    }

    #[test]
    fn test_output_in_input_order() {
        let rows = vec![
            row("z", vec![cand("A", 0.9)]),
            row("a", vec![cand("B", 0.9)]),
        ];
        let solver = AssignmentSolver::new(SolverConfig::default());
        let r = solver
            .solve("job", "img", &rows, &caps(&[("A", 1), ("B", 1)]))
            .unwrap();
        assert_eq!(r.assignments[0].observation_id, "z");
        assert_eq!(r.assignments[1].observation_id, "a");
    }
}
