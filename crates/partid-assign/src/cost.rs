// crates/partid-assign/src/cost.rs
//
// Capacity-expanded cost matrix.
//
//   rows     observations that have at least one candidate
//   columns  each distinct candidate key (sorted), repeated min(capacity, N)
//            times, then dummy columns until there are at least N
//   cell     1 - fused_score, or `penalty` when the pair is not offered

use std::collections::{BTreeMap, BTreeSet};

use partid_core::{CandidateScore, EntryKey};

/// One observation's offered candidates.
#[derive(Debug, Clone)]
pub struct SolverRow {
    pub observation_id: String,
    pub candidates: Vec<CandidateScore>,
}

#[derive(Debug, Clone)]
pub struct CostMatrix {
    /// Row-major costs.
    pub cells: Vec<Vec<f64>>,
    /// Entry behind each column; `None` for dummy columns.
    pub columns: Vec<Option<EntryKey>>,
    /// Fused score per cell, for reporting; 0 for penalty cells.
    pub scores: Vec<Vec<f32>>,
    pub penalty: f64,
}

impl CostMatrix {
    /// Build the matrix for `rows` against per-key `capacity`.
    ///
    /// Keys missing from `capacity` or at zero get no columns.
    pub fn build(rows: &[SolverRow], capacity: &BTreeMap<EntryKey, u32>, penalty: f64) -> Self {
        let n = rows.len();
        let keys: BTreeSet<&EntryKey> = rows
            .iter()
            .flat_map(|r| r.candidates.iter().map(|c| &c.key))
            .collect();

        let mut columns: Vec<Option<EntryKey>> = Vec::new();
        for key in keys {
            let copies = capacity.get(key).copied().unwrap_or(0) as usize;
            for _ in 0..copies.min(n) {
                columns.push(Some(key.clone()));
            }
        }
        while columns.len() < n {
            columns.push(None);
        }

        let mut cells = Vec::with_capacity(n);
        let mut scores = Vec::with_capacity(n);
        for row in rows {
            // Best offered score per key; duplicates in a list keep the max.
            let mut offered: BTreeMap<&EntryKey, f32> = BTreeMap::new();
            for c in &row.candidates {
                let slot = offered.entry(&c.key).or_insert(f32::MIN);
                *slot = slot.max(c.fused_score);
            }
            let mut cost_row = Vec::with_capacity(columns.len());
            let mut score_row = Vec::with_capacity(columns.len());
            for col in &columns {
                match col.as_ref().and_then(|k| offered.get(k)) {
                    Some(&score) => {
                        cost_row.push(1.0 - score as f64);
                        score_row.push(score);
                    }
                    None => {
                        cost_row.push(penalty);
                        score_row.push(0.0);
                    }
                }
            }
            cells.push(cost_row);
            scores.push(score_row);
        }

        Self {
            cells,
            columns,
            scores,
            penalty,
        }
    }

    /// Whether a cell is a real (offered) pairing.
    pub fn is_offered(&self, row: usize, col: usize) -> bool {
        self.columns[col].is_some() && self.cells[row][col] < self.penalty
    }

    /// Number of non-dummy columns.
    pub fn capacity_columns(&self) -> usize {
        self.columns.iter().filter(|c| c.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_virtual_columns_capped_at_row_count() {
        let rows = vec![
            row("o1", vec![cand("A", 0.9), cand("B", 0.5)]),
            row("o2", vec![cand("A", 0.8)]),
        ];
        let capacity = BTreeMap::from([
            (EntryKey::new("A", "std"), 10),
            (EntryKey::new("B", "std"), 1),
        ]);
        let m = CostMatrix::build(&rows, &capacity, 1e6);
        // A: min(10, 2) = 2 copies, B: 1 copy.
        assert_eq!(m.columns.len(), 3);
        assert_eq!(m.capacity_columns(), 3);
        assert!((m.cells[0][0] - 0.1).abs() < 1e-6);
        assert_eq!(m.cells[1][2], 1e6);
        assert!(!m.is_offered(1, 2));
    }

    #[test]
    fn test_dummy_columns_square_the_matrix() {
        let rows = vec![
            row("o1", vec![cand("A", 0.9)]),
            row("o2", vec![cand("A", 0.8)]),
            row("o3", vec![cand("A", 0.7)]),
        ];
        let capacity = BTreeMap::from([(EntryKey::new("A", "std"), 1)]);
        let m = CostMatrix::build(&rows, &capacity, 1e6);
        assert_eq!(m.columns.len(), 3);
        assert_eq!(m.capacity_columns(), 1);
        assert!(m.columns[1].is_none());
    }
}
