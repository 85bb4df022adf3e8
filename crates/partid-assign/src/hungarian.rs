// crates/partid-assign/src/hungarian.rs
//
// Kuhn-Munkres with row/column potentials, O(n^2 m) for an n x m matrix
// with n <= m. Every row is matched to a distinct column minimizing the sum
// of costs.

use partid_core::PartIdError;

/// Optimal row -> column matching.
#[derive(Debug, Clone, PartialEq)]
pub struct Matching {
    /// `row_to_col[i]` is the column assigned to row `i`.
    pub row_to_col: Vec<usize>,
    pub total_cost: f64,
}

/// Solve the rectangular assignment problem.
///
/// `cost` must be non-empty, rectangular, finite, and have no more rows than
/// columns.
pub fn solve(cost: &[Vec<f64>]) -> Result<Matching, PartIdError> {
    let n = cost.len();
    if n == 0 {
        return Ok(Matching {
            row_to_col: Vec::new(),
            total_cost: 0.0,
        });
    }
    let m = cost[0].len();
    if n > m {
        return Err(PartIdError::InvalidState(format!(
            "cost matrix has {} rows but only {} columns",
            n, m
        )));
    }
    for (i, row) in cost.iter().enumerate() {
        if row.len() != m {
            return Err(PartIdError::InvalidState(format!(
                "cost matrix row {} has {} columns, expected {}",
                i,
                row.len(),
                m
            )));
        }
        if row.iter().any(|c| !c.is_finite()) {
            return Err(PartIdError::InvalidState(format!(
                "cost matrix row {} has a non-finite cost",
                i
            )));
        }
    }

    // 1-indexed; column 0 is the virtual source column.
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; m + 1];
    let mut p = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let cur = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        // Augment along the alternating path.
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut row_to_col = vec![0usize; n];
    for j in 1..=m {
        if p[j] != 0 {
            row_to_col[p[j] - 1] = j - 1;
        }
    }
    let total_cost = row_to_col
        .iter()
        .enumerate()
        .map(|(i, &j)| cost[i][j])
        .sum();

    Ok(Matching {
        row_to_col,
        total_cost,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimum over all injective row -> column maps.
    fn brute_force(cost: &[Vec<f64>]) -> f64 {
        fn go(cost: &[Vec<f64>], row: usize, used: &mut Vec<bool>, acc: f64, best: &mut f64) {
            if row == cost.len() {
                *best = best.min(acc);
                return;
            }
            for j in 0..cost[0].len() {
                if !used[j] {
                    used[j] = true;
                    go(cost, row + 1, used, acc + cost[row][j], best);
                    used[j] = false;
                }
            }
        }
        let mut best = f64::INFINITY;
        go(cost, 0, &mut vec![false; cost[0].len()], 0.0, &mut best);
        best
    }

    /// xorshift64*, enough for reproducible fixtures.
    struct Rng(u64);

    impl Rng {
        fn next_f64(&mut self) -> f64 {
            self.0 ^= self.0 >> 12;
            self.0 ^= self.0 << 25;
            self.0 ^= self.0 >> 27;
            (self.0.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11) as f64 / (1u64 << 53) as f64
        }

        fn below(&mut self, n: usize) -> usize {
            (self.next_f64() * n as f64) as usize % n
        }
    }

    #[test]
    fn test_matches_brute_force_on_random_matrices() {
        let mut rng = Rng(0x9E37_79B9_7F4A_7C15);
        for _ in 0..300 {
            let n = 1 + rng.below(5);
            let m = n + rng.below(3);
            let cost: Vec<Vec<f64>> = (0..n)
                .map(|_| {
                    (0..m)
                        .map(|_| {
                            // Mix in the penalty value the solver really uses.
                            if rng.next_f64() < 0.15 {
                                1e6
                            } else {
                                rng.next_f64()
                            }
                        })
                        .collect()
                })
                .collect();
            let matching = solve(&cost).unwrap();
            let expected = brute_force(&cost);
            assert!(
                (matching.total_cost - expected).abs() < 1e-6,
                "hungarian {} vs brute force {} on {:?}",
                matching.total_cost,
                expected,
                cost
            );
            let mut cols = matching.row_to_col.clone();
            cols.sort();
            cols.dedup();
            assert_eq!(cols.len(), n);
        }
    }

    #[test]
    fn test_known_3x3() {
        let cost = vec![
            vec![4.0, 1.0, 3.0],
            vec![2.0, 0.0, 5.0],
            vec![3.0, 2.0, 2.0],
        ];
        let m = solve(&cost).unwrap();
        assert_eq!(m.row_to_col, vec![1, 0, 2]);
        assert!((m.total_cost - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_more_rows_than_columns() {
        assert!(solve(&[vec![1.0], vec![2.0]]).is_err());
    }

    #[test]
    fn test_rejects_non_finite() {
        assert!(solve(&[vec![f64::INFINITY, 1.0]]).is_err());
    }

    #[test]
    fn test_empty() {
        assert!(solve(&[]).unwrap().row_to_col.is_empty());
    }
}
