// crates/partid-assign/src/lib.rs
//
// partid-assign: the Assignment Solver.
//
// Builds a capacity-expanded cost matrix from per-observation candidate lists
// and solves it exactly with the Hungarian algorithm, returning a partial
// one-to-one assignment with explicit unresolved observations.

pub mod cost;
pub mod hungarian;
pub mod solver;

pub use cost::{CostMatrix, SolverRow};
pub use hungarian::{solve, Matching};
pub use solver::{AssignmentSolver, SolverConfig};
