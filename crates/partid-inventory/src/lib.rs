// crates/partid-inventory/src/lib.rs
//
// partid-inventory: the Inventory Constraint Module.
//
// Turns a job's bill of materials into hard per-entry capacity. Candidates
// whose capacity is used up are filtered before assignment, and committed
// assignments decrement the ledger under a per-job single-writer lock.

pub mod bom;
pub mod ledger;
pub mod registry;

pub use bom::{BomLine, BomSnapshot};
pub use ledger::{InventoryLedger, LedgerLine, LedgerReport};
pub use registry::{InventoryRegistry, JobInventory, JobStats, Reservation};
