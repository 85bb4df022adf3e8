// crates/partid-core/src/traits.rs

use crate::catalog::{CatalogEntry, EntryKey, EntryUsage};
use crate::error::PartIdError;
use crate::feedback::FusionWeightState;

/// Durable storage for catalog entries.
///
/// Implemented by partid-store (RocksDB backend and in-memory backend).
pub trait CatalogPersistence: Send + Sync {
    /// Save an entry, overwriting any entry with the same key.
    fn save_entry(&self, entry: &CatalogEntry) -> Result<(), PartIdError>;

    /// Delete an entry. No error if it does not exist.
    fn delete_entry(&self, key: &EntryKey) -> Result<(), PartIdError>;

    /// Load every stored entry.
    fn load_entries(&self) -> Result<Vec<CatalogEntry>, PartIdError>;

    /// Save usage clocks, overwriting earlier records for the same keys.
    /// `save_entry` and `delete_entry` drop the key's usage record.
    fn save_usage(&self, usage: &[EntryUsage]) -> Result<(), PartIdError>;

    /// Every saved usage record.
    fn load_usage(&self) -> Result<Vec<EntryUsage>, PartIdError>;
}

/// Durable storage for the fusion-weight state.
///
/// The controller writes through this before publishing a new weight.
pub trait WeightStatePersistence: Send + Sync {
    fn save_weight_state(&self, state: &FusionWeightState) -> Result<(), PartIdError>;

    /// The last saved state, if any.
    fn load_weight_state(&self) -> Result<Option<FusionWeightState>, PartIdError>;
}

/// Knowledge of entry pairs the engine is known to confuse.
///
/// The matcher consults this to bias its ambiguity gate; the hard-case miner
/// implements it.
pub trait HardPairOracle: Send + Sync {
    /// Whether the unordered pair `(a, b)` is a known hard pair.
    fn is_hard_pair(&self, a: &EntryKey, b: &EntryKey) -> bool;
}
