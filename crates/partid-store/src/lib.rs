// crates/partid-store/src/lib.rs
//
// partid-store: the catalog Vector Store.
//
// Holds catalog entries in an immutable snapshot published through an atomic
// pointer swap, with per-modality HNSW graphs for large catalogs, exact scan
// for small ones and for the unindexed delta, usage-based pruning, and
// RocksDB or in-memory persistence.

pub mod ann;
pub mod persistence;
#[cfg(feature = "rocksdb")]
pub mod rocks;
pub mod snapshot;
pub mod store;

pub use ann::AnnConfig;
pub use persistence::MemoryPersistence;
#[cfg(feature = "rocksdb")]
pub use rocks::RocksStore;
pub use snapshot::{IndexSnapshot, SearchHit, StoredEntry};
pub use store::{PruneReport, StoreStats, VectorStore};
