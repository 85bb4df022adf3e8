// crates/partid-store/src/rocks.rs
//
// RocksDB-backed persistence for catalog entries and the fusion-weight state.
//
// Key format:
//   - `entry:{entry_id}:{variant_id}` -> JSON-serialized CatalogEntry
//   - `usage:{entry_id}:{variant_id}` -> JSON-serialized EntryUsage
//   - `weight_state`                  -> JSON-serialized FusionWeightState

use rocksdb::{DBWithThreadMode, MultiThreaded, Options, WriteBatch};
use serde::de::DeserializeOwned;

use partid_core::{
    CatalogEntry, CatalogPersistence, EntryKey, EntryUsage, FusionWeightState, PartIdError,
    WeightStatePersistence,
};

const ENTRY_PREFIX: &str = "entry:";
const USAGE_PREFIX: &str = "usage:";
const WEIGHT_STATE_KEY: &[u8] = b"weight_state";

/// RocksDB wrapper implementing both persistence seams.
#[derive(Debug)]
pub struct RocksStore {
    db: DBWithThreadMode<MultiThreaded>,
}

impl RocksStore {
    /// Open a RocksDB database at the given filesystem path.
    ///
    /// Creates the database directory if it does not exist.
    pub fn open(path: &str) -> Result<Self, PartIdError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DBWithThreadMode::<MultiThreaded>::open(&opts, path).map_err(|e| {
            PartIdError::Storage(format!("Failed to open RocksDB at {}: {}", path, e))
        })?;

        Ok(Self { db })
    }

    fn entry_key(key: &EntryKey) -> Vec<u8> {
        format!("{}{}:{}", ENTRY_PREFIX, key.entry_id, key.variant_id).into_bytes()
    }

    fn usage_key(key: &EntryKey) -> Vec<u8> {
        format!("{}{}:{}", USAGE_PREFIX, key.entry_id, key.variant_id).into_bytes()
    }

    /// Decode every JSON value under `prefix`, skipping undecodable ones.
    fn scan_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, PartIdError> {
        let prefix = prefix.as_bytes();
        let mut values = Vec::new();

        for item in self.db.prefix_iterator(prefix) {
            let (key, value) = item
                .map_err(|e| PartIdError::Storage(format!("RocksDB iteration error: {}", e)))?;

            // Stop when the prefix no longer matches.
            if !key.starts_with(prefix) {
                break;
            }

            match serde_json::from_slice::<T>(&value) {
                Ok(v) => values.push(v),
                Err(e) => tracing::warn!(
                    key = %String::from_utf8_lossy(&key),
                    error = %e,
                    "Skipping undecodable record"
                ),
            }
        }

        Ok(values)
    }

    fn put_raw(&self, key: &[u8], value: &[u8]) -> Result<(), PartIdError> {
        self.db
            .put(key, value)
            .map_err(|e| PartIdError::Storage(format!("RocksDB put failed: {}", e)))
    }

    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, PartIdError> {
        self.db
            .get(key)
            .map_err(|e| PartIdError::Storage(format!("RocksDB get failed: {}", e)))
    }
}

impl CatalogPersistence for RocksStore {
    fn save_entry(&self, entry: &CatalogEntry) -> Result<(), PartIdError> {
        let mut batch = WriteBatch::default();
        batch.put(Self::entry_key(&entry.key), serde_json::to_vec(entry)?);
        batch.delete(Self::usage_key(&entry.key));
        self.db
            .write(batch)
            .map_err(|e| PartIdError::Storage(format!("RocksDB put failed: {}", e)))
    }

    fn delete_entry(&self, key: &EntryKey) -> Result<(), PartIdError> {
        let mut batch = WriteBatch::default();
        batch.delete(Self::entry_key(key));
        batch.delete(Self::usage_key(key));
        self.db
            .write(batch)
            .map_err(|e| PartIdError::Storage(format!("RocksDB delete failed: {}", e)))
    }

    fn load_entries(&self) -> Result<Vec<CatalogEntry>, PartIdError> {
        self.scan_prefix(ENTRY_PREFIX)
    }

    fn save_usage(&self, usage: &[EntryUsage]) -> Result<(), PartIdError> {
        let mut batch = WriteBatch::default();
        for u in usage {
            batch.put(Self::usage_key(&u.key), serde_json::to_vec(u)?);
        }
        self.db
            .write(batch)
            .map_err(|e| PartIdError::Storage(format!("RocksDB usage write failed: {}", e)))
    }

    fn load_usage(&self) -> Result<Vec<EntryUsage>, PartIdError> {
        self.scan_prefix(USAGE_PREFIX)
    }
}

impl WeightStatePersistence for RocksStore {
    fn save_weight_state(&self, state: &FusionWeightState) -> Result<(), PartIdError> {
        let json = serde_json::to_vec(state)?;
        self.put_raw(WEIGHT_STATE_KEY, &json)
    }

    fn load_weight_state(&self) -> Result<Option<FusionWeightState>, PartIdError> {
        match self.get_raw(WEIGHT_STATE_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
