// crates/partid-store/src/persistence.rs
//
// In-memory persistence backend. Used by tests and by builds without the
// `rocksdb` feature.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use partid_core::{
    CatalogEntry, CatalogPersistence, EntryKey, EntryUsage, FusionWeightState, PartIdError,
    WeightStatePersistence,
};

/// Catalog entries and weight state held in process memory.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    entries: RwLock<BTreeMap<EntryKey, CatalogEntry>>,
    usage: RwLock<BTreeMap<EntryKey, EntryUsage>>,
    weight_state: RwLock<Option<FusionWeightState>>,
    fail_writes: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `Storage`. For exercising
    /// persist-before-apply paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), PartIdError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PartIdError::Storage("memory backend write refused".to_string()));
        }
        Ok(())
    }
}

fn poisoned() -> PartIdError {
    PartIdError::Storage("memory backend lock poisoned".to_string())
}

impl CatalogPersistence for MemoryPersistence {
    fn save_entry(&self, entry: &CatalogEntry) -> Result<(), PartIdError> {
        self.check_writable()?;
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(entry.key.clone(), entry.clone());
        self.usage.write().map_err(|_| poisoned())?.remove(&entry.key);
        Ok(())
    }

    fn delete_entry(&self, key: &EntryKey) -> Result<(), PartIdError> {
        self.check_writable()?;
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        self.usage.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }

    fn load_entries(&self) -> Result<Vec<CatalogEntry>, PartIdError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.values().cloned().collect())
    }

    fn save_usage(&self, usage: &[EntryUsage]) -> Result<(), PartIdError> {
        self.check_writable()?;
        let mut saved = self.usage.write().map_err(|_| poisoned())?;
        for u in usage {
            saved.insert(u.key.clone(), u.clone());
        }
        Ok(())
    }

    fn load_usage(&self) -> Result<Vec<EntryUsage>, PartIdError> {
        let saved = self.usage.read().map_err(|_| poisoned())?;
        Ok(saved.values().cloned().collect())
    }
}

impl WeightStatePersistence for MemoryPersistence {
    fn save_weight_state(&self, state: &FusionWeightState) -> Result<(), PartIdError> {
        self.check_writable()?;
        let mut slot = self.weight_state.write().map_err(|_| poisoned())?;
        *slot = Some(state.clone());
        Ok(())
    }

    fn load_weight_state(&self) -> Result<Option<FusionWeightState>, PartIdError> {
        let slot = self.weight_state.read().map_err(|_| poisoned())?;
        Ok(slot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partid_core::hash_embedding;

    #[test]
    fn test_entry_roundtrip_and_delete() {
        let p = MemoryPersistence::new();
        let e = CatalogEntry::new(
            EntryKey::new("a", "v1"),
            hash_embedding("a", 8),
            hash_embedding("b", 8),
            hash_embedding("c", 8),
        );
        p.save_entry(&e).unwrap();
        assert_eq!(p.load_entries().unwrap().len(), 1);
        p.delete_entry(&e.key).unwrap();
        assert!(p.load_entries().unwrap().is_empty());
    }

    #[test]
    fn test_delete_drops_usage() {
        let p = MemoryPersistence::new();
        let key = EntryKey::new("a", "v1");
        p.save_usage(&[EntryUsage {
            key: key.clone(),
            inserted_at_ms: 1_000,
            last_matched_ms: Some(2_000),
            match_count: 3,
        }])
        .unwrap();
        assert_eq!(p.load_usage().unwrap()[0].last_matched_ms, Some(2_000));
        p.delete_entry(&key).unwrap();
        assert!(p.load_usage().unwrap().is_empty());
    }

    #[test]
    fn test_fail_writes_keeps_previous_state() {
        let p = MemoryPersistence::new();
        p.save_weight_state(&FusionWeightState::new(0.3, 0.1, 0.6)).unwrap();
        p.set_fail_writes(true);
        assert!(p.save_weight_state(&FusionWeightState::new(0.5, 0.1, 0.6)).is_err());
        let loaded = p.load_weight_state().unwrap().unwrap();
        assert!((loaded.w_txt - 0.3).abs() < f32::EPSILON);
    }
}
