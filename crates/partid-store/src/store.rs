// crates/partid-store/src/store.rs
//
// VectorStore: the catalog index behind an atomically swapped snapshot.
//
// Readers call `snapshot()` (or `search()`, which does the same) and never take
// a lock. Writers (upsert, remove, prune, and the publish step of rebuild)
// serialize on `writer`, derive a new snapshot from the current one, persist
// first, then swap the pointer. `rebuild()` does its expensive HNSW build with
// no lock held and only takes `writer` to fold in whatever changed meanwhile.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use partid_core::{
    CatalogEntry, CatalogPersistence, EntryKey, EntryUsage, Modality, PartIdError,
};

use crate::ann::AnnConfig;
use crate::snapshot::{IndexSnapshot, SearchHit, StoredEntry};

/// Counts from one prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    /// Removed because their last match (or insertion) was older than `max_age`.
    pub by_age: usize,
    /// Removed to bring the catalog down to `max_size`.
    pub by_size: usize,
    pub remaining: usize,
}

impl PruneReport {
    pub fn removed(&self) -> usize {
        self.by_age + self.by_size
    }
}

/// Point-in-time description of the published index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub dimension: usize,
    pub live: usize,
    pub indexed: usize,
    pub delta: usize,
    pub tombstones: usize,
    pub generation: u64,
    pub ann_active: bool,
    pub built_at: DateTime<Utc>,
    pub index_age_secs: i64,
}

impl StoreStats {
    /// Whether a rebuild is due: the unindexed delta plus tombstones exceed
    /// `delta_ratio` of the arena, or the index is older than `max_age`.
    pub fn needs_rebuild(&self, delta_ratio: f64, max_age: Duration) -> bool {
        let arena = self.indexed + self.delta;
        let churn = self.delta + self.tombstones;
        if arena > 0 && churn as f64 / arena as f64 > delta_ratio {
            return true;
        }
        churn > 0 && self.index_age_secs > max_age.num_seconds()
    }
}

/// Catalog vector store with lock-free reads.
pub struct VectorStore {
    dimension: usize,
    config: AnnConfig,
    current: ArcSwap<IndexSnapshot>,
    writer: Mutex<()>,
    rebuilding: Mutex<()>,
    persistence: Option<Arc<dyn CatalogPersistence>>,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("dimension", &self.dimension)
            .field("live", &self.current.load().len())
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}

impl VectorStore {
    /// An empty, memory-only store.
    pub fn new(dimension: usize, config: AnnConfig) -> Self {
        Self {
            dimension,
            current: ArcSwap::from_pointee(IndexSnapshot::empty(dimension, config.clone())),
            config,
            writer: Mutex::new(()),
            rebuilding: Mutex::new(()),
            persistence: None,
        }
    }

    /// Restore the entry set from `persistence` and build the index over it.
    ///
    /// Entries whose vectors do not match `dimension` are skipped with a warning.
    pub fn load(
        persistence: Arc<dyn CatalogPersistence>,
        dimension: usize,
        config: AnnConfig,
    ) -> Result<Self, PartIdError> {
        let now = Utc::now();
        let usage: HashMap<EntryKey, EntryUsage> = persistence
            .load_usage()?
            .into_iter()
            .map(|u| (u.key.clone(), u))
            .collect();
        let mut entries = Vec::new();
        let mut clocks_restored = 0;
        for entry in persistence.load_entries()? {
            if let Err(e) = entry.check_dimension(dimension) {
                tracing::warn!(key = %entry.key, error = %e, "Skipping persisted entry");
                continue;
            }
            let stored = match usage.get(&entry.key) {
                Some(u) => {
                    clocks_restored += 1;
                    StoredEntry::restored(entry, u)
                }
                None => StoredEntry::new(entry, now),
            };
            entries.push(Arc::new(stored));
        }
        let count = entries.len();
        let snapshot = IndexSnapshot::build(entries, dimension, config.clone(), 1);
        tracing::info!(
            entries = count,
            clocks_restored,
            ann = snapshot.ann_active(),
            "Catalog loaded from persistence"
        );

        Ok(Self {
            dimension,
            current: ArcSwap::from_pointee(snapshot),
            config,
            writer: Mutex::new(()),
            rebuilding: Mutex::new(()),
            persistence: Some(persistence),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn config(&self) -> &AnnConfig {
        &self.config
    }

    /// The current published snapshot. Hold it for one query to get a
    /// consistent view.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current.load_full()
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &EntryKey) -> Option<CatalogEntry> {
        self.current.load().get(key).map(|s| s.entry.clone())
    }

    /// Top-`k` entries by cosine similarity in one modality.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        modality: Modality,
    ) -> Result<Vec<SearchHit>, PartIdError> {
        if query.len() != self.dimension {
            return Err(PartIdError::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }
        Ok(self.current.load().search(query, k, modality))
    }

    /// Exact similarity of one entry against `query`.
    pub fn similarity(&self, key: &EntryKey, query: &[f32], modality: Modality) -> Option<f32> {
        self.current.load().similarity(key, query, modality)
    }

    /// Insert or replace one entry. Visible to the next search.
    pub fn upsert(&self, entry: CatalogEntry) -> Result<(), PartIdError> {
        self.upsert_batch(vec![entry])
    }

    /// Insert or replace many entries, publishing a single snapshot.
    ///
    /// Every entry is validated before anything is persisted or published.
    pub fn upsert_batch(&self, entries: Vec<CatalogEntry>) -> Result<(), PartIdError> {
        for entry in &entries {
            entry.check_dimension(self.dimension)?;
        }
        if entries.is_empty() {
            return Ok(());
        }

        let _guard = self.lock_writer()?;
        if let Some(p) = &self.persistence {
            for entry in &entries {
                p.save_entry(entry)?;
            }
        }

        let now = Utc::now();
        let mut next = self.derive();
        for entry in entries {
            tracing::trace!(key = %entry.key, "Upserting catalog entry");
            let stored = Arc::new(StoredEntry::new(entry, now));
            next.append(stored);
        }
        self.current.store(Arc::new(next));
        Ok(())
    }

    /// Remove one entry. Returns whether it existed.
    pub fn remove(&self, key: &EntryKey) -> Result<bool, PartIdError> {
        let _guard = self.lock_writer()?;
        if self.current.load().get(key).is_none() {
            return Ok(false);
        }
        if let Some(p) = &self.persistence {
            p.delete_entry(key)?;
        }
        let mut next = self.derive();
        next.tombstone(key);
        self.current.store(Arc::new(next));
        tracing::debug!(key = %key, "Removed catalog entry");
        Ok(true)
    }

    /// Rebuild the HNSW graphs over the current entry set and swap them in.
    pub fn rebuild(&self) -> Result<StoreStats, PartIdError> {
        self.rebuild_with_hook(|| {})
    }

    /// `rebuild()` with a callback run after the entry set is copied and
    /// before the graphs are built. Searches and writes proceed while it runs.
    pub fn rebuild_with_hook<F: FnOnce()>(&self, hook: F) -> Result<StoreStats, PartIdError> {
        let _rebuild = self
            .rebuilding
            .lock()
            .map_err(|_| PartIdError::InvalidState("rebuild lock poisoned".to_string()))?;

        let base = self.current.load_full();
        let entries: Vec<Arc<StoredEntry>> = base.live_entries().cloned().collect();
        drop(base);

        hook();

        let started = std::time::Instant::now();
        let mut built = IndexSnapshot::build(entries, self.dimension, self.config.clone(), 0);
        let build_ms = started.elapsed().as_millis();

        let _guard = self.lock_writer()?;
        let latest = self.current.load_full();
        let carried = built.reconcile(&latest);
        built.generation = latest.generation + 1;

        tracing::info!(
            generation = built.generation,
            indexed = built.indexed_len,
            carried_over = carried,
            ann = built.ann_active(),
            build_ms = build_ms as u64,
            "Catalog index rebuilt"
        );
        self.current.store(Arc::new(built));
        drop(_guard);
        Ok(self.stats())
    }

    /// Prune by age and size relative to the current time.
    pub fn prune(
        &self,
        max_age: Option<Duration>,
        max_size: Option<usize>,
    ) -> Result<PruneReport, PartIdError> {
        self.prune_at(Utc::now(), max_age, max_size)
    }

    /// Remove entries last seen before `now - max_age`, then evict the least
    /// recently matched until at most `max_size` remain.
    ///
    /// Survivors' usage clocks are checkpointed to persistence on every call,
    /// so age-based pruning carries across restarts up to the last prune.
    pub fn prune_at(
        &self,
        now: DateTime<Utc>,
        max_age: Option<Duration>,
        max_size: Option<usize>,
    ) -> Result<PruneReport, PartIdError> {
        let _guard = self.lock_writer()?;
        let current = self.current.load_full();

        let mut survivors: Vec<(i64, EntryKey)> = current
            .live_entries()
            .map(|s| (s.last_seen_ms(), s.entry.key.clone()))
            .collect();
        let mut victims: Vec<EntryKey> = Vec::new();

        let mut report = PruneReport::default();
        if let Some(age) = max_age {
            let cutoff = (now - age).timestamp_millis();
            survivors.retain(|(seen, key)| {
                if *seen < cutoff {
                    victims.push(key.clone());
                    false
                } else {
                    true
                }
            });
            report.by_age = victims.len();
        }

        if let Some(limit) = max_size {
            if survivors.len() > limit {
                survivors.sort();
                let excess = survivors.len() - limit;
                victims.extend(survivors.drain(..excess).map(|(_, key)| key));
                report.by_size = excess;
            }
        }
        report.remaining = survivors.len();

        if victims.is_empty() {
            self.checkpoint_usage(&current)?;
            return Ok(report);
        }
        if let Some(p) = &self.persistence {
            for key in &victims {
                p.delete_entry(key)?;
            }
        }
        let mut next = self.derive();
        for key in &victims {
            next.tombstone(key);
        }
        let next = Arc::new(next);
        self.current.store(next.clone());
        self.checkpoint_usage(&next)?;

        tracing::info!(
            by_age = report.by_age,
            by_size = report.by_size,
            remaining = report.remaining,
            "Catalog pruned"
        );
        Ok(report)
    }

    /// Save the usage clocks of every live entry in `snapshot`.
    fn checkpoint_usage(&self, snapshot: &IndexSnapshot) -> Result<(), PartIdError> {
        let Some(p) = &self.persistence else {
            return Ok(());
        };
        let usage: Vec<EntryUsage> = snapshot.live_entries().map(|s| s.usage()).collect();
        p.save_usage(&usage)?;
        tracing::debug!(entries = usage.len(), "Usage clocks checkpointed");
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        let snap = self.current.load();
        StoreStats {
            dimension: self.dimension,
            live: snap.len(),
            indexed: snap.indexed_len(),
            delta: snap.delta_len(),
            tombstones: snap.tombstones(),
            generation: snap.generation(),
            ann_active: snap.ann_active(),
            built_at: snap.built_at(),
            index_age_secs: (Utc::now() - snap.built_at()).num_seconds(),
        }
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, ()>, PartIdError> {
        self.writer
            .lock()
            .map_err(|_| PartIdError::InvalidState("store writer lock poisoned".to_string()))
    }

    /// Copy of the current snapshot's bookkeeping sharing its entries and graphs.
    fn derive(&self) -> IndexSnapshot {
        let cur = self.current.load();
        IndexSnapshot {
            generation: cur.generation,
            built_at: cur.built_at,
            dimension: cur.dimension,
            slots: cur.slots.clone(),
            live: cur.live.clone(),
            by_key: cur.by_key.clone(),
            indexed_len: cur.indexed_len,
            ann: cur.ann.clone(),
            ann_config: cur.ann_config.clone(),
        }
    }
}

impl IndexSnapshot {
    fn append(&mut self, stored: Arc<StoredEntry>) {
        let key = stored.entry.key.clone();
        if let Some(old) = self.by_key.get(&key) {
            self.live[*old] = false;
        }
        self.slots.push(stored);
        self.live.push(true);
        self.by_key.insert(key, self.slots.len() - 1);
    }

    fn tombstone(&mut self, key: &EntryKey) {
        if let Some(slot) = self.by_key.remove(key) {
            self.live[slot] = false;
        }
    }

    /// Make a freshly built snapshot agree with `latest`: entries replaced or
    /// removed since the copy are tombstoned, new ones appended as delta.
    /// Returns the number of entries carried over.
    fn reconcile(&mut self, latest: &IndexSnapshot) -> usize {
        let mut carried = 0;
        let built_keys: Vec<EntryKey> = self.by_key.keys().cloned().collect();
        for key in &built_keys {
            let Some(&slot) = self.by_key.get(key) else {
                continue;
            };
            match latest.get(key) {
                Some(now) if Arc::ptr_eq(now, &self.slots[slot]) => {}
                Some(now) => {
                    let now = now.clone();
                    self.append(now);
                    carried += 1;
                }
                None => self.tombstone(key),
            }
        }

        let known: HashSet<&EntryKey> = built_keys.iter().collect();
        let mut fresh: Vec<Arc<StoredEntry>> = latest
            .live_entries()
            .filter(|s| !known.contains(&s.entry.key))
            .cloned()
            .collect();
        fresh.sort_by(|a, b| a.entry.key.cmp(&b.entry.key));
        carried += fresh.len();
        for stored in fresh {
            self.append(stored);
        }
        carried
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use partid_core::hash_embedding;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const DIM: usize = 16;

    fn entry(id: &str) -> CatalogEntry {
        CatalogEntry::new(
            EntryKey::new(id, "std"),
            hash_embedding(&format!("{id}:visual"), DIM),
            hash_embedding(&format!("{id}:text"), DIM),
            hash_embedding(&format!("{id}:tags"), DIM),
        )
    }

    fn visual_of(id: &str) -> Vec<f32> {
        hash_embedding(&format!("{id}:visual"), DIM).as_slice().to_vec()
    }

    #[test]
    fn test_upsert_is_searchable_immediately() {
        let store = VectorStore::new(DIM, AnnConfig::default());
        store.upsert(entry("bolt")).unwrap();
        store.upsert(entry("nut")).unwrap();

        let hits = store.search(&visual_of("nut"), 1, Modality::Visual).unwrap();
        assert_eq!(hits[0].key().entry_id, "nut");
        assert_eq!(store.stats().delta, 2);
    }

    #[test]
    fn test_upsert_rejects_wrong_dimension() {
        let store = VectorStore::new(DIM, AnnConfig::default());
        let bad = CatalogEntry::new(
            EntryKey::new("x", "std"),
            hash_embedding("x", DIM + 1),
            hash_embedding("x", DIM + 1),
            hash_embedding("x", DIM + 1),
        );
        let err = store.upsert_batch(vec![entry("ok"), bad]).unwrap_err();
        assert!(matches!(err, PartIdError::DimensionMismatch { .. }));
        // Batch is all-or-nothing.
        assert!(store.is_empty());
    }

    #[test]
    fn test_search_rejects_wrong_query_dimension() {
        let store = VectorStore::new(DIM, AnnConfig::default());
        store.upsert(entry("a")).unwrap();
        assert!(store.search(&[1.0, 0.0], 1, Modality::Visual).is_err());
    }

    #[test]
    fn test_replace_tombstones_old_slot() {
        let store = VectorStore::new(DIM, AnnConfig::default());
        store.upsert(entry("a")).unwrap();
        store.upsert(entry("a")).unwrap();
        let stats = store.stats();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.tombstones, 1);
        assert_eq!(store.search(&visual_of("a"), 5, Modality::Visual).unwrap().len(), 1);
    }

    #[test]
    fn test_remove() {
        let store = VectorStore::new(DIM, AnnConfig::default());
        store.upsert(entry("a")).unwrap();
        assert!(store.remove(&EntryKey::new("a", "std")).unwrap());
        assert!(!store.remove(&EntryKey::new("a", "std")).unwrap());
        assert!(store.search(&visual_of("a"), 5, Modality::Visual).unwrap().is_empty());
    }

    #[test]
    fn test_prune_by_age_then_size() {
        let store = VectorStore::new(DIM, AnnConfig::default());
        store
            .upsert_batch(vec![entry("a"), entry("b"), entry("c"), entry("d")])
            .unwrap();

        let future = Utc::now() + Duration::days(10);
        let snap = store.snapshot();
        // Touch c and d recently; d most recently.
        snap.get(&EntryKey::new("c", "std"))
            .unwrap()
            .touch(future.timestamp_millis() - 2_000);
        snap.get(&EntryKey::new("d", "std"))
            .unwrap()
            .touch(future.timestamp_millis() - 1_000);
        drop(snap);

        let report = store
            .prune_at(future, Some(Duration::days(1)), Some(1))
            .unwrap();
        assert_eq!(report.by_age, 2);
        assert_eq!(report.by_size, 1);
        assert_eq!(report.remaining, 1);
        assert!(store.get(&EntryKey::new("d", "std")).is_some());
        assert!(store.get(&EntryKey::new("c", "std")).is_none());
    }

    #[test]
    fn test_prune_noop_when_within_limits() {
        let store = VectorStore::new(DIM, AnnConfig::default());
        store.upsert(entry("a")).unwrap();
        let report = store.prune(Some(Duration::days(1)), Some(10)).unwrap();
        assert_eq!(report.removed(), 0);
        assert_eq!(report.remaining, 1);
    }

    #[test]
    fn test_rebuild_moves_delta_into_index() {
        let config = AnnConfig::default().with_min_vectors_for_ann(20);
        let store = VectorStore::new(DIM, config);
        store
            .upsert_batch((0..40).map(|i| entry(&format!("p{i:02}"))).collect())
            .unwrap();
        store.remove(&EntryKey::new("p00", "std")).unwrap();
        assert_eq!(store.stats().indexed, 0);

        let stats = store.rebuild().unwrap();
        assert_eq!(stats.indexed, 39);
        assert_eq!(stats.delta, 0);
        assert_eq!(stats.tombstones, 0);
        assert!(stats.ann_active);
        assert_eq!(stats.generation, 1);

        let hits = store.search(&visual_of("p17"), 3, Modality::Visual).unwrap();
        assert_eq!(hits[0].key().entry_id, "p17");
    }

    #[test]
    fn test_rebuild_carries_writes_made_during_build() {
        let store = VectorStore::new(DIM, AnnConfig::default());
        store.upsert_batch(vec![entry("a"), entry("b")]).unwrap();

        store
            .rebuild_with_hook(|| {
                store.upsert(entry("c")).unwrap();
                store.remove(&EntryKey::new("a", "std")).unwrap();
                store.upsert(entry("b")).unwrap();
            })
            .unwrap();

        let stats = store.stats();
        assert_eq!(stats.live, 2);
        assert!(store.get(&EntryKey::new("a", "std")).is_none());
        assert!(store.get(&EntryKey::new("c", "std")).is_some());
        assert_eq!(store.search(&visual_of("b"), 1, Modality::Visual).unwrap()[0].key().entry_id, "b");
    }

    #[test]
    fn test_concurrent_search_during_rebuild_sees_whole_index() {
        let config = AnnConfig::default().with_min_vectors_for_ann(50);
        let store = Arc::new(VectorStore::new(DIM, config));
        store
            .upsert_batch((0..300).map(|i| entry(&format!("p{i:03}"))).collect())
            .unwrap();
        store.rebuild().unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let checks = Arc::new(AtomicUsize::new(0));
        let target = visual_of("p123");

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let stop = stop.clone();
                let checks = checks.clone();
                let target = target.clone();
                std::thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let snap = store.snapshot();
                        assert_eq!(snap.len(), 300);
                        let hits = snap.search(&target, 5, Modality::Visual);
                        assert_eq!(hits.len(), 5);
                        assert_eq!(hits[0].key().entry_id, "p123");
                        checks.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        let before = store.stats().generation;
        store
            .rebuild_with_hook(|| std::thread::sleep(std::time::Duration::from_millis(100)))
            .unwrap();
        stop.store(true, Ordering::Relaxed);
        for r in readers {
            r.join().unwrap();
        }

        assert_eq!(store.stats().generation, before + 1);
        assert!(checks.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn test_persist_and_load() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = VectorStore::load(persistence.clone(), DIM, AnnConfig::default()).unwrap();
        store.upsert_batch(vec![entry("a"), entry("b")]).unwrap();
        store.remove(&EntryKey::new("b", "std")).unwrap();

        let reloaded = VectorStore::load(persistence, DIM, AnnConfig::default()).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get(&EntryKey::new("a", "std")).is_some());
        assert_eq!(reloaded.stats().indexed, 1);
    }

    #[test]
    fn test_usage_clock_survives_reload() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = VectorStore::load(persistence.clone(), DIM, AnnConfig::default()).unwrap();
        store.upsert_batch(vec![entry("a"), entry("b")]).unwrap();

        let now = Utc::now();
        let matched = now + Duration::days(5);
        store
            .snapshot()
            .get(&EntryKey::new("b", "std"))
            .unwrap()
            .touch(matched.timestamp_millis());
        // A no-op prune still checkpoints the clocks.
        assert_eq!(store.prune(None, None).unwrap().removed(), 0);
        drop(store);

        let reloaded = VectorStore::load(persistence, DIM, AnnConfig::default()).unwrap();
        let snap = reloaded.snapshot();
        let b = snap.get(&EntryKey::new("b", "std")).unwrap();
        assert_eq!(b.last_seen_ms(), matched.timestamp_millis());
        assert_eq!(b.match_count(), 1);
        drop(snap);

        // b was matched within the window; a was not, restart or no restart.
        let report = reloaded
            .prune_at(now + Duration::days(6), Some(Duration::days(2)), None)
            .unwrap();
        assert_eq!(report.by_age, 1);
        assert!(reloaded.get(&EntryKey::new("a", "std")).is_none());
        assert!(reloaded.get(&EntryKey::new("b", "std")).is_some());
    }

    #[test]
    fn test_failed_persist_publishes_nothing() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = VectorStore::load(persistence.clone(), DIM, AnnConfig::default()).unwrap();
        persistence.set_fail_writes(true);
        assert!(store.upsert(entry("a")).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_needs_rebuild() {
        let mut stats = VectorStore::new(DIM, AnnConfig::default()).stats();
        stats.indexed = 90;
        stats.delta = 10;
        assert!(!stats.needs_rebuild(0.2, Duration::hours(1)));
        stats.tombstones = 15;
        assert!(stats.needs_rebuild(0.2, Duration::hours(1)));
        stats.tombstones = 0;
        stats.index_age_secs = 7_200;
        assert!(stats.needs_rebuild(0.2, Duration::hours(1)));
    }
}
