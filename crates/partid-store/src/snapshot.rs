// crates/partid-store/src/snapshot.rs
//
// Immutable view of the catalog: an arena of entries, tombstones, a key map,
// and optional HNSW graphs over the indexed prefix of the arena.
//
// Layout:
//   slots[0..indexed_len)   covered by `ann` (when present)
//   slots[indexed_len..]    delta: upserted since the last rebuild, scanned exactly
//   live[i] == false        tombstone (replaced, removed, or pruned)
//
// A snapshot is never modified after publication. Writers build a new one and
// swap the store's pointer; readers keep whatever `Arc` they loaded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use partid_core::{cosine_similarity, CatalogEntry, EntryKey, EntryUsage, Modality};

use crate::ann::{AnnConfig, AnnSet};

/// A catalog entry plus its usage clock.
///
/// The clock is shared by every snapshot holding this `Arc`, so a search on an
/// old snapshot still counts toward pruning decisions.
#[derive(Debug)]
pub struct StoredEntry {
    pub entry: CatalogEntry,
    inserted_at_ms: i64,
    last_matched_ms: AtomicI64,
    match_count: AtomicU64,
}

impl StoredEntry {
    pub fn new(entry: CatalogEntry, now: DateTime<Utc>) -> Self {
        let ms = now.timestamp_millis();
        Self {
            entry,
            inserted_at_ms: ms,
            last_matched_ms: AtomicI64::new(i64::MIN),
            match_count: AtomicU64::new(0),
        }
    }

    /// Rebuild an entry with a usage clock saved before a restart.
    pub fn restored(entry: CatalogEntry, usage: &EntryUsage) -> Self {
        Self {
            entry,
            inserted_at_ms: usage.inserted_at_ms,
            last_matched_ms: AtomicI64::new(usage.last_matched_ms.unwrap_or(i64::MIN)),
            match_count: AtomicU64::new(usage.match_count),
        }
    }

    pub fn usage(&self) -> EntryUsage {
        let last = self.last_matched_ms.load(Ordering::Relaxed);
        EntryUsage {
            key: self.entry.key.clone(),
            inserted_at_ms: self.inserted_at_ms,
            last_matched_ms: (last != i64::MIN).then_some(last),
            match_count: self.match_count(),
        }
    }

    /// Record that this entry appeared in a query result.
    pub fn touch(&self, now_ms: i64) {
        self.last_matched_ms.fetch_max(now_ms, Ordering::Relaxed);
        self.match_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Last match time, or insertion time if never matched.
    pub fn last_seen_ms(&self) -> i64 {
        self.last_matched_ms
            .load(Ordering::Relaxed)
            .max(self.inserted_at_ms)
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_seen_ms())
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn match_count(&self) -> u64 {
        self.match_count.load(Ordering::Relaxed)
    }
}

/// One search hit: the entry and its exact cosine similarity to the query.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entry: Arc<StoredEntry>,
    pub similarity: f32,
}

impl SearchHit {
    pub fn key(&self) -> &EntryKey {
        &self.entry.entry.key
    }
}

/// A published, read-only view of the catalog index.
#[derive(Debug)]
pub struct IndexSnapshot {
    pub(crate) generation: u64,
    pub(crate) built_at: DateTime<Utc>,
    pub(crate) dimension: usize,
    pub(crate) slots: Vec<Arc<StoredEntry>>,
    pub(crate) live: Vec<bool>,
    pub(crate) by_key: HashMap<EntryKey, usize>,
    pub(crate) indexed_len: usize,
    pub(crate) ann: Option<Arc<AnnSet>>,
    pub(crate) ann_config: AnnConfig,
}

impl IndexSnapshot {
    /// An empty snapshot.
    pub fn empty(dimension: usize, ann_config: AnnConfig) -> Self {
        Self {
            generation: 0,
            built_at: Utc::now(),
            dimension,
            slots: Vec::new(),
            live: Vec::new(),
            by_key: HashMap::new(),
            indexed_len: 0,
            ann: None,
            ann_config,
        }
    }

    /// Build a fully-indexed snapshot from a list of entries (sorted by key
    /// so slot numbering, and therefore ties inside HNSW, are reproducible).
    pub fn build(
        mut entries: Vec<Arc<StoredEntry>>,
        dimension: usize,
        ann_config: AnnConfig,
        generation: u64,
    ) -> Self {
        entries.sort_by(|a, b| a.entry.key.cmp(&b.entry.key));
        let ann = AnnSet::build(&entries, &ann_config).map(Arc::new);
        let by_key = entries
            .iter()
            .enumerate()
            .map(|(i, s)| (s.entry.key.clone(), i))
            .collect();
        let n = entries.len();
        Self {
            generation,
            built_at: Utc::now(),
            dimension,
            live: vec![true; n],
            slots: entries,
            by_key,
            indexed_len: n,
            ann,
            ann_config,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn indexed_len(&self) -> usize {
        self.indexed_len
    }

    pub fn delta_len(&self) -> usize {
        self.live[self.indexed_len..].iter().filter(|l| **l).count()
    }

    pub fn tombstones(&self) -> usize {
        self.live.iter().filter(|l| !**l).count()
    }

    pub fn ann_active(&self) -> bool {
        self.ann.is_some()
    }

    pub fn get(&self, key: &EntryKey) -> Option<&Arc<StoredEntry>> {
        self.by_key.get(key).map(|&i| &self.slots[i])
    }

    /// Live entries in slot order.
    pub fn live_entries(&self) -> impl Iterator<Item = &Arc<StoredEntry>> {
        self.slots
            .iter()
            .zip(self.live.iter())
            .filter(|(_, live)| **live)
            .map(|(s, _)| s)
    }

    /// Exact cosine similarity between `query` and one entry's modality vector.
    pub fn similarity(&self, key: &EntryKey, query: &[f32], modality: Modality) -> Option<f32> {
        self.get(key)
            .map(|s| cosine_similarity(query, s.entry.vector(modality)))
    }

    /// Top-`k` live entries by cosine similarity, descending, ties by key.
    ///
    /// Uses the HNSW graph for the indexed prefix when available and scans the
    /// delta exactly. If the approximate path comes back short of
    /// `min(k, len)` hits, the whole snapshot is scanned instead, so fewer than
    /// `k` results means fewer than `k` live entries.
    pub fn search(&self, query: &[f32], k: usize, modality: Modality) -> Vec<SearchHit> {
        let want = k.min(self.len());
        if want == 0 {
            return Vec::new();
        }

        let mut hits = match &self.ann {
            Some(ann) if self.ann_config.should_use_ann(self.indexed_len) => {
                let dead_indexed = self.live[..self.indexed_len]
                    .iter()
                    .filter(|l| !**l)
                    .count();
                let ask = (want + dead_indexed).min(self.indexed_len);
                let mut hits: Vec<SearchHit> = ann
                    .search(modality, query, ask, self.ann_config.ef_search)
                    .into_iter()
                    .filter(|&slot| slot < self.indexed_len && self.live[slot])
                    .map(|slot| self.hit(slot, query, modality))
                    .collect();
                hits.extend(
                    (self.indexed_len..self.slots.len())
                        .filter(|&slot| self.live[slot])
                        .map(|slot| self.hit(slot, query, modality)),
                );
                sort_hits(&mut hits);
                hits.dedup_by(|a, b| a.key() == b.key());
                if hits.len() < want {
                    tracing::debug!(
                        got = hits.len(),
                        want,
                        "ANN result short after tombstone filtering; scanning"
                    );
                    self.scan(query, modality)
                } else {
                    hits
                }
            }
            _ => self.scan(query, modality),
        };

        hits.truncate(want);
        let now_ms = Utc::now().timestamp_millis();
        for hit in &hits {
            hit.entry.touch(now_ms);
        }
        hits
    }

    fn hit(&self, slot: usize, query: &[f32], modality: Modality) -> SearchHit {
        let entry = self.slots[slot].clone();
        let similarity = cosine_similarity(query, entry.entry.vector(modality));
        SearchHit { entry, similarity }
    }

    fn scan(&self, query: &[f32], modality: Modality) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = (0..self.slots.len())
            .filter(|&slot| self.live[slot])
            .map(|slot| self.hit(slot, query, modality))
            .collect();
        sort_hits(&mut hits);
        hits
    }
}

fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.key().cmp(b.key()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use partid_core::{hash_embedding, Embedding};

    fn stored(id: &str, visual: Vec<f32>) -> Arc<StoredEntry> {
        let dim = visual.len();
        Arc::new(StoredEntry::new(
            CatalogEntry::new(
                EntryKey::new(id, "std"),
                Embedding::normalize(visual).unwrap(),
                hash_embedding(id, dim),
                hash_embedding(&format!("{id}-tag"), dim),
            ),
            Utc::now(),
        ))
    }

    #[test]
    fn test_scan_sorted_descending() {
        let snap = IndexSnapshot::build(
            vec![
                stored("a", vec![1.0, 0.0, 0.0]),
                stored("b", vec![0.0, 1.0, 0.0]),
                stored("c", vec![0.9, 0.1, 0.0]),
            ],
            3,
            AnnConfig::default(),
            1,
        );
        let hits = snap.search(&[1.0, 0.0, 0.0], 2, Modality::Visual);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].key().entry_id, "a");
        assert_eq!(hits[1].key().entry_id, "c");
        assert!(hits[0].similarity >= hits[1].similarity);
    }

    #[test]
    fn test_search_returns_all_when_fewer_than_k() {
        let snap = IndexSnapshot::build(
            vec![stored("a", vec![1.0, 0.0]), stored("b", vec![0.0, 1.0])],
            2,
            AnnConfig::default(),
            1,
        );
        assert_eq!(snap.search(&[1.0, 0.0], 10, Modality::Visual).len(), 2);
        assert!(snap.search(&[1.0, 0.0], 0, Modality::Visual).is_empty());
    }

    #[test]
    fn test_touch_moves_last_seen_forward() {
        let s = stored("a", vec![1.0, 0.0]);
        let before = s.last_seen_ms();
        s.touch(before + 5_000);
        assert_eq!(s.last_seen_ms(), before + 5_000);
        assert_eq!(s.match_count(), 1);
        // Older touches never move the clock backwards.
        s.touch(before);
        assert_eq!(s.last_seen_ms(), before + 5_000);
    }

    #[test]
    fn test_hnsw_search_matches_exact_top1() {
        let dim = 16;
        let entries: Vec<Arc<StoredEntry>> = (0..200)
            .map(|i| {
                let v = hash_embedding(&format!("part-{i}"), dim);
                stored(&format!("p{i:03}"), v.as_slice().to_vec())
            })
            .collect();
        let config = AnnConfig::default().with_min_vectors_for_ann(50);
        let snap = IndexSnapshot::build(entries, dim, config, 1);
        assert!(snap.ann_active());

        let target = snap.get(&EntryKey::new("p042", "std")).unwrap().clone();
        let hits = snap.search(target.entry.vector(Modality::Visual), 5, Modality::Visual);
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].key().entry_id, "p042");
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }
}
