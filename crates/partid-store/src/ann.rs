// crates/partid-store/src/ann.rs
//
// HNSW sub-indices over the catalog arena, one graph per modality.
//
// Graphs are immutable once built: a rebuild produces a new `AnnSet` and the
// store publishes it inside a fresh snapshot. Small catalogs skip HNSW and are
// answered by exact scan, which is both faster and deterministic at that size.

use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};

use partid_core::Modality;

use crate::snapshot::StoredEntry;

/// HNSW needs at least this many points to build a useful graph.
const MIN_GRAPH_POINTS: usize = 10;

/// Configuration for ANN index construction and search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnConfig {
    /// Neighbors per node (higher = better recall, slower build).
    #[serde(default = "default_m")]
    pub m: usize,
    /// Candidate list size during construction.
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    /// Candidate list size during search.
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
    /// Use HNSW at all; when false every search is an exact scan.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Below this many indexed entries, exact scan is used even if enabled.
    #[serde(default = "default_min_vectors_for_ann")]
    pub min_vectors_for_ann: usize,
}

fn default_m() -> usize {
    16
}

fn default_ef_construction() -> usize {
    200
}

fn default_ef_search() -> usize {
    64
}

fn default_enabled() -> bool {
    true
}

fn default_min_vectors_for_ann() -> usize {
    1000
}

impl Default for AnnConfig {
    fn default() -> Self {
        Self {
            m: default_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            enabled: default_enabled(),
            min_vectors_for_ann: default_min_vectors_for_ann(),
        }
    }
}

impl AnnConfig {
    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn with_ef_search(mut self, ef: usize) -> Self {
        self.ef_search = ef;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_min_vectors_for_ann(mut self, min: usize) -> Self {
        self.min_vectors_for_ann = min;
        self
    }

    /// Whether a graph should be built/used for `num_vectors` entries.
    pub fn should_use_ann(&self, num_vectors: usize) -> bool {
        self.enabled && num_vectors >= self.min_vectors_for_ann.max(MIN_GRAPH_POINTS)
    }
}

/// One HNSW graph per modality. Point ids are arena slot numbers.
pub struct AnnSet {
    visual: Hnsw<'static, f32, DistCosine>,
    text: Hnsw<'static, f32, DistCosine>,
    tag: Hnsw<'static, f32, DistCosine>,
    points: usize,
}

impl std::fmt::Debug for AnnSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnSet").field("points", &self.points).finish()
    }
}

impl AnnSet {
    /// Build graphs over `slots`; the slot index becomes the point id.
    ///
    /// Returns `None` when the set is too small to be worth a graph.
    pub fn build(slots: &[std::sync::Arc<StoredEntry>], config: &AnnConfig) -> Option<Self> {
        let n = slots.len();
        if !config.should_use_ann(n) {
            return None;
        }
        let nb_layer = 16.min((n as f32).ln().trunc() as usize).max(1);

        let build_one = |modality: Modality| {
            let hnsw = Hnsw::<f32, DistCosine>::new(
                config.m,
                n,
                nb_layer,
                config.ef_construction,
                DistCosine {},
            );
            let owned: Vec<Vec<f32>> = slots
                .iter()
                .map(|s| s.entry.vector(modality).to_vec())
                .collect();
            let data: Vec<(&Vec<f32>, usize)> =
                owned.iter().enumerate().map(|(idx, v)| (v, idx)).collect();
            hnsw.parallel_insert(&data);
            hnsw
        };

        Some(Self {
            visual: build_one(Modality::Visual),
            text: build_one(Modality::Text),
            tag: build_one(Modality::Tag),
            points: n,
        })
    }

    pub fn points(&self) -> usize {
        self.points
    }

    /// Approximate top-`k` slot ids for `query`, closest first.
    pub fn search(&self, modality: Modality, query: &[f32], k: usize, ef: usize) -> Vec<usize> {
        let graph = match modality {
            Modality::Visual => &self.visual,
            Modality::Text => &self.text,
            Modality::Tag => &self.tag,
        };
        graph
            .search(query, k, ef.max(k))
            .into_iter()
            .map(|n| n.get_origin_id())
            .collect()
    }
}
