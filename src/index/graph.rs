//! Thin wrapper over the `hnsw_rs` cosine graph.
//!
//! `hnsw_rs` has no point deletion, so the index above this keeps every raw
//! vector and rebuilds a fresh graph whenever entries must disappear.

use std::sync::atomic::{AtomicUsize, Ordering};

use hnsw_rs::hnsw::{Hnsw, Neighbour};
use hnsw_rs::prelude::*;

use crate::config::IndexConfig;

/// hnsw_rs caps the layer count at 16.
const MAX_LAYER_CAP: usize = 16;

/// Construction and search parameters for the HNSW graph.
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// M: neighbours kept per node per layer.
    pub max_nb_connection: usize,
    pub ef_construction: usize,
    /// Lower bound for the dynamic candidate list at query time.
    pub ef_search: usize,
    pub max_layer: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::from(&IndexConfig::default())
    }
}

impl From<&IndexConfig> for HnswParams {
    fn from(config: &IndexConfig) -> Self {
        Self {
            max_nb_connection: config.max_nb_connection.max(2),
            ef_construction: config.ef_construction.max(1),
            ef_search: config.ef_search.max(1),
            max_layer: config.max_layer.clamp(1, MAX_LAYER_CAP),
        }
    }
}

pub(crate) struct Graph {
    hnsw: Hnsw<'static, f32, DistCosine>,
    ef_search: usize,
    len: AtomicUsize,
}

impl Graph {
    pub(crate) fn new(params: &HnswParams, max_elements: usize) -> Self {
        let hnsw = Hnsw::<f32, DistCosine>::new(
            params.max_nb_connection,
            max_elements,
            params.max_layer,
            params.ef_construction,
            DistCosine {},
        );
        Self {
            hnsw,
            ef_search: params.ef_search,
            len: AtomicUsize::new(0),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Insert a pre-validated vector under `id`.
    ///
    /// `hnsw_rs` locks per node, so inserts only need `&self` and can overlap
    /// searches on the same graph.
    pub(crate) fn insert(&self, vector: &[f32], id: usize) {
        self.hnsw.insert_slice((vector, id));
        self.len.fetch_add(1, Ordering::AcqRel);
    }

    /// Up to `k` `(id, similarity)` pairs, most similar first.
    ///
    /// Cosine distance is `1 - cos`, so similarity is `1 - distance`, clamped
    /// into `[0, 1]`.
    pub(crate) fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if self.len() == 0 || k == 0 {
            return Vec::new();
        }
        let ef = self.ef_search.max(k);
        let neighbours: Vec<Neighbour> = self.hnsw.search(query, k, ef);
        let mut hits: Vec<(usize, f32)> = neighbours
            .into_iter()
            .map(|n| (n.d_id, (1.0 - n.distance).clamp(0.0, 1.0)))
            .collect();
        // hnsw_rs returns ascending distance already; a stable sort keeps ties in graph order
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits
    }
}
