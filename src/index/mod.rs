//! Concurrent HNSW vector index over conversation chunks.
//!
//! # Concurrency
//!
//! Every mutation (insert, batch insert, save, load, clear, session removal)
//! first takes the index's single async write lock, so ids are handed out and
//! metadata appended as one step. The graph and entry list sit behind a
//! reader-writer lock. Searches take only a read guard. Writers do their graph
//! work under a read guard too (inserting into the live graph, or building a
//! replacement aside) and take the write guard only to commit, so searches are
//! never held up by graph construction.
//!
//! A search may see a graph node whose entry is not committed yet; such hits
//! are skipped.
//!
//! # Ids
//!
//! Ids are dense and equal to insertion order. Removing a session rebuilds
//! the graph from the retained vectors of the surviving entries and
//! re-assigns their ids, so no stale vector stays reachable.

mod graph;
pub mod persist;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub use graph::HnswParams;
pub use persist::{metadata_path, IndexMetadata};

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::types::{Chunk, RetrievalResult};
use graph::Graph;
use persist::GraphSnapshot;

/// Scoped searches pull this many times `k` candidates before filtering.
/// When the graph comes back short, the session is scanned exactly.
const SCOPED_OVERSAMPLE: usize = 4;
const SCOPED_MIN_CANDIDATES: usize = 32;

/// Sizing and timing for a [`VectorIndex`].
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Dimensions used by [`VectorIndex::clear`].
    pub dimensions: usize,
    /// Capacity used by [`VectorIndex::clear`].
    pub max_elements: usize,
    pub hnsw: HnswParams,
    pub write_timeout: Duration,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self::from(&IndexConfig::default())
    }
}

impl From<&IndexConfig> for IndexOptions {
    fn from(config: &IndexConfig) -> Self {
        Self {
            dimensions: config.dimensions,
            max_elements: config.max_elements,
            hnsw: HnswParams::from(config),
            write_timeout: config.write_timeout(),
        }
    }
}

/// A stored vector with its chunk.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: usize,
    pub vector: Vec<f32>,
    pub chunk: Chunk,
}

/// Snapshot of index size and capacity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub initialized: bool,
    pub num_elements: usize,
    pub num_dimensions: usize,
    pub max_elements: usize,
    pub utilization_percent: f64,
}

struct IndexState {
    dimensions: usize,
    max_elements: usize,
    graph: Graph,
    entries: Vec<IndexEntry>,
}

impl IndexState {
    fn empty(dimensions: usize, max_elements: usize, params: &HnswParams) -> Self {
        Self {
            dimensions,
            max_elements,
            graph: Graph::new(params, max_elements),
            entries: Vec::new(),
        }
    }

    fn check_capacity(&self, requested: usize) -> Result<(), IndexError> {
        if self.entries.len() + requested > self.max_elements {
            return Err(IndexError::CapacityExceeded {
                current: self.entries.len(),
                requested,
                max: self.max_elements,
            });
        }
        Ok(())
    }

    /// Assign the next id and append to graph and metadata together.
    /// Only for states not yet visible to readers.
    fn append(&mut self, vector: Vec<f32>, chunk: Chunk) -> usize {
        let id = self.entries.len();
        self.graph.insert(&vector, id);
        self.entries.push(IndexEntry { id, vector, chunk });
        id
    }
}

pub struct VectorIndex {
    options: IndexOptions,
    write_lock: Mutex<()>,
    state: RwLock<Option<IndexState>>,
}

impl VectorIndex {
    /// Uninitialized index; call [`initialize`](Self::initialize) or
    /// [`load`](Self::load) before use.
    pub fn new(options: IndexOptions) -> Self {
        Self {
            options,
            write_lock: Mutex::new(()),
            state: RwLock::new(None),
        }
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    // ── Locking ──────────────────────────────────────────────────────────────

    async fn lock_writes(&self) -> Result<MutexGuard<'_, ()>, IndexError> {
        tokio::time::timeout(self.options.write_timeout, self.write_lock.lock())
            .await
            .map_err(|_| IndexError::LockTimeout(self.options.write_timeout))
    }

    // A panic while holding the guard cannot leave the state half-written:
    // every mutation is built aside and swapped in, or commits staged entries
    // in one `extend`.
    fn read_state(&self) -> RwLockReadGuard<'_, Option<IndexState>> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Option<IndexState>> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    // ── Mutations ────────────────────────────────────────────────────────────

    /// Replace the graph with an empty one. Existing entries are discarded.
    pub async fn initialize(&self, dimensions: usize, max_elements: usize) -> Result<(), IndexError> {
        if dimensions == 0 || max_elements == 0 {
            return Err(IndexError::InvalidParameters(format!(
                "dimensions ({dimensions}) and max_elements ({max_elements}) must be positive"
            )));
        }
        let _permit = self.lock_writes().await?;
        let fresh = IndexState::empty(dimensions, max_elements, &self.options.hnsw);
        *self.write_state() = Some(fresh);
        info!(dimensions, max_elements, "vector index initialized");
        Ok(())
    }

    /// Discard everything and start over with the default dimensions and capacity.
    pub async fn clear(&self) -> Result<(), IndexError> {
        let _permit = self.lock_writes().await?;
        let fresh = IndexState::empty(
            self.options.dimensions,
            self.options.max_elements,
            &self.options.hnsw,
        );
        *self.write_state() = Some(fresh);
        info!("vector index cleared");
        Ok(())
    }

    /// Insert one vector; returns its id.
    pub async fn insert(&self, vector: Vec<f32>, chunk: Chunk) -> Result<usize, IndexError> {
        let _permit = self.lock_writes().await?;
        let id = {
            let guard = self.read_state();
            let state = guard.as_ref().ok_or(IndexError::NotInitialized)?;
            validate_vector(&vector, state.dimensions)?;
            state.check_capacity(1)?;
            let id = state.entries.len();
            state.graph.insert(&vector, id);
            id
        };
        self.commit_entries(vec![IndexEntry { id, vector, chunk }])?;
        debug!(id, "vector inserted");
        Ok(id)
    }

    /// Insert many vectors as one unit; returns their contiguous ids.
    ///
    /// Every entry is validated before anything is written, so a single bad
    /// vector rejects the whole batch and leaves the index untouched.
    pub async fn insert_batch(&self, entries: Vec<(Vec<f32>, Chunk)>) -> Result<Vec<usize>, IndexError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let _permit = self.lock_writes().await?;
        let staged: Vec<IndexEntry> = {
            let guard = self.read_state();
            let state = guard.as_ref().ok_or(IndexError::NotInitialized)?;

            for (i, (vector, _)) in entries.iter().enumerate() {
                validate_vector(vector, state.dimensions).map_err(|e| match e {
                    IndexError::InvalidVector(msg) => IndexError::InvalidVector(format!("entry {i}: {msg}")),
                    other => other,
                })?;
            }
            state.check_capacity(entries.len())?;

            let first = state.entries.len();
            entries
                .into_iter()
                .enumerate()
                .map(|(i, (vector, chunk))| {
                    state.graph.insert(&vector, first + i);
                    IndexEntry { id: first + i, vector, chunk }
                })
                .collect()
        };

        let ids: Vec<usize> = staged.iter().map(|e| e.id).collect();
        self.commit_entries(staged)?;
        debug!(count = ids.len(), first = ids[0], "batch inserted");
        Ok(ids)
    }

    /// Drop every entry of `session_id` and rebuild the graph from the rest.
    ///
    /// Returns how many entries were removed. Surviving entries get new dense ids.
    pub async fn remove_session(&self, session_id: &str) -> Result<usize, IndexError> {
        let _permit = self.lock_writes().await?;
        let (mut rebuilt, survivors, before) = {
            let guard = self.read_state();
            let state = guard.as_ref().ok_or(IndexError::NotInitialized)?;
            if !state.entries.iter().any(|e| e.chunk.session_id == session_id) {
                return Ok(0);
            }
            let survivors: Vec<(Vec<f32>, Chunk)> = state
                .entries
                .iter()
                .filter(|e| e.chunk.session_id != session_id)
                .map(|e| (e.vector.clone(), e.chunk.clone()))
                .collect();
            let rebuilt = IndexState::empty(state.dimensions, state.max_elements, &self.options.hnsw);
            (rebuilt, survivors, state.entries.len())
        };

        // The live state stays searchable while the replacement graph is built.
        for (vector, chunk) in survivors {
            rebuilt.append(vector, chunk);
        }
        let removed = before - rebuilt.entries.len();
        let remaining = rebuilt.entries.len();
        *self.write_state() = Some(rebuilt);

        info!(session_id, removed, remaining, "session removed, graph rebuilt");
        Ok(removed)
    }

    /// Make entries already inserted into the live graph visible to readers.
    fn commit_entries(&self, staged: Vec<IndexEntry>) -> Result<(), IndexError> {
        let mut guard = self.write_state();
        let state = guard.as_mut().ok_or(IndexError::NotInitialized)?;
        state.entries.extend(staged);
        Ok(())
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    /// Write the graph file and its JSON sidecar; returns the graph path.
    pub async fn save(&self, path: &Path) -> Result<PathBuf, IndexError> {
        let _permit = self.lock_writes().await?;
        let (graph, metadata) = {
            let guard = self.read_state();
            let state = guard.as_ref().ok_or(IndexError::NotInitialized)?;
            let graph = GraphSnapshot {
                dimensions: state.dimensions,
                max_elements: state.max_elements,
                vectors: state.entries.iter().map(|e| e.vector.clone()).collect(),
            };
            let metadata = IndexMetadata {
                dimensions: state.dimensions,
                max_elements: state.max_elements,
                num_elements: state.entries.len(),
                chunks: state.entries.iter().map(|e| e.chunk.clone()).collect(),
            };
            (graph, metadata)
        };

        persist::write_snapshot(path, &graph, &metadata)?;
        info!(path = %path.display(), elements = metadata.num_elements, "vector index saved");
        Ok(path.to_path_buf())
    }

    /// Replace the in-memory index with the snapshot at `path`.
    ///
    /// Returns `false` when no snapshot exists. A corrupt snapshot is deleted
    /// and also reported as `false`; the in-memory index is left as it was.
    pub async fn load(&self, path: &Path) -> Result<bool, IndexError> {
        let _permit = self.lock_writes().await?;

        let sidecar = metadata_path(path);
        match (path.exists(), sidecar.exists()) {
            (false, false) => {
                info!(path = %path.display(), "no saved index found");
                return Ok(false);
            }
            (true, true) => {}
            _ => {
                warn!(path = %path.display(), "incomplete index snapshot, deleting");
                persist::remove_snapshot(path);
                return Ok(false);
            }
        }

        match self.rebuild_from_snapshot(path) {
            Ok(state) => {
                let elements = state.entries.len();
                *self.write_state() = Some(state);
                info!(path = %path.display(), elements, "vector index loaded");
                Ok(true)
            }
            Err(IndexError::Corrupt(reason)) => {
                warn!(path = %path.display(), reason = %reason, "corrupt index snapshot, deleting");
                persist::remove_snapshot(path);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn rebuild_from_snapshot(&self, path: &Path) -> Result<IndexState, IndexError> {
        let metadata = persist::read_metadata(path)?;

        // The graph is shaped by the persisted header before the blob is read.
        let mut state = IndexState::empty(metadata.dimensions, metadata.max_elements, &self.options.hnsw);
        let snapshot = persist::read_graph(path, &metadata)?;

        for (i, vector) in snapshot.vectors.iter().enumerate() {
            validate_vector(vector, state.dimensions)
                .map_err(|e| IndexError::Corrupt(format!("vector {i}: {e}")))?;
        }
        for (vector, chunk) in snapshot.vectors.into_iter().zip(metadata.chunks) {
            state.append(vector, chunk);
        }
        Ok(state)
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Up to `k` entries scoring at least `min_score`, most similar first.
    pub fn search(&self, query: &[f32], k: usize, min_score: f32) -> Result<Vec<RetrievalResult>, IndexError> {
        self.search_scoped(query, k, min_score, None)
    }

    /// Like [`search`](Self::search), limited to one session when `session_id` is set.
    pub fn search_scoped(
        &self,
        query: &[f32],
        k: usize,
        min_score: f32,
        session_id: Option<&str>,
    ) -> Result<Vec<RetrievalResult>, IndexError> {
        let guard = self.read_state();
        let state = guard.as_ref().ok_or(IndexError::NotInitialized)?;
        validate_vector(query, state.dimensions)?;

        let len = state.graph.len();
        if len == 0 || k == 0 {
            return Ok(Vec::new());
        }
        let k = k.min(len);
        let fetch = match session_id {
            None => k,
            Some(_) => (k * SCOPED_OVERSAMPLE).max(SCOPED_MIN_CANDIDATES).min(len),
        };

        let mut hits: Vec<(&IndexEntry, f32)> = state
            .graph
            .search(query, fetch)
            .into_iter()
            .filter(|(_, score)| *score >= min_score)
            .filter_map(|(id, score)| state.entries.get(id).map(|entry| (entry, score)))
            .filter(|(entry, _)| session_id.is_none_or(|s| entry.chunk.session_id == s))
            .take(k)
            .collect();

        let mut exact = false;
        if let Some(session) = session_id {
            let in_session = state
                .entries
                .iter()
                .filter(|e| e.chunk.session_id == session)
                .count();
            // other sessions crowded the candidate list
            if hits.len() < k.min(in_session) {
                hits = scan_session(&state.entries, query, session, k, min_score);
                exact = true;
            }
        }

        let results: Vec<RetrievalResult> = hits
            .into_iter()
            .enumerate()
            .map(|(i, (entry, score))| RetrievalResult {
                id: entry.id,
                score,
                rank: i + 1,
                chunk: entry.chunk.clone(),
            })
            .collect();

        debug!(k, fetched = fetch, exact, returned = results.len(), "index searched");
        Ok(results)
    }

    pub fn stats(&self) -> IndexStats {
        let guard = self.read_state();
        match guard.as_ref() {
            Some(state) => IndexStats {
                initialized: true,
                num_elements: state.entries.len(),
                num_dimensions: state.dimensions,
                max_elements: state.max_elements,
                utilization_percent: state.entries.len() as f64 / state.max_elements as f64 * 100.0,
            },
            None => IndexStats {
                initialized: false,
                num_elements: 0,
                num_dimensions: 0,
                max_elements: 0,
                utilization_percent: 0.0,
            },
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.read_state().is_some()
    }

    pub fn len(&self) -> usize {
        self.read_state().as_ref().map_or(0, |s| s.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry count per session id.
    pub fn session_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        if let Some(state) = self.read_state().as_ref() {
            for entry in &state.entries {
                *counts.entry(entry.chunk.session_id.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Clone of the chunk stored under `id`.
    pub fn chunk(&self, id: usize) -> Option<Chunk> {
        self.read_state()
            .as_ref()
            .and_then(|s| s.entries.get(id).map(|e| e.chunk.clone()))
    }
}

/// Exact top-`k` over one session's stored vectors, most similar first.
fn scan_session<'a>(
    entries: &'a [IndexEntry],
    query: &[f32],
    session_id: &str,
    k: usize,
    min_score: f32,
) -> Vec<(&'a IndexEntry, f32)> {
    let mut scored: Vec<(&IndexEntry, f32)> = entries
        .iter()
        .filter(|e| e.chunk.session_id == session_id)
        .map(|e| (e, cosine_similarity(query, &e.vector)))
        .filter(|(_, score)| *score >= min_score)
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}

/// Same scale as the graph: `1 - cosine distance`, clamped into `[0, 1]`.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(0.0, 1.0)
}

fn validate_vector(vector: &[f32], dimensions: usize) -> Result<(), IndexError> {
    if vector.len() != dimensions {
        return Err(IndexError::DimensionMismatch {
            expected: dimensions,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(IndexError::InvalidVector("contains NaN or infinite values".into()));
    }
    if vector.iter().all(|v| *v == 0.0) {
        return Err(IndexError::InvalidVector("zero-norm vector".into()));
    }
    Ok(())
}
