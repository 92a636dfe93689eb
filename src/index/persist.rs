//! On-disk snapshot format.
//!
//! A snapshot is two files: the binary graph file (bincode: header plus raw
//! vectors in id order) and a JSON sidecar next to it holding the header and
//! the full chunk list. The sidecar is read and validated first, so a bad
//! binary file is never touched for an index whose metadata is already wrong.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::IndexError;
use crate::types::Chunk;

/// Contents of the binary graph file.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GraphSnapshot {
    pub dimensions: usize,
    pub max_elements: usize,
    pub vectors: Vec<Vec<f32>>,
}

/// Contents of the JSON sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    pub dimensions: usize,
    pub max_elements: usize,
    pub num_elements: usize,
    pub chunks: Vec<Chunk>,
}

impl IndexMetadata {
    /// Structural checks that need nothing but the sidecar itself.
    pub(crate) fn validate(&self) -> Result<(), IndexError> {
        if self.dimensions == 0 {
            return Err(IndexError::Corrupt("metadata has zero dimensions".into()));
        }
        if self.num_elements > self.max_elements {
            return Err(IndexError::Corrupt(format!(
                "metadata lists {} elements but capacity is {}",
                self.num_elements, self.max_elements
            )));
        }
        if self.chunks.len() != self.num_elements {
            return Err(IndexError::Corrupt(format!(
                "metadata numElements is {} but holds {} chunks",
                self.num_elements,
                self.chunks.len()
            )));
        }
        Ok(())
    }
}

/// Sidecar path for a graph file: `index.bin` -> `index.meta.json`.
pub fn metadata_path(graph_path: &Path) -> PathBuf {
    graph_path.with_extension("meta.json")
}

pub(crate) fn write_snapshot(
    graph_path: &Path,
    graph: &GraphSnapshot,
    metadata: &IndexMetadata,
) -> Result<(), IndexError> {
    if let Some(parent) = graph_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    write_atomic(graph_path, |writer| {
        bincode::serialize_into(writer, graph)
            .map_err(|e| IndexError::Serialization(format!("graph snapshot: {e}")))
    })?;

    write_atomic(&metadata_path(graph_path), |writer| {
        serde_json::to_writer_pretty(writer, metadata)
            .map_err(|e| IndexError::Serialization(format!("metadata sidecar: {e}")))
    })
}

/// Write through a temp file and rename it into place.
fn write_atomic<F>(dest: &Path, write: F) -> Result<(), IndexError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), IndexError>,
{
    let tmp_path = dest.with_extension("tmp");
    let mut writer = BufWriter::new(File::create(&tmp_path)?);
    write(&mut writer)?;
    writer.flush()?;
    drop(writer);
    std::fs::rename(&tmp_path, dest)?;
    Ok(())
}

pub(crate) fn read_metadata(graph_path: &Path) -> Result<IndexMetadata, IndexError> {
    let file = File::open(metadata_path(graph_path))?;
    let metadata: IndexMetadata = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| IndexError::Corrupt(format!("unreadable metadata sidecar: {e}")))?;
    metadata.validate()?;
    Ok(metadata)
}

/// Read the binary graph file, checking it against already-validated metadata.
pub(crate) fn read_graph(graph_path: &Path, metadata: &IndexMetadata) -> Result<GraphSnapshot, IndexError> {
    let file = File::open(graph_path)?;
    let snapshot: GraphSnapshot = bincode::deserialize_from(BufReader::new(file))
        .map_err(|e| IndexError::Corrupt(format!("unreadable graph file: {e}")))?;

    if snapshot.dimensions != metadata.dimensions || snapshot.max_elements != metadata.max_elements {
        return Err(IndexError::Corrupt(format!(
            "graph header ({}, {}) does not match metadata ({}, {})",
            snapshot.dimensions, snapshot.max_elements, metadata.dimensions, metadata.max_elements
        )));
    }
    if snapshot.vectors.len() != metadata.num_elements {
        return Err(IndexError::Corrupt(format!(
            "graph holds {} vectors, metadata expects {}",
            snapshot.vectors.len(),
            metadata.num_elements
        )));
    }
    Ok(snapshot)
}

/// Delete both snapshot files, ignoring ones that are already gone.
pub(crate) fn remove_snapshot(graph_path: &Path) {
    for path in [graph_path.to_path_buf(), metadata_path(graph_path)] {
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to delete snapshot file"),
        }
    }
}
