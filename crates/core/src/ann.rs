//! ANN index contract and the HNSW-backed implementation.
//!
//! A table talks to its vector index only through [`AnnIndex`]: integer
//! labels in, integer labels out. The single production implementation,
//! [`HnswAnnIndex`], owns the label↔graph-node table so that a re-add under
//! an existing label behaves as an update (the old graph node is tombstoned
//! and the label rebound to the new node).

use crate::error::{EngineError, Result};
use crate::hnsw::{knn, HnswConfig, HnswGraph};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

/// Magic bytes preceding the CRC32 footer of an index sidecar.
const SIDECAR_CRC_MAGIC: &[u8; 4] = b"HIX1";

/// Contract an ANN backend must honor.
///
/// Search is approximate; exactness is never promised. Results are ordered by
/// ascending L2 distance with ties broken by label ascending, and never
/// include soft-deleted labels.
pub trait AnnIndex: Send + Sync {
    /// Fixed vector dimension of the index.
    fn dimension(&self) -> usize;

    /// Insert `vector` under `label`. Re-adding a live label replaces its
    /// vector (update semantics); the label keeps working in searches.
    fn add(&mut self, vector: &[f32], label: u64) -> Result<()>;

    /// Soft-delete a label. Idempotent; unknown labels are a no-op.
    fn mark_deleted(&mut self, label: u64);

    /// Up to `k` labels nearest to `query`, ascending distance.
    fn search(&self, query: &[f32], k: usize) -> Vec<u64>;

    /// Returns `true` if `label` is present and not soft-deleted.
    fn contains(&self, label: u64) -> bool;

    /// Number of live labels.
    fn live_count(&self) -> usize;

    /// Highest label ever added, tombstoned ones included. `None` when the
    /// index has never held a label. The table's label allocator floor after
    /// a reload.
    fn max_label(&self) -> Option<u64>;

    /// Persist the full index state to `path` (atomic temp-file + rename).
    fn save(&self, path: &Path) -> io::Result<()>;
}

/// On-disk payload of the sidecar: the graph plus the node→label column.
/// `label_to_node` is derived, so it is rebuilt on load rather than stored.
#[derive(Deserialize)]
struct SidecarState {
    graph: HnswGraph,
    node_labels: Vec<u64>,
}

/// Borrowed view of [`SidecarState`] for serialization without cloning.
#[derive(Serialize)]
struct SidecarStateRef<'a> {
    graph: &'a HnswGraph,
    node_labels: &'a [u64],
}

/// HNSW-backed ANN index keyed by caller-assigned u64 labels.
pub struct HnswAnnIndex {
    graph: HnswGraph,
    /// Graph node id → label (parallel to the graph's node arrays).
    node_labels: Vec<u64>,
    /// Label → live graph node. Tombstoned nodes are absent.
    label_to_node: HashMap<u64, u32>,
}

impl HnswAnnIndex {
    /// Creates an empty index over ℝ^dim with default HNSW parameters.
    pub fn new(dimension: usize) -> Self {
        Self::with_config(dimension, HnswConfig::default())
    }

    /// Creates an empty index with explicit HNSW parameters.
    pub fn with_config(dimension: usize, config: HnswConfig) -> Self {
        Self {
            graph: HnswGraph::new(dimension, config),
            node_labels: Vec::new(),
            label_to_node: HashMap::new(),
        }
    }

    /// Loads a sidecar written by [`AnnIndex::save`], verifying the CRC32
    /// footer and that the stored dimension matches `dimension`.
    pub fn load(path: &Path, dimension: usize) -> Result<Self> {
        let state = read_sidecar(path)?;
        if state.graph.dimension() != dimension {
            return Err(EngineError::Corrupt(format!(
                "index sidecar dimension {} != table dimension {}",
                state.graph.dimension(),
                dimension
            )));
        }
        if state.node_labels.len() != state.graph.node_count() as usize {
            return Err(EngineError::Corrupt(format!(
                "index sidecar label column length {} != node count {}",
                state.node_labels.len(),
                state.graph.node_count()
            )));
        }

        // Rebind labels to their live nodes. Re-adds append, so for a label
        // bound more than once the later (live) node wins.
        let mut label_to_node = HashMap::new();
        for (node, &label) in state.node_labels.iter().enumerate() {
            if !state.graph.is_deleted(node as u32) {
                label_to_node.insert(label, node as u32);
            }
        }

        tracing::debug!(
            path = %path.display(),
            nodes = state.graph.node_count(),
            live = state.graph.live_count(),
            "loaded ANN index sidecar"
        );

        Ok(Self {
            graph: state.graph,
            node_labels: state.node_labels,
            label_to_node,
        })
    }
}

/// Decode and CRC-check a sidecar without constraining its dimension.
fn read_sidecar(path: &Path) -> Result<SidecarState> {
    let raw = fs::read(path)?;
    if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != SIDECAR_CRC_MAGIC {
        return Err(EngineError::Corrupt(format!(
            "index sidecar {} has no CRC footer",
            path.display()
        )));
    }
    let payload = &raw[..raw.len() - 8];
    let stored_crc = u32::from_be_bytes([
        raw[raw.len() - 4],
        raw[raw.len() - 3],
        raw[raw.len() - 2],
        raw[raw.len() - 1],
    ]);
    let computed_crc = crc32fast::hash(payload);
    if computed_crc != stored_crc {
        return Err(EngineError::Corrupt(format!(
            "index sidecar CRC32 mismatch: expected {stored_crc:#010x}, got {computed_crc:#010x}"
        )));
    }
    bincode::deserialize(payload)
        .map_err(|e| EngineError::Corrupt(format!("index sidecar decode failed: {e}")))
}

/// Highest label a sidecar retains, tombstoned entries included.
///
/// Lets a table whose records were all deleted recover its label allocator
/// floor from the surviving sidecar without attaching the index.
pub fn max_persisted_label(path: &Path) -> Result<Option<u64>> {
    let state = read_sidecar(path)?;
    Ok(state.node_labels.iter().copied().max())
}

impl AnnIndex for HnswAnnIndex {
    fn dimension(&self) -> usize {
        self.graph.dimension()
    }

    fn add(&mut self, vector: &[f32], label: u64) -> Result<()> {
        if vector.len() != self.graph.dimension() {
            return Err(EngineError::DimMismatch {
                expected: self.graph.dimension(),
                got: vector.len(),
            });
        }
        // Update semantics: tombstone the previous node bound to this label
        if let Some(old_node) = self.label_to_node.remove(&label) {
            self.graph.mark_deleted(old_node);
        }
        let node = self.graph.insert(vector);
        self.node_labels.push(label);
        self.label_to_node.insert(label, node);
        Ok(())
    }

    fn mark_deleted(&mut self, label: u64) {
        if let Some(node) = self.label_to_node.remove(&label) {
            self.graph.mark_deleted(node);
        }
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<u64> {
        let mut hits: Vec<(f32, u64)> = knn(&self.graph, query, k)
            .into_iter()
            .map(|(dist, node)| (dist, self.node_labels[node as usize]))
            .collect();
        hits.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        hits.into_iter().map(|(_, label)| label).collect()
    }

    fn contains(&self, label: u64) -> bool {
        self.label_to_node.contains_key(&label)
    }

    fn live_count(&self) -> usize {
        self.label_to_node.len()
    }

    fn max_label(&self) -> Option<u64> {
        self.node_labels.iter().copied().max()
    }

    fn save(&self, path: &Path) -> io::Result<()> {
        let state = SidecarStateRef {
            graph: &self.graph,
            node_labels: &self.node_labels,
        };
        let bytes = bincode::serialize(&state).map_err(|e| io::Error::other(e.to_string()))?;
        let crc = crc32fast::hash(&bytes);
        let mut out = Vec::with_capacity(bytes.len() + 8);
        out.extend_from_slice(&bytes);
        out.extend_from_slice(SIDECAR_CRC_MAGIC);
        out.extend_from_slice(&crc.to_be_bytes());

        let tmp = path.with_extension("index.tmp");
        fs::write(&tmp, &out)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
