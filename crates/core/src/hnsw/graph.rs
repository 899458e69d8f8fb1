//! HNSW graph structure and configuration.
//!
//! [`HnswConfig`] defines tuning parameters (M, ef_construction, ef_search).
//! [`HnswGraph`] stores nodes in Struct-of-Arrays layout: one contiguous f32
//! arena for vectors plus parallel arrays for neighbor lists, layers, and the
//! soft-delete bitmap.

use crate::config;
use serde::{Deserialize, Serialize};

/// Configuration parameters for an HNSW graph.
///
/// Controls the trade-off between build speed, search speed, recall, and
/// memory usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Number of bidirectional links per node (except layer 0, which uses `m_max0`).
    pub m: usize,
    /// Maximum links per node at layer 0 (typically `2 * m`).
    pub m_max0: usize,
    /// Candidate list size during construction.
    pub ef_construction: usize,
    /// Candidate list size during search (higher = better recall, slower).
    pub ef_search: usize,
    /// Maximum number of layers.
    pub max_layers: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: config::HNSW_DEFAULT_M,
            m_max0: config::HNSW_DEFAULT_M * 2,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: config::HNSW_DEFAULT_EF_SEARCH,
            max_layers: config::HNSW_DEFAULT_MAX_LAYERS,
        }
    }
}

/// HNSW graph over squared-L2 distance, SoA layout.
#[derive(Debug, Serialize, Deserialize)]
pub struct HnswGraph {
    pub config: HnswConfig,
    /// Vector arena: node `i` occupies `[i * dimension, (i + 1) * dimension)`.
    pub(crate) vectors: Vec<f32>,
    /// `neighbors[node][layer]` = neighbor ids at that layer.
    pub(crate) neighbors: Vec<Vec<Vec<u32>>>,
    /// Top layer of each node.
    pub(crate) levels: Vec<u8>,
    /// Soft-delete bitmap; deleted nodes navigate but never match.
    pub(crate) deleted: Vec<bool>,
    pub(crate) entry_point: Option<u32>,
    pub(crate) max_level: usize,
    pub(crate) dimension: usize,
    pub(crate) node_count: u32,
}

impl HnswGraph {
    /// Creates a new empty graph for vectors of the given dimension.
    pub fn new(dimension: usize, config: HnswConfig) -> Self {
        Self {
            config,
            vectors: Vec::new(),
            neighbors: Vec::new(),
            levels: Vec::new(),
            deleted: Vec::new(),
            entry_point: None,
            max_level: 0,
            dimension,
            node_count: 0,
        }
    }

    /// Creates a new empty graph with default configuration.
    pub fn with_default_config(dimension: usize) -> Self {
        Self::new(dimension, HnswConfig::default())
    }

    /// Fixed vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Total nodes ever inserted, including soft-deleted ones.
    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// Number of live (non-deleted) nodes.
    pub fn live_count(&self) -> usize {
        self.deleted.iter().filter(|&&d| !d).count()
    }

    /// Returns `true` if the graph has no live nodes.
    pub fn is_empty(&self) -> bool {
        self.live_count() == 0
    }

    /// The stored vector of a node. O(1) slice into the arena.
    #[inline]
    pub fn vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    /// Returns `true` if the node has been soft-deleted.
    #[inline]
    pub fn is_deleted(&self, id: u32) -> bool {
        self.deleted[id as usize]
    }

    /// Soft-delete a node. Idempotent; out-of-bounds ids return `false`.
    pub fn mark_deleted(&mut self, id: u32) -> bool {
        match self.deleted.get_mut(id as usize) {
            Some(slot) => {
                *slot = true;
                true
            }
            None => false,
        }
    }

    /// Sample a layer for a new node from the exponential distribution
    /// `floor(-ln(U) / ln(M))`, capped at `max_layers - 1`.
    pub(crate) fn random_level(&self) -> usize {
        let ml = 1.0 / (self.config.m as f64).ln();
        let r: f64 = rand::random();
        let level = (-r.ln() * ml).floor() as usize;
        level.min(self.config.max_layers - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_graph_is_empty() {
        let g = HnswGraph::with_default_config(32);
        assert_eq!(g.dimension(), 32);
        assert_eq!(g.node_count(), 0);
        assert!(g.is_empty());
        assert!(g.entry_point.is_none());
    }

    #[test]
    fn mark_deleted_and_live_count() {
        let mut g = HnswGraph::with_default_config(2);
        g.insert(&[1.0, 0.0]);
        g.insert(&[0.0, 1.0]);
        assert_eq!(g.live_count(), 2);
        assert!(g.mark_deleted(0));
        assert!(g.is_deleted(0));
        assert_eq!(g.live_count(), 1);
        // Idempotent
        assert!(g.mark_deleted(0));
        assert_eq!(g.live_count(), 1);
        // Out of bounds
        assert!(!g.mark_deleted(99));
    }

    #[test]
    fn random_level_respects_cap() {
        let g = HnswGraph::with_default_config(4);
        for _ in 0..200 {
            assert!(g.random_level() < g.config.max_layers);
        }
    }

    #[test]
    fn vector_slices_arena() {
        let mut g = HnswGraph::with_default_config(3);
        g.insert(&[1.0, 2.0, 3.0]);
        g.insert(&[4.0, 5.0, 6.0]);
        assert_eq!(g.vector(0), &[1.0, 2.0, 3.0]);
        assert_eq!(g.vector(1), &[4.0, 5.0, 6.0]);
    }
}
