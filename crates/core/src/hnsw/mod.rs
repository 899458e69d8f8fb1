//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor graph.
//!
//! Vectors are stored raw (f32) in a contiguous arena with a Struct-of-Arrays
//! layout: separate arrays for neighbor lists, layer assignments, and the
//! soft-delete bitmap. Distances are squared Euclidean. Deleted nodes stay in
//! the graph for navigation but are excluded from results.

/// Squared-L2 distance.
pub mod distance;
/// Graph structure and configuration.
pub mod graph;
/// Insertion with bidirectional connections and heuristic pruning.
pub mod insert;
/// Layered greedy search.
pub mod search;

pub use graph::{HnswConfig, HnswGraph};
pub use search::knn;
