//! # hybriddb-core
//!
//! Embeddable hybrid database engine: small structured records co-located
//! with dense f32 embeddings, queryable by exact field equality, approximate
//! nearest neighbor, or both intersected.
//!
//! This is the core library crate with zero async dependencies — the HTTP
//! front end lives in `hybriddb-server`. Writes flow through a single
//! background worker; reads run concurrently against the in-memory indexes.

/// ANN index contract and the HNSW-backed implementation.
pub mod ann;
/// Global configuration constants: limits, defaults, and tuning parameters.
pub mod config;
/// Engine: table registry, write pipeline, and lifecycle.
pub mod engine;
/// Engine error types.
pub mod error;
/// HNSW approximate nearest neighbor graph: structure, insertion, and search.
pub mod hnsw;
/// Core record type stored in tables.
pub mod record;
/// Disk persistence: data file + index sidecar snapshots.
pub mod storage;
/// Per-table state: primary map, inverted field index, label allocation.
pub mod table;

pub use engine::{Engine, EngineConfig, TableStats};
pub use error::{EngineError, Result};
pub use record::Record;
pub use table::Table;
