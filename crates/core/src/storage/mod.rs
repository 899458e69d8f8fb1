//! Storage layer: snapshot persistence for tables.
//!
//! Each table persists as a pair: a JSON data file (`<name>.json`, records
//! keyed by id) and a binary ANN index sidecar (`<name>.index`). Writes are
//! atomic (temp file + rename); a crash mid-write leaves the previous
//! snapshot intact.

/// Snapshot save/load with atomic writes.
pub mod persistence;

pub use persistence::{load_all_tables, load_table, save_table};
