//! Core record type for hybrid.db.
//!
//! A [`Record`] is the unit of storage in a table: a flat string-to-string
//! field map, one embedding vector, and the table-assigned label that keys
//! the embedding in the ANN index.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A stored record: structured fields plus one embedding.
///
/// `label` is a per-table dense integer, stable for the record's lifetime and
/// never reused after deletion. The embedding length always equals the owning
/// table's dimension. This struct is serialized as-is into the table's JSON
/// data file, keyed by the record id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Structured attributes, indexed for exact-equality lookup.
    pub fields: HashMap<String, String>,
    /// Dense f32 embedding, indexed for nearest-neighbor search.
    pub embedding: Vec<f32>,
    /// ANN index key assigned by the owning table.
    pub label: u64,
}

impl Record {
    /// Creates a record with the given label.
    pub fn new(fields: HashMap<String, String>, embedding: Vec<f32>, label: u64) -> Self {
        Self {
            fields,
            embedding,
            label,
        }
    }
}
