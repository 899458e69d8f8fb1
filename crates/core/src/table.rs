//! Per-table state and the synchronous operations over it.
//!
//! A [`Table`] couples the primary record map with two derived indexes: the
//! inverted field index for exact-equality lookup and an owned ANN index for
//! nearest-neighbor search, linked by a per-table label allocator. Callers
//! (the engine) are responsible for locking; a table never performs I/O.

use crate::ann::{AnnIndex, HnswAnnIndex};
use crate::error::{EngineError, Result};
use crate::record::Record;
use std::collections::{BTreeSet, HashMap};

/// A named table: records, inverted field index, and ANN index.
///
/// The field index maps `field → value → ids`; the id sets are B-tree backed
/// so `query_field` yields ascending, restart-stable order. `dim` is fixed by
/// the first upsert. Labels are allocated monotonically and never reused,
/// even after deletion.
pub struct Table {
    name: String,
    dim: usize,
    records: HashMap<String, Record>,
    label_to_id: HashMap<u64, String>,
    next_label: u64,
    field_index: HashMap<String, HashMap<String, BTreeSet<String>>>,
    ann: Option<Box<dyn AnnIndex>>,
}

impl Table {
    /// Creates an empty table. The dimension is fixed by the first upsert.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dim: 0,
            records: HashMap::new(),
            label_to_id: HashMap::new(),
            next_label: 0,
            field_index: HashMap::new(),
            ann: None,
        }
    }

    /// Rebuilds a table from a loaded record map: derives `dim`,
    /// `label_to_id`, and the field index, and sets `next_label` to one past
    /// the highest surviving label. The ANN index is not attached here — see
    /// [`Table::attach_ann`], which also raises `next_label` past labels only
    /// the sidecar still remembers, and [`Table::rebuild_ann`].
    pub fn from_records(
        name: impl Into<String>,
        records: HashMap<String, Record>,
    ) -> Result<Self> {
        let mut table = Self::new(name);
        for (id, record) in &records {
            if table.dim == 0 {
                table.dim = record.embedding.len();
            } else if record.embedding.len() != table.dim {
                return Err(EngineError::Corrupt(format!(
                    "record '{id}' has embedding length {}, table dimension is {}",
                    record.embedding.len(),
                    table.dim
                )));
            }
            if let Some(other) = table.label_to_id.insert(record.label, id.clone()) {
                return Err(EngineError::Corrupt(format!(
                    "label {} assigned to both '{other}' and '{id}'",
                    record.label
                )));
            }
            table.next_label = table.next_label.max(record.label + 1);
            for (k, v) in &record.fields {
                table
                    .field_index
                    .entry(k.clone())
                    .or_default()
                    .entry(v.clone())
                    .or_default()
                    .insert(id.clone());
            }
        }
        table.records = records;
        Ok(table)
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fixed embedding dimension; 0 until the first upsert.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the table holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Next label the allocator will hand out.
    pub fn next_label(&self) -> u64 {
        self.next_label
    }

    /// Point lookup by record id.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    /// The full record map, keyed by id. Used by persistence and tests.
    pub fn records(&self) -> &HashMap<String, Record> {
        &self.records
    }

    /// The owned ANN index, if one has been created yet.
    pub fn ann(&self) -> Option<&dyn AnnIndex> {
        self.ann.as_deref()
    }

    /// Attaches a loaded ANN index (sidecar path on boot).
    ///
    /// The sidecar retains tombstoned labels, so this also raises the label
    /// allocator past every label the index has ever held — deleting the
    /// highest-labeled record must not let a restart reissue its label.
    pub fn attach_ann(&mut self, ann: Box<dyn AnnIndex>) {
        if let Some(max) = ann.max_label() {
            self.next_label = self.next_label.max(max + 1);
        }
        self.ann = Some(ann);
    }

    /// Raises the label allocator to at least `floor`.
    ///
    /// Used on load when the sidecar's label high-water mark is known but
    /// the index itself is not attached (empty table).
    pub fn restore_label_floor(&mut self, floor: u64) {
        self.next_label = self.next_label.max(floor);
    }

    /// Rebuilds the ANN index from the live records (missing-sidecar path).
    pub fn rebuild_ann(&mut self) -> Result<()> {
        if self.dim == 0 {
            return Ok(());
        }
        let mut ann = HnswAnnIndex::new(self.dim);
        for record in self.records.values() {
            ann.add(&record.embedding, record.label)?;
        }
        self.ann = Some(Box::new(ann));
        Ok(())
    }

    /// Inserts or overwrites the record under `id`.
    ///
    /// An existing record keeps its label; its old field entries are
    /// unindexed and the embedding re-added under the same label (the ANN
    /// index treats that as an update). A new record allocates the next
    /// label. Fails with `DimMismatch` when the embedding length differs
    /// from the table's fixed dimension.
    pub fn upsert(
        &mut self,
        id: &str,
        fields: HashMap<String, String>,
        embedding: Vec<f32>,
    ) -> Result<()> {
        if self.dim == 0 {
            self.dim = embedding.len();
        }
        if embedding.len() != self.dim {
            return Err(EngineError::DimMismatch {
                expected: self.dim,
                got: embedding.len(),
            });
        }
        if self.ann.is_none() {
            self.ann = Some(Box::new(HnswAnnIndex::new(self.dim)));
        }

        let existing = self
            .records
            .get(id)
            .map(|record| (record.fields.clone(), record.label));
        let label = match existing {
            Some((old_fields, label)) => {
                self.unindex_fields(id, &old_fields);
                label
            }
            None => {
                let label = self.next_label;
                self.next_label += 1;
                self.label_to_id.insert(label, id.to_string());
                label
            }
        };

        for (k, v) in &fields {
            self.field_index
                .entry(k.clone())
                .or_default()
                .entry(v.clone())
                .or_default()
                .insert(id.to_string());
        }

        let ann = self.ann.as_mut().expect("ann index exists once dim is set");
        ann.add(&embedding, label)?;
        self.records
            .insert(id.to_string(), Record::new(fields, embedding, label));
        Ok(())
    }

    /// Removes the record under `id`. Absent ids are a no-op.
    ///
    /// The label is tombstoned in the ANN index and its `label_to_id` entry
    /// erased; readers drop any ghost labels the ANN index still returns.
    pub fn delete(&mut self, id: &str) {
        // Take the record first so its fields drive the index cleanup
        let Some(record) = self.records.remove(id) else {
            return;
        };
        self.unindex_fields(id, &record.fields);
        self.label_to_id.remove(&record.label);
        if let Some(ann) = self.ann.as_mut() {
            ann.mark_deleted(record.label);
        }
    }

    /// Ids of live records with `fields[field] == value`, ascending.
    pub fn query_field(&self, field: &str, value: &str) -> Vec<String> {
        self.field_index
            .get(field)
            .and_then(|values| values.get(value))
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Up to `k` record ids nearest to `query`, nearest first.
    ///
    /// Ghost labels (deleted records the ANN index still knows) are skipped
    /// without backfill, so the result may be shorter than `k`.
    pub fn query_embedding(&self, query: &[f32], k: usize) -> Result<Vec<String>> {
        let Some(ann) = self.ann.as_ref() else {
            return Ok(Vec::new());
        };
        if query.len() != self.dim {
            return Err(EngineError::DimMismatch {
                expected: self.dim,
                got: query.len(),
            });
        }
        Ok(ann
            .search(query, k)
            .into_iter()
            .filter_map(|label| self.label_to_id.get(&label).cloned())
            .collect())
    }

    /// Up to `k` ids matching `fields[field] == value`, ordered by embedding
    /// similarity to `query`.
    ///
    /// The ANN index cannot filter by field, so `overfetch * k` candidates
    /// are retrieved and intersected with the field match set afterwards.
    pub fn query_hybrid(
        &self,
        field: &str,
        value: &str,
        query: &[f32],
        k: usize,
        overfetch: usize,
    ) -> Result<Vec<String>> {
        let Some(matched) = self
            .field_index
            .get(field)
            .and_then(|values| values.get(value))
        else {
            return Ok(Vec::new());
        };
        let candidates = self.query_embedding(query, overfetch.max(1) * k)?;
        Ok(candidates
            .into_iter()
            .filter(|id| matched.contains(id))
            .take(k)
            .collect())
    }

    /// Re-checks the structural invariants. Used after load and by tests.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (id, record) in &self.records {
            if record.embedding.len() != self.dim {
                return Err(format!(
                    "record '{id}' embedding length {} != dimension {}",
                    record.embedding.len(),
                    self.dim
                ));
            }
            if record.label >= self.next_label {
                return Err(format!(
                    "record '{id}' label {} >= next_label {}",
                    record.label, self.next_label
                ));
            }
            match self.label_to_id.get(&record.label) {
                Some(mapped) if mapped == id => {}
                Some(mapped) => {
                    return Err(format!(
                        "label {} maps to '{mapped}', record is '{id}'",
                        record.label
                    ))
                }
                None => return Err(format!("record '{id}' label {} unmapped", record.label)),
            }
            for (k, v) in &record.fields {
                let indexed = self
                    .field_index
                    .get(k)
                    .and_then(|values| values.get(v))
                    .is_some_and(|ids| ids.contains(id));
                if !indexed {
                    return Err(format!("record '{id}' missing from field_index[{k}][{v}]"));
                }
            }
            if let Some(ann) = self.ann.as_ref() {
                if !ann.contains(record.label) {
                    return Err(format!(
                        "record '{id}' label {} missing from ANN index",
                        record.label
                    ));
                }
            }
        }

        if self.label_to_id.len() != self.records.len() {
            return Err(format!(
                "label_to_id has {} entries, records has {}",
                self.label_to_id.len(),
                self.records.len()
            ));
        }

        for (field, values) in &self.field_index {
            for (value, ids) in values {
                for id in ids {
                    let held = self
                        .records
                        .get(id)
                        .and_then(|r| r.fields.get(field))
                        .is_some_and(|v| v == value);
                    if !held {
                        return Err(format!(
                            "field_index[{field}][{value}] lists '{id}' without a matching record"
                        ));
                    }
                }
            }
        }

        if let Some(ann) = self.ann.as_ref() {
            if ann.live_count() != self.records.len() {
                return Err(format!(
                    "ANN index has {} live labels, table has {} records",
                    ann.live_count(),
                    self.records.len()
                ));
            }
        }

        Ok(())
    }

    fn unindex_fields(&mut self, id: &str, fields: &HashMap<String, String>) {
        for (k, v) in fields {
            if let Some(values) = self.field_index.get_mut(k) {
                if let Some(ids) = values.get_mut(v) {
                    ids.remove(id);
                    if ids.is_empty() {
                        values.remove(v);
                    }
                }
                if values.is_empty() {
                    self.field_index.remove(k);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|&(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn users_table() -> Table {
        let mut t = Table::new("users");
        t.upsert("u1", fields(&[("name", "Alice")]), vec![1.0, 0.0, 0.0])
            .unwrap();
        t.upsert("u2", fields(&[("name", "Bob")]), vec![0.0, 1.0, 0.0])
            .unwrap();
        t.upsert("u3", fields(&[("name", "Alice")]), vec![0.0, 0.0, 1.0])
            .unwrap();
        t
    }

    #[test]
    fn dim_fixed_by_first_upsert() {
        let mut t = Table::new("t");
        assert_eq!(t.dim(), 0);
        t.upsert("a", HashMap::new(), vec![0.5, 0.5]).unwrap();
        assert_eq!(t.dim(), 2);
        let err = t.upsert("b", HashMap::new(), vec![1.0]).unwrap_err();
        assert!(matches!(err, EngineError::DimMismatch { expected: 2, got: 1 }));
    }

    #[test]
    fn query_field_sorted_ascending() {
        let t = users_table();
        assert_eq!(t.query_field("name", "Alice"), vec!["u1", "u3"]);
        assert_eq!(t.query_field("name", "Bob"), vec!["u2"]);
        assert!(t.query_field("name", "Carol").is_empty());
        assert!(t.query_field("missing", "Alice").is_empty());
    }

    #[test]
    fn query_embedding_nearest_first() {
        let t = users_table();
        let hits = t.query_embedding(&[0.9, 0.1, 0.0], 2).unwrap();
        assert_eq!(hits, vec!["u1", "u2"]);
    }

    #[test]
    fn query_embedding_dim_checked() {
        let t = users_table();
        assert!(t.query_embedding(&[1.0], 2).is_err());
    }

    #[test]
    fn empty_table_queries_are_empty() {
        let t = Table::new("empty");
        assert!(t.query_field("a", "b").is_empty());
        assert!(t.query_embedding(&[1.0, 2.0], 3).unwrap().is_empty());
        assert!(t
            .query_hybrid("a", "b", &[1.0, 2.0], 3, 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn upsert_existing_preserves_label_and_reindexes() {
        let mut t = users_table();
        let label = t.get("u1").unwrap().label;
        t.upsert("u1", fields(&[("name", "Alicia")]), vec![-1.0, 0.0, 0.0])
            .unwrap();
        assert_eq!(t.get("u1").unwrap().label, label);
        assert!(t.query_field("name", "Alice") == vec!["u3"]);
        assert_eq!(t.query_field("name", "Alicia"), vec!["u1"]);
        // New embedding wins the search
        assert_eq!(
            t.query_embedding(&[-1.0, 0.0, 0.0], 1).unwrap(),
            vec!["u1"]
        );
        assert_ne!(t.query_embedding(&[1.0, 0.0, 0.0], 1).unwrap(), vec!["u1"]);
        t.validate().unwrap();
    }

    #[test]
    fn upsert_same_content_is_idempotent() {
        let mut t = Table::new("t");
        let f = fields(&[("kind", "x")]);
        t.upsert("a", f.clone(), vec![1.0, 2.0]).unwrap();
        let label = t.get("a").unwrap().label;
        t.upsert("a", f, vec![1.0, 2.0]).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.get("a").unwrap().label, label);
        assert_eq!(t.query_field("kind", "x"), vec!["a"]);
        assert_eq!(t.query_embedding(&[1.0, 2.0], 1).unwrap(), vec!["a"]);
        t.validate().unwrap();
    }

    #[test]
    fn delete_removes_everywhere_and_labels_stay_retired() {
        let mut t = users_table();
        let deleted_label = t.get("u1").unwrap().label;
        t.delete("u1");
        assert!(t.get("u1").is_none());
        assert_eq!(t.query_field("name", "Alice"), vec!["u3"]);
        let hits = t.query_embedding(&[1.0, 0.0, 0.0], 3).unwrap();
        assert!(!hits.contains(&"u1".to_string()));
        t.validate().unwrap();

        // A later insert gets a strictly greater label
        t.upsert("u4", fields(&[("name", "Dan")]), vec![0.5, 0.5, 0.0])
            .unwrap();
        assert!(t.get("u4").unwrap().label > deleted_label);
    }

    #[test]
    fn delete_missing_is_noop() {
        let mut t = users_table();
        t.delete("nope");
        assert_eq!(t.len(), 3);
        t.validate().unwrap();
    }

    #[test]
    fn hybrid_intersects_and_preserves_ann_order() {
        let mut t = Table::new("orders");
        t.upsert("o1", fields(&[("buyer", "Alice")]), vec![1.0, 0.0])
            .unwrap();
        t.upsert("o2", fields(&[("buyer", "Alice")]), vec![0.0, 1.0])
            .unwrap();
        t.upsert("o3", fields(&[("buyer", "Bob")]), vec![1.0, 0.0])
            .unwrap();

        let hits = t.query_hybrid("buyer", "Alice", &[1.0, 0.0], 1, 10).unwrap();
        assert_eq!(hits, vec!["o1"]);
        let hits = t.query_hybrid("buyer", "Carol", &[1.0, 0.0], 1, 10).unwrap();
        assert!(hits.is_empty());
        // k larger than the match set returns all matches, ANN-ordered
        let hits = t.query_hybrid("buyer", "Alice", &[1.0, 0.0], 5, 10).unwrap();
        assert_eq!(hits, vec!["o1", "o2"]);
    }

    #[test]
    fn from_records_rebuilds_derived_state() {
        let t = users_table();
        let records = t.records().clone();
        let mut rebuilt = Table::from_records("users", records).unwrap();
        rebuilt.rebuild_ann().unwrap();
        assert_eq!(rebuilt.dim(), 3);
        assert_eq!(rebuilt.next_label(), t.next_label());
        assert_eq!(rebuilt.query_field("name", "Alice"), vec!["u1", "u3"]);
        assert_eq!(
            rebuilt.query_embedding(&[0.9, 0.1, 0.0], 2).unwrap(),
            vec!["u1", "u2"]
        );
        rebuilt.validate().unwrap();
    }

    #[test]
    fn from_records_rejects_mixed_dimensions() {
        let mut records = HashMap::new();
        records.insert(
            "a".to_string(),
            Record::new(HashMap::new(), vec![1.0, 2.0], 0),
        );
        records.insert("b".to_string(), Record::new(HashMap::new(), vec![1.0], 1));
        assert!(Table::from_records("bad", records).is_err());
    }

    #[test]
    fn from_records_rejects_duplicate_labels() {
        let mut records = HashMap::new();
        records.insert(
            "a".to_string(),
            Record::new(HashMap::new(), vec![1.0, 2.0], 0),
        );
        records.insert(
            "b".to_string(),
            Record::new(HashMap::new(), vec![3.0, 4.0], 0),
        );
        assert!(Table::from_records("bad", records).is_err());
    }
}
