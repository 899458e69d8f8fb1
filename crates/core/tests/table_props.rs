//! Property-based tests over randomized operation sequences.
//!
//! A shadow model (plain maps) tracks what the table should contain; after
//! each generated sequence the table must agree with the model, satisfy its
//! structural invariants, and survive a snapshot round-trip unchanged.

use hybriddb_core::storage::{load_table, save_table};
use hybriddb_core::Table;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::{HashMap, HashSet};

const DIM: usize = 4;

#[derive(Debug, Clone)]
enum Op {
    Upsert { id: u8, value: u8, seed: u8 },
    Delete { id: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..12, 0u8..4, any::<u8>()).prop_map(|(id, value, seed)| Op::Upsert {
            id,
            value,
            seed
        }),
        1 => (0u8..12).prop_map(|id| Op::Delete { id }),
    ]
}

fn record_id(id: u8) -> String {
    format!("r{id}")
}

fn fields_for(value: u8) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    fields.insert("group".to_string(), format!("g{value}"));
    fields
}

fn embedding_for(id: u8, seed: u8) -> Vec<f32> {
    (0..DIM)
        .map(|j| ((id as usize * 31 + seed as usize * 7 + j * 13) % 97) as f32 / 97.0)
        .collect()
}

fn l2_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Applies ops to both the table and a shadow model, tracking retired labels.
fn run_ops(ops: &[Op]) -> (Table, HashMap<String, HashMap<String, String>>, HashSet<u64>) {
    let mut table = Table::new("props");
    let mut model: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut labels: HashMap<String, u64> = HashMap::new();
    let mut retired: HashSet<u64> = HashSet::new();

    for op in ops {
        match op {
            Op::Upsert { id, value, seed } => {
                let rid = record_id(*id);
                let fields = fields_for(*value);
                table
                    .upsert(&rid, fields.clone(), embedding_for(*id, *seed))
                    .expect("upsert with fixed dim never fails");
                let label = table.get(&rid).expect("record just upserted").label;
                if let Some(&previous) = labels.get(&rid) {
                    assert_eq!(previous, label, "re-upsert must preserve the label");
                }
                labels.insert(rid.clone(), label);
                model.insert(rid, fields);
            }
            Op::Delete { id } => {
                let rid = record_id(*id);
                if let Some(label) = labels.remove(&rid) {
                    retired.insert(label);
                }
                table.delete(&rid);
                model.remove(&rid);
            }
        }
    }
    (table, model, retired)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn invariants_hold_after_any_sequence(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let (table, model, retired) = run_ops(&ops);

        // Structural invariants: bijection, index coverage, dim uniformity
        table.validate().map_err(TestCaseError::fail)?;

        // Live set matches the model
        prop_assert_eq!(table.len(), model.len());
        for (rid, fields) in &model {
            let record = table.get(rid).expect("model record must be live");
            prop_assert_eq!(&record.fields, fields);
        }

        // Labels are never reissued: no live label is a retired one
        for rid in model.keys() {
            let label = table.get(rid).expect("live record").label;
            prop_assert!(!retired.contains(&label), "label {} was reissued", label);
            prop_assert!(label < table.next_label());
        }
    }

    #[test]
    fn field_index_is_sound(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let (table, model, _) = run_ops(&ops);

        for value in 0u8..4 {
            let group = format!("g{value}");
            let mut expected: Vec<String> = model
                .iter()
                .filter(|(_, fields)| fields.get("group") == Some(&group))
                .map(|(rid, _)| rid.clone())
                .collect();
            expected.sort();
            let got = table.query_field("group", &group);
            // Sorted ascending and exactly the matching live records
            prop_assert_eq!(got, expected);
        }
    }

    #[test]
    fn embedding_results_are_live_and_nearest_first(
        ops in prop::collection::vec(op_strategy(), 1..60),
        qseed in any::<u8>(),
        k in 1usize..8,
    ) {
        let (table, _model, _) = run_ops(&ops);
        let query = embedding_for(qseed % 12, qseed);

        let hits = table.query_embedding(&query, k).expect("query dim matches");
        prop_assert!(hits.len() <= k);

        let mut previous = f32::NEG_INFINITY;
        for rid in &hits {
            let record = table.get(rid);
            prop_assert!(record.is_some(), "ANN returned dead id {}", rid);
            let dist = l2_sq(&query, &record.expect("checked above").embedding);
            prop_assert!(dist >= previous, "distances must be non-decreasing");
            previous = dist;
        }
    }

    #[test]
    fn snapshot_roundtrip_is_lossless(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (table, model, _) = run_ops(&ops);
        let dir = tempfile::TempDir::new().expect("temp dir");
        save_table(&table, dir.path()).expect("save");

        let loaded = load_table(&dir.path().join("props.json")).expect("load");
        loaded.validate().map_err(TestCaseError::fail)?;

        prop_assert_eq!(loaded.records(), table.records());
        prop_assert_eq!(loaded.next_label(), table.next_label());
        for value in 0u8..4 {
            let group = format!("g{value}");
            prop_assert_eq!(
                loaded.query_field("group", &group),
                table.query_field("group", &group)
            );
        }
        if !model.is_empty() {
            let query = embedding_for(3, 17);
            prop_assert_eq!(
                loaded.query_embedding(&query, 5).expect("query"),
                table.query_embedding(&query, 5).expect("query")
            );
        }
    }

    #[test]
    fn upsert_is_idempotent(id in 0u8..12, value in 0u8..4, seed in any::<u8>()) {
        let mut once = Table::new("once");
        let mut twice = Table::new("twice");
        once.upsert(&record_id(id), fields_for(value), embedding_for(id, seed))
            .expect("upsert");
        twice
            .upsert(&record_id(id), fields_for(value), embedding_for(id, seed))
            .expect("upsert");
        twice
            .upsert(&record_id(id), fields_for(value), embedding_for(id, seed))
            .expect("upsert");

        prop_assert_eq!(once.records(), twice.records());
        prop_assert_eq!(once.next_label(), twice.next_label());
        let group = format!("g{value}");
        prop_assert_eq!(
            once.query_field("group", &group),
            twice.query_field("group", &group)
        );
        let query = embedding_for(id, seed);
        prop_assert_eq!(
            once.query_embedding(&query, 3).expect("query"),
            twice.query_embedding(&query, 3).expect("query")
        );
    }
}
