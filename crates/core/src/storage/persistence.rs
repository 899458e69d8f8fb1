//! Snapshot persistence: JSON data file + binary index sidecar per table.
//!
//! The data file is the source of truth for records; `label_to_id`, the
//! field index, and `dim` are derived from it on load. The sidecar spares
//! rebuilding the ANN graph and, because it retains tombstoned labels, also
//! carries the label allocator's high-water mark — without it a restart
//! after deleting the highest-labeled record would reissue a retired label.
//! A missing or corrupt sidecar costs a rebuild and, in that worst case,
//! the floor above the surviving records' labels, never record data.

use crate::ann::{self, HnswAnnIndex};
use crate::record::Record;
use crate::table::Table;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

/// Save a table's snapshot into `dir`: `<name>.json` plus `<name>.index`.
///
/// Both files are written to a temp path in the same directory and renamed
/// into place.
pub fn save_table(table: &Table, dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;

    let data_path = dir.join(format!("{}.json", table.name()));
    let tmp_path = dir.join(format!("{}.json.tmp", table.name()));
    let bytes =
        serde_json::to_vec(table.records()).map_err(|e| io::Error::other(e.to_string()))?;
    fs::write(&tmp_path, &bytes)?;
    fs::rename(&tmp_path, &data_path)?;

    if let Some(ann) = table.ann() {
        ann.save(&dir.join(format!("{}.index", table.name())))?;
    }

    tracing::debug!(
        table = table.name(),
        records = table.len(),
        bytes = bytes.len(),
        "saved snapshot"
    );
    Ok(())
}

/// Load one table from its data file, restoring or rebuilding the ANN index.
///
/// The sidecar is used when present and intact; otherwise the index is
/// rebuilt from the loaded records so the table never serves with partial
/// ANN coverage.
pub fn load_table(data_path: &Path) -> io::Result<Table> {
    let name = data_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid data file name: {}", data_path.display()),
            )
        })?
        .to_string();

    let raw = fs::read(data_path)?;
    let records: HashMap<String, Record> = serde_json::from_slice(&raw)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    let mut table = Table::from_records(name.clone(), records)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    let sidecar = data_path.with_extension("index");
    if table.dim() > 0 {
        // attach_ann raises the label allocator past every label the
        // sidecar retains, tombstoned ones included
        let loaded = if sidecar.exists() {
            match HnswAnnIndex::load(&sidecar, table.dim()) {
                Ok(ann) => {
                    table.attach_ann(Box::new(ann));
                    true
                }
                Err(e) => {
                    tracing::warn!(table = %name, error = %e, "index sidecar unusable, rebuilding");
                    false
                }
            }
        } else {
            false
        };
        if !loaded {
            table
                .rebuild_ann()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        }
    } else if sidecar.exists() {
        // Every record was deleted: the sidecar is all that remembers the
        // label high-water mark. Recover it so retired labels stay retired.
        match ann::max_persisted_label(&sidecar) {
            Ok(Some(max)) => table.restore_label_floor(max + 1),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(table = %name, error = %e, "index sidecar unusable, label floor lost");
            }
        }
    }

    table.validate().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("snapshot validation failed for '{name}': {e}"),
        )
    })?;

    tracing::info!(table = %name, records = table.len(), "loaded table");
    Ok(table)
}

/// Load every `*.json` table snapshot from `dir`.
///
/// Tables that fail to load are logged and skipped so one bad snapshot does
/// not block startup.
pub fn load_all_tables(dir: &Path) -> io::Result<Vec<Table>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut tables = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            match load_table(&path) {
                Ok(table) => tables.push(table),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to load table");
                }
            }
        }
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|&(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn make_table(name: &str) -> Table {
        let mut t = Table::new(name);
        t.upsert("a", fields(&[("kind", "x")]), vec![1.0, 0.0, 0.0, 0.0])
            .unwrap();
        t.upsert("b", fields(&[("kind", "y")]), vec![0.0, 1.0, 0.0, 0.0])
            .unwrap();
        t
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let table = make_table("roundtrip");
        save_table(&table, dir.path()).unwrap();

        let loaded = load_table(&dir.path().join("roundtrip.json")).unwrap();
        assert_eq!(loaded.name(), "roundtrip");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.dim(), 4);
        assert_eq!(loaded.next_label(), table.next_label());
        assert_eq!(loaded.query_field("kind", "x"), vec!["a"]);
        assert_eq!(
            loaded.query_embedding(&[1.0, 0.0, 0.0, 0.0], 1).unwrap(),
            vec!["a"]
        );
        loaded.validate().unwrap();
    }

    #[test]
    fn data_file_schema_is_stable() {
        let dir = TempDir::new().unwrap();
        let table = make_table("schema");
        save_table(&table, dir.path()).unwrap();

        let raw = fs::read(dir.path().join("schema.json")).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        let rec = &json["a"];
        assert_eq!(rec["fields"]["kind"], "x");
        assert_eq!(rec["embedding"][0], 1.0);
        assert!(rec["label"].is_u64());
    }

    #[test]
    fn missing_sidecar_triggers_rebuild() {
        let dir = TempDir::new().unwrap();
        let table = make_table("rebuild");
        save_table(&table, dir.path()).unwrap();
        fs::remove_file(dir.path().join("rebuild.index")).unwrap();

        let loaded = load_table(&dir.path().join("rebuild.json")).unwrap();
        assert_eq!(
            loaded.query_embedding(&[0.0, 1.0, 0.0, 0.0], 1).unwrap(),
            vec!["b"]
        );
        loaded.validate().unwrap();
    }

    #[test]
    fn corrupt_sidecar_triggers_rebuild() {
        let dir = TempDir::new().unwrap();
        let table = make_table("corrupt");
        save_table(&table, dir.path()).unwrap();
        let sidecar = dir.path().join("corrupt.index");
        let mut raw = fs::read(&sidecar).unwrap();
        let mid = raw.len() / 2;
        raw[mid] ^= 0xFF;
        fs::write(&sidecar, &raw).unwrap();

        let loaded = load_table(&dir.path().join("corrupt.json")).unwrap();
        assert_eq!(loaded.len(), 2);
        loaded.validate().unwrap();
    }

    #[test]
    fn corrupt_data_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.json"), b"{not json").unwrap();
        assert!(load_table(&dir.path().join("bad.json")).is_err());
    }

    #[test]
    fn load_all_skips_bad_tables() {
        let dir = TempDir::new().unwrap();
        save_table(&make_table("good"), dir.path()).unwrap();
        fs::write(dir.path().join("bad.json"), b"{not json").unwrap();

        let tables = load_all_tables(dir.path()).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name(), "good");
    }

    #[test]
    fn load_all_missing_dir_is_empty() {
        let tables = load_all_tables(Path::new("/tmp/hybriddb_missing_dir_xyz")).unwrap();
        assert!(tables.is_empty());
    }

    #[test]
    fn deleting_highest_label_does_not_reissue_it_after_reload() {
        let dir = TempDir::new().unwrap();
        let mut table = make_table("highlabel");
        table.delete("b"); // label 1, the highest allocated
        save_table(&table, dir.path()).unwrap();

        let mut loaded = load_table(&dir.path().join("highlabel.json")).unwrap();
        assert_eq!(loaded.next_label(), 2);
        loaded
            .upsert("c", fields(&[("kind", "z")]), vec![0.0, 0.0, 1.0, 0.0])
            .unwrap();
        assert_eq!(loaded.get("c").unwrap().label, 2);
        loaded.validate().unwrap();
    }

    #[test]
    fn empty_table_keeps_label_floor_from_sidecar() {
        let dir = TempDir::new().unwrap();
        let mut table = make_table("drained");
        table.delete("a");
        table.delete("b");
        save_table(&table, dir.path()).unwrap();

        let loaded = load_table(&dir.path().join("drained.json")).unwrap();
        assert_eq!(loaded.len(), 0);
        assert_eq!(loaded.next_label(), 2);
    }

    #[test]
    fn deleted_records_stay_deleted_after_reload() {
        let dir = TempDir::new().unwrap();
        let mut table = make_table("deletes");
        table.delete("a");
        save_table(&table, dir.path()).unwrap();

        let loaded = load_table(&dir.path().join("deletes.json")).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.get("a").is_none());
        let hits = loaded.query_embedding(&[1.0, 0.0, 0.0, 0.0], 5).unwrap();
        assert!(!hits.contains(&"a".to_string()));
        // The retired label is not reissued
        assert_eq!(loaded.next_label(), 2);
        loaded.validate().unwrap();
    }
}
