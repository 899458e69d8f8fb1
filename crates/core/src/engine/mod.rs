//! The engine: table registry, write pipeline, and lifecycle.
//!
//! The engine owns every table behind one reader-writer lock. Reads take the
//! lock shared and run directly against the in-memory indexes; writes are
//! enqueued and applied asynchronously by the pipeline worker, which takes
//! the lock exclusive per task. Startup loads every snapshot found in the
//! data directory; drop closes the queue and joins the worker, whose
//! drain-before-exit rule guarantees the final flush.

/// Bounded task queue and the background worker loop.
pub mod pipeline;

use crate::config;
use crate::error::Result;
use crate::record::Record;
use crate::storage::persistence::load_all_tables;
use crate::table::Table;
use parking_lot::RwLock;
use pipeline::{run_worker, TaskQueue, WriteTask};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Engine tuning, filled from CLI flags by the server.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding `<table>.json` + `<table>.index` snapshot pairs.
    pub data_dir: PathBuf,
    /// Write queue capacity; producers block when it is full.
    pub queue_capacity: usize,
    /// Maximum tasks applied per worker batch.
    pub batch_max: usize,
    /// How long the worker waits for tasks before re-checking dirty tables.
    pub flush_interval: Duration,
    /// Hybrid query overfetch multiplier.
    pub hybrid_overfetch: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(config::DEFAULT_DATA_DIR),
            queue_capacity: config::WRITE_QUEUE_CAPACITY,
            batch_max: config::WRITE_BATCH_MAX,
            flush_interval: Duration::from_secs(config::FLUSH_INTERVAL_SECS),
            hybrid_overfetch: config::HYBRID_OVERFETCH_FACTOR,
        }
    }
}

/// Summary of one table, for `/tables` and `/health`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TableStats {
    pub name: String,
    pub records: usize,
    pub dim: usize,
    pub next_label: u64,
}

/// Top-level handle: table registry + write pipeline.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct Engine {
    tables: Arc<RwLock<HashMap<String, Table>>>,
    queue: Arc<TaskQueue>,
    worker: Option<JoinHandle<()>>,
    config: EngineConfig,
}

impl Engine {
    /// Boot the engine: create the data directory if absent, load every
    /// table snapshot, and start the pipeline worker.
    pub fn open(config: EngineConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let mut map = HashMap::new();
        for table in load_all_tables(&config.data_dir)? {
            map.insert(table.name().to_string(), table);
        }
        tracing::info!(
            data_dir = %config.data_dir.display(),
            tables = map.len(),
            "engine ready"
        );

        let tables = Arc::new(RwLock::new(map));
        let queue = Arc::new(TaskQueue::new(config.queue_capacity));

        let worker_tables = Arc::clone(&tables);
        let worker_queue = Arc::clone(&queue);
        let worker_dir = config.data_dir.clone();
        let batch_max = config.batch_max;
        let flush_interval = config.flush_interval;
        let worker = std::thread::Builder::new()
            .name("hybriddb-writer".into())
            .spawn(move || {
                run_worker(worker_queue, worker_tables, worker_dir, batch_max, flush_interval);
            })?;

        Ok(Self {
            tables,
            queue,
            worker: Some(worker),
            config,
        })
    }

    /// Enqueue an upsert. Applied asynchronously; visibility requires
    /// [`Engine::flush`] or polling.
    pub fn upsert(
        &self,
        table: impl Into<String>,
        id: impl Into<String>,
        fields: HashMap<String, String>,
        embedding: Vec<f32>,
    ) -> Result<()> {
        self.queue.push(WriteTask::Upsert {
            table: table.into(),
            id: id.into(),
            fields,
            embedding,
        })
    }

    /// Enqueue a delete. Deleting a missing record is a no-op.
    pub fn delete(&self, table: impl Into<String>, id: impl Into<String>) -> Result<()> {
        self.queue.push(WriteTask::Delete {
            table: table.into(),
            id: id.into(),
        })
    }

    /// Exact field-equality lookup; ids ascending. Unknown table ⇒ empty.
    pub fn query_field(&self, table: &str, field: &str, value: &str) -> Vec<String> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.query_field(field, value))
            .unwrap_or_default()
    }

    /// ANN search; ids nearest-first. Unknown table ⇒ empty.
    pub fn query_embedding(&self, table: &str, query: &[f32], k: usize) -> Result<Vec<String>> {
        match self.tables.read().get(table) {
            Some(t) => t.query_embedding(query, k),
            None => Ok(Vec::new()),
        }
    }

    /// Field filter intersected with ANN ordering. Unknown table ⇒ empty.
    pub fn query_hybrid(
        &self,
        table: &str,
        field: &str,
        value: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<String>> {
        match self.tables.read().get(table) {
            Some(t) => t.query_hybrid(field, value, query, k, self.config.hybrid_overfetch),
            None => Ok(Vec::new()),
        }
    }

    /// Point lookup. Unknown table or id ⇒ `None`.
    pub fn get_record(&self, table: &str, id: &str) -> Option<Record> {
        self.tables.read().get(table).and_then(|t| t.get(id)).cloned()
    }

    /// Per-table summaries, sorted by name.
    pub fn table_stats(&self) -> Vec<TableStats> {
        let guard = self.tables.read();
        let mut stats: Vec<TableStats> = guard
            .values()
            .map(|t| TableStats {
                name: t.name().to_string(),
                records: t.len(),
                dim: t.dim(),
                next_label: t.next_label(),
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Block until every task enqueued so far has been applied and
    /// snapshotted. This is the read-your-writes synchronization point.
    pub fn flush(&self) {
        self.queue.wait_drained();
    }

    /// The engine's snapshot directory.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("write worker panicked during shutdown");
            }
        }
    }
}
