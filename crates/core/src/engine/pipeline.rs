//! Write pipeline: bounded task queue drained by a single background worker.
//!
//! Producers enqueue under a small mutex and signal a condvar; the worker
//! drains batches, applies each task under one exclusive engine-lock hold,
//! then snapshots the touched tables under the shared lock. Per-task errors
//! are logged and the task dropped — the worker never dies. On stop the
//! queue is drained fully and snapshotted before the worker exits.

use crate::storage::persistence::save_table;
use crate::table::Table;
use crate::error::{EngineError, Result};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A queued mutation. Tasks from one producer apply in submission order.
#[derive(Debug, Clone)]
pub enum WriteTask {
    Upsert {
        table: String,
        id: String,
        fields: HashMap<String, String>,
        embedding: Vec<f32>,
    },
    Delete {
        table: String,
        id: String,
    },
}

impl WriteTask {
    fn table(&self) -> &str {
        match self {
            WriteTask::Upsert { table, .. } | WriteTask::Delete { table, .. } => table,
        }
    }
}

/// Worker lifecycle. Transitions are one-way: Running → Stopping → Stopped.
/// Producers may still enqueue while Stopping; the worker drains everything
/// before moving to Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Running,
    Stopping,
    Stopped,
}

struct QueueInner {
    tasks: VecDeque<WriteTask>,
    state: PipelineState,
    /// Tasks drained by the worker but not yet applied and snapshotted.
    in_flight: usize,
}

/// Bounded FIFO shared between producers and the worker.
pub(crate) struct TaskQueue {
    inner: Mutex<QueueInner>,
    /// Signaled on push and on close; the worker waits here.
    task_ready: Condvar,
    /// Signaled when the worker drains; full producers wait here.
    space_ready: Condvar,
    /// Signaled when the queue is empty and nothing is in flight.
    drained: Condvar,
    capacity: usize,
}

impl TaskQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                tasks: VecDeque::new(),
                state: PipelineState::Running,
                in_flight: 0,
            }),
            task_ready: Condvar::new(),
            space_ready: Condvar::new(),
            drained: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue a task, blocking while the queue is at capacity.
    /// Fails with `QueueClosed` once the worker has stopped.
    pub(crate) fn push(&self, task: WriteTask) -> Result<()> {
        let mut inner = self.inner.lock();
        while inner.tasks.len() >= self.capacity && inner.state != PipelineState::Stopped {
            self.space_ready.wait(&mut inner);
        }
        if inner.state == PipelineState::Stopped {
            return Err(EngineError::QueueClosed);
        }
        inner.tasks.push_back(task);
        self.task_ready.notify_one();
        Ok(())
    }

    /// Begin shutdown: the worker will drain the queue, snapshot, and exit.
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.state == PipelineState::Running {
            inner.state = PipelineState::Stopping;
        }
        self.task_ready.notify_all();
    }

    /// Block until every queued task has been applied and snapshotted.
    pub(crate) fn wait_drained(&self) {
        let mut inner = self.inner.lock();
        while !inner.tasks.is_empty() || inner.in_flight > 0 {
            self.drained.wait(&mut inner);
        }
    }
}

/// The worker loop. Runs on a dedicated thread until the queue reports
/// Stopping and is fully drained.
pub(crate) fn run_worker(
    queue: Arc<TaskQueue>,
    tables: Arc<RwLock<HashMap<String, Table>>>,
    data_dir: PathBuf,
    batch_max: usize,
    flush_interval: Duration,
) {
    // Tables touched since their last successful snapshot. A failed save
    // keeps the table here so the next cycle retries it.
    let mut dirty: HashSet<String> = HashSet::new();

    loop {
        let (batch, stopping) = {
            let mut inner = queue.inner.lock();
            if inner.tasks.is_empty() && inner.state == PipelineState::Running {
                let _ = queue.task_ready.wait_for(&mut inner, flush_interval);
            }
            let stopping = inner.state != PipelineState::Running;
            let take = if stopping {
                inner.tasks.len()
            } else {
                inner.tasks.len().min(batch_max)
            };
            let batch: Vec<WriteTask> = inner.tasks.drain(..take).collect();
            inner.in_flight = batch.len();
            if !batch.is_empty() {
                queue.space_ready.notify_all();
            }
            (batch, stopping)
        };

        for task in batch {
            dirty.insert(task.table().to_string());
            // One exclusive hold per task so readers interleave with the batch
            let mut guard = tables.write();
            apply_task(&mut guard, task);
        }

        if !dirty.is_empty() {
            let guard = tables.read();
            dirty.retain(|name| match guard.get(name) {
                Some(table) => match save_table(table, &data_dir) {
                    Ok(()) => false,
                    Err(e) => {
                        tracing::error!(table = %name, error = %e, "snapshot failed, will retry");
                        true
                    }
                },
                None => false,
            });
        }

        let mut inner = queue.inner.lock();
        inner.in_flight = 0;
        if inner.tasks.is_empty() {
            queue.drained.notify_all();
            if stopping {
                inner.state = PipelineState::Stopped;
                queue.space_ready.notify_all();
                tracing::info!("write worker stopped");
                return;
            }
        }
    }
}

/// Apply one task to the table map. Errors are logged and the task dropped.
fn apply_task(tables: &mut HashMap<String, Table>, task: WriteTask) {
    match task {
        WriteTask::Upsert {
            table,
            id,
            fields,
            embedding,
        } => {
            let t = tables
                .entry(table.clone())
                .or_insert_with(|| Table::new(table.clone()));
            if let Err(e) = t.upsert(&id, fields, embedding) {
                tracing::warn!(table = %table, id = %id, error = %e, "dropping upsert");
            }
        }
        WriteTask::Delete { table, id } => {
            if let Some(t) = tables.get_mut(&table) {
                t.delete(&id);
            }
        }
    }
}
