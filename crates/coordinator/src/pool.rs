//! The §6 pool contract: `submit(fn, *args) -> future`, where the future
//! supports non-blocking `done()` and blocking, exception-reraising
//! `result()`. Implemented over a tokio runtime's `spawn_blocking`, since
//! each worker task is dominated by blocking file I/O -- matching the
//! teacher's preference for tokio over a bespoke thread pool
//! (`crates/agent/src/main.rs` builds a multi-thread tokio runtime rather
//! than rolling one).

use load_storage::LoadStorageConfig;
use normalize_storage::NormalizeStorageConfig;
use schema_catalog::StoredSchema;
use std::path::PathBuf;
use std::sync::Arc;
use worker_task::{process_batch, WorkerConfig, WorkerOutput};

/// Everything one worker invocation needs, kept together so the
/// coordinator can rebuild and resubmit a task after a conflict
/// (`spec.md` §4.4 "needed for retry").
#[derive(Clone)]
pub struct BatchParams {
    pub worker_config: Arc<WorkerConfig>,
    pub normalize_storage_config: NormalizeStorageConfig,
    pub load_storage_config: LoadStorageConfig,
    pub schema_snapshot: StoredSchema,
    pub load_id: String,
    /// This batch's disambiguator within `load_id`'s shared temp load
    /// package, so its output filenames never collide with another
    /// concurrently-running or retried batch's (`spec.md` §5).
    pub unique: String,
    pub files: Vec<PathBuf>,
}

pub struct TaskHandle {
    join: tokio::task::JoinHandle<Result<WorkerOutput, worker_task::Error>>,
}

impl TaskHandle {
    /// Non-blocking completion check.
    pub fn done(&self) -> bool {
        self.join.is_finished()
    }

    /// Blocking (from the caller's perspective: `.await`s) retrieval; a
    /// worker exception is re-raised here rather than swallowed.
    pub async fn result(self) -> Result<WorkerOutput, worker_task::Error> {
        match self.join.await {
            Ok(result) => result,
            Err(join_err) => {
                // A worker can only disappear this way via panic; a signal
                // doesn't cancel in-flight tasks (`spec.md` §5).
                std::panic::resume_unwind(join_err.into_panic())
            }
        }
    }
}

/// The pool abstraction the coordinator dispatches against. `max_workers`
/// sizes the partition in `group_worker_files`; absent a real pool,
/// implementations should default to 1 (`spec.md` §6).
pub trait Pool: Send + Sync {
    fn max_workers(&self) -> usize;
    fn submit(&self, params: BatchParams) -> TaskHandle;
}

/// A pool backed by a tokio runtime handle, spawning each batch onto the
/// blocking thread pool.
pub struct TokioPool {
    handle: tokio::runtime::Handle,
    max_workers: usize,
}

impl TokioPool {
    pub fn new(handle: tokio::runtime::Handle, max_workers: usize) -> Self {
        Self { handle, max_workers: max_workers.max(1) }
    }
}

impl Pool for TokioPool {
    fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn submit(&self, params: BatchParams) -> TaskHandle {
        let join = self.handle.spawn_blocking(move || {
            process_batch(
                &params.worker_config,
                params.normalize_storage_config,
                params.load_storage_config,
                params.schema_snapshot,
                &params.load_id,
                &params.unique,
                &params.files,
            )
        });
        TaskHandle { join }
    }
}

/// A null pool that runs every task synchronously on the calling thread --
/// used by `map_single` and by a `run` invoked with no real pool
/// (`spec.md` §4.5 `run(pool)`: "a null pool that executes synchronously").
pub struct SynchronousPool;

impl Pool for SynchronousPool {
    fn max_workers(&self) -> usize {
        1
    }

    fn submit(&self, params: BatchParams) -> TaskHandle {
        let outcome = process_batch(
            &params.worker_config,
            params.normalize_storage_config,
            params.load_storage_config,
            params.schema_snapshot,
            &params.load_id,
            &params.unique,
            &params.files,
        );
        let join = tokio::spawn(async move { outcome });
        TaskHandle { join }
    }
}
