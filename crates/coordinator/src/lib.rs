//! The coordinator (`spec.md` §4.4): splits work by file, dispatches it to
//! a pool, merges per-task schema deltas back into a single authoritative
//! `Schema`, and retries a task whose merge conflicts with one that was
//! absorbed first.

pub mod merge;
pub mod partition;
pub mod pool;

pub use partition::group_worker_files;
pub use pool::{BatchParams, Pool, SynchronousPool, TaskHandle, TokioPool};

use load_storage::LoadStorageConfig;
use normalize_storage::NormalizeStorageConfig;
use schema_catalog::{RowCounts, Schema, SchemaUpdate};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use worker_task::WorkerConfig;

/// A conflicting batch is retried with a refreshed snapshot this many times
/// before the coordinator gives up and escalates -- the Run Driver then
/// falls back to `map_single` (`spec.md` §4.5 step 3). In practice
/// conflicts shrink as the schema widens, so this bound is rarely hit
/// outside pathological (e.g. mocked always-conflicting) schemas.
pub const MAX_RETRIES_PER_BATCH: u32 = 8;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("worker task failed: {0}")]
    Worker(#[from] worker_task::Error),
    #[error("column-coercion conflict could not be resolved after {0} retries")]
    UnresolvedConflict(u32),
}

/// Poll interval for the gather loop in `map_parallel` (`spec.md` §5(a)).
const POLL_INTERVAL: Duration = Duration::from_millis(300);

struct InFlight {
    handle: TaskHandle,
    params: BatchParams,
    retries: u32,
}

/// Splits `files` across the pool's worker count, dispatches, and merges
/// results into `schema` as they complete -- in *completion* order, not
/// submission order (`spec.md` §5). A task whose merge conflicts has its
/// output files reclaimed and is resubmitted against a fresh snapshot; a
/// task can cycle through that arbitrarily many times in principle, bounded
/// here by [`MAX_RETRIES_PER_BATCH`].
pub async fn map_parallel(
    pool: &dyn Pool,
    schema: &mut Schema,
    worker_config: Arc<WorkerConfig>,
    normalize_storage_config: &NormalizeStorageConfig,
    load_storage_config: &LoadStorageConfig,
    load_id: &str,
    files: &[PathBuf],
) -> Result<(SchemaUpdate, RowCounts), Error> {
    let batches = group_worker_files(files, pool.max_workers());

    let mut in_flight: Vec<InFlight> = batches
        .into_iter()
        .enumerate()
        .map(|(i, batch)| {
            let params = BatchParams {
                worker_config: worker_config.clone(),
                normalize_storage_config: normalize_storage_config.clone(),
                load_storage_config: load_storage_config.clone(),
                schema_snapshot: schema.to_dict(),
                load_id: load_id.to_string(),
                unique: format!("w{i}"),
                files: batch,
            };
            InFlight { handle: pool.submit(params.clone()), params, retries: 0 }
        })
        .collect();

    let mut accumulated = SchemaUpdate::new();
    let mut row_counts = RowCounts::new();

    while !in_flight.is_empty() {
        let mut progressed = false;
        let mut i = 0;
        while i < in_flight.len() {
            if !in_flight[i].handle.done() {
                i += 1;
                continue;
            }
            progressed = true;
            let task = in_flight.remove(i);
            let retries = task.retries;
            let params = task.params;

            match task.handle.result().await {
                Ok(output) => match merge::update_table(schema, &output.schema_updates) {
                    Ok(()) => {
                        accumulated.extend(output.schema_updates);
                        row_counts.merge(&output.row_counts);
                    }
                    Err(conflict) => {
                        tracing::warn!(%conflict, retries, "column-coercion conflict merging worker output; reclaiming and retrying");
                        reclaim_output_files(&output.closed_files);
                        if retries + 1 > MAX_RETRIES_PER_BATCH {
                            return Err(Error::UnresolvedConflict(retries + 1));
                        }
                        let mut retry_params = params;
                        retry_params.schema_snapshot = schema.to_dict();
                        retry_params.unique = format!("{}-r{}", retry_params.unique, retries + 1);
                        in_flight.push(InFlight {
                            handle: pool.submit(retry_params.clone()),
                            params: retry_params,
                            retries: retries + 1,
                        });
                    }
                },
                // The worker itself hit a coercion conflict merging its own
                // batch against a stale snapshot -- same recoverable path.
                Err(worker_task::Error::ColumnCoercionConflict(conflict)) => {
                    tracing::warn!(%conflict, retries, "worker raised column-coercion conflict against its own snapshot; retrying");
                    if retries + 1 > MAX_RETRIES_PER_BATCH {
                        return Err(Error::UnresolvedConflict(retries + 1));
                    }
                    let mut retry_params = params;
                    retry_params.schema_snapshot = schema.to_dict();
                    retry_params.unique = format!("{}-r{}", retry_params.unique, retries + 1);
                    in_flight.push(InFlight {
                        handle: pool.submit(retry_params.clone()),
                        params: retry_params,
                        retries: retries + 1,
                    });
                }
                Err(other) => {
                    tracing::error!(error = %other, "worker task failed fatally");
                    return Err(Error::Worker(other));
                }
            }
        }
        if !progressed && !in_flight.is_empty() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    Ok((accumulated, row_counts))
}

/// Directly invokes one worker call in-process with all files in a single
/// batch (`spec.md` §4.4 `map_single`). Single-threaded execution
/// linearizes all schema widening, so it cannot itself produce a
/// column-coercion conflict against its own snapshot in the way a
/// concurrent retry can.
pub async fn map_single(
    pool: &dyn Pool,
    schema: &mut Schema,
    worker_config: Arc<WorkerConfig>,
    normalize_storage_config: &NormalizeStorageConfig,
    load_storage_config: &LoadStorageConfig,
    load_id: &str,
    files: &[PathBuf],
) -> Result<(SchemaUpdate, RowCounts), Error> {
    let params = BatchParams {
        worker_config,
        normalize_storage_config: normalize_storage_config.clone(),
        load_storage_config: load_storage_config.clone(),
        schema_snapshot: schema.to_dict(),
        load_id: load_id.to_string(),
        unique: "single".to_string(),
        files: files.to_vec(),
    };
    let handle = pool.submit(params);
    let output = handle.result().await?;
    merge::update_table(schema, &output.schema_updates)?;
    Ok((output.schema_updates, output.row_counts))
}

fn reclaim_output_files(files: &[PathBuf]) {
    for file in files {
        match std::fs::remove_file(file) {
            Ok(()) => {}
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => tracing::warn!(file = %file.display(), error = %source, "failed to reclaim conflicting task output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use load_storage::DestinationCapabilities;
    use std::collections::HashSet;
    use worker_task::WorkerConfig;

    fn write_extracted(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn map_single_merges_one_batch() {
        let extracted = tempfile::tempdir().unwrap();
        let load = tempfile::tempdir().unwrap();
        let file = write_extracted(extracted.path(), "s.t.jsonl.1.jsonl", "{\"a\":1}\n{\"a\":2}\n");

        let load_cfg = LoadStorageConfig { load_root: load.path().to_path_buf() };
        let load_storage = load_storage::LoadStorage::new(
            false,
            normalize_storage::LoaderFileFormat::Jsonl,
            HashSet::new(),
            load_cfg.clone(),
            "single",
        );
        load_storage.create_temp_load_package("L1").unwrap();

        let mut schema = Schema::new("s");
        let worker_config = Arc::new(WorkerConfig {
            capabilities: DestinationCapabilities::new(
                Some(normalize_storage::LoaderFileFormat::Jsonl),
                None,
                HashSet::new(),
            ),
        });
        let normalize_cfg = NormalizeStorageConfig { extracted_root: extracted.path().to_path_buf() };

        let pool = SynchronousPool;
        let (updates, row_counts) =
            map_single(&pool, &mut schema, worker_config, &normalize_cfg, &load_cfg, "L1", &[file])
                .await
                .unwrap();

        assert_eq!(row_counts.get("t"), 2);
        assert_eq!(updates.0["t"].len(), 2);
        assert_eq!(schema.get_table_columns("t").unwrap()["a"], schema_catalog::ColumnType::Integer);
    }
}
