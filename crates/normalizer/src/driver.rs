//! `spool_schema_files`, `spool_files`, and `run` (`spec.md` §4.5).

use crate::signals::{raise_if_signalled, Terminated, TermFlag};
use coordinator::Pool;
use load_storage::{LoadStorage, LoadStorageConfig};
use normalize_storage::{group_by_schema, LoaderFileFormat, NormalizeStorage, NormalizeStorageConfig};
use schema_catalog::storage::SchemaStorage;
use schema_catalog::RowCounts;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use worker_task::WorkerConfig;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    NormalizeStorage(#[from] normalize_storage::Error),
    #[error(transparent)]
    LoadStorage(#[from] load_storage::Error),
    #[error(transparent)]
    SchemaStorage(#[from] schema_catalog::storage::Error),
    #[error(transparent)]
    Coordinator(#[from] coordinator::Error),
    #[error(transparent)]
    Terminated(#[from] Terminated),
}

/// Per-run metrics published at the end of `run()` (`spec.md` §4.5 step 9 /
/// "last-run info"), kept in memory rather than only logged so a caller
/// embedding the driver can inspect it directly.
#[derive(Debug, Default, Clone)]
pub struct RunMetrics {
    pub load_ids: Vec<String>,
    pub row_counts_by_schema: BTreeMap<String, RowCounts>,
    pub loads_committed: usize,
    pub pending_after: usize,
}

impl RunMetrics {
    pub fn total_rows(&self) -> u64 {
        self.row_counts_by_schema.values().flat_map(|rc| rc.0.values()).sum()
    }
}

/// A minimal scoped-progress guard: logs entry/exit of a named phase.
/// Never affects correctness on its own -- dropping it early (e.g. via an
/// early return past it) only means the exit log line is skipped.
pub struct Collector<'a> {
    label: &'a str,
}

impl<'a> Collector<'a> {
    pub fn start(label: &'a str) -> Self {
        tracing::info!(phase = label, "starting");
        Self { label }
    }
}

impl Drop for Collector<'_> {
    fn drop(&mut self) {
        tracing::info!(phase = self.label, "finished");
    }
}

/// Generates a `load_id` that is monotonic with respect to every previous
/// id produced by this process, even when called twice within the same
/// millisecond (`spec.md` §4.5 `run`: "monotonic w.r.t. prior ids in the
/// same run").
fn next_load_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{millis}-{seq:06}")
}

/// `spool_files` (`spec.md` §4.5): loads the authoritative schema, widens it
/// in place via `map_f`, persists the catalog and its companion package
/// snapshot, then commits -- unless a termination signal arrived first.
async fn spool_files<F, Fut>(
    schema_storage: &SchemaStorage,
    load_storage: &LoadStorage,
    schema_name: &str,
    load_id: &str,
    term_flag: &TermFlag,
    map_f: F,
) -> Result<RowCounts, Error>
where
    F: FnOnce(&mut schema_catalog::Schema) -> Fut,
    Fut: std::future::Future<Output = Result<(schema_catalog::SchemaUpdate, RowCounts), coordinator::Error>>,
{
    let (mut schema, existed) = schema_storage.load_or_create(schema_name)?;
    if existed {
        schema.update_normalizers();
    }

    let (merged_updates, row_counts) = map_f(&mut schema).await?;

    schema.strip_transient_annotations();
    schema_storage.save(&schema)?;
    load_storage.save_temp_schema(&schema.to_dict(), load_id)?;
    load_storage.save_temp_schema_updates(load_id, &merged_updates)?;

    raise_if_signalled(term_flag)?;

    load_storage.commit_temp_load_package(load_id)?;
    Ok(row_counts)
}

/// `spool_schema_files` (`spec.md` §4.5): tries `map_parallel`, falling back
/// to a from-scratch single-threaded attempt if an unresolved conflict
/// escapes the retry protocol.
async fn spool_schema_files(
    pool: &dyn Pool,
    schema_storage: &SchemaStorage,
    normalize_storage_config: &NormalizeStorageConfig,
    load_storage_config: &LoadStorageConfig,
    worker_config: Arc<WorkerConfig>,
    schema_name: &str,
    load_id: &str,
    files: &[PathBuf],
    term_flag: &TermFlag,
) -> Result<RowCounts, Error> {
    let mut supported_read_formats = HashSet::new();
    if worker_config.capabilities.supports_parquet() {
        supported_read_formats.insert(LoaderFileFormat::Parquet);
    }
    let default_format = worker_config.capabilities.default_write_format();

    // Never writes table rows itself (only package-level bookkeeping), so
    // its `unique` label need not distinguish it from any worker batch.
    let load_storage = LoadStorage::new(false, default_format, supported_read_formats, load_storage_config.clone(), "root");
    load_storage.create_temp_load_package(load_id)?;

    let parallel_worker_config = worker_config.clone();
    let result = spool_files(schema_storage, &load_storage, schema_name, load_id, term_flag, |schema| {
        coordinator::map_parallel(
            pool,
            schema,
            parallel_worker_config,
            normalize_storage_config,
            load_storage_config,
            load_id,
            files,
        )
    })
    .await;

    match result {
        Err(Error::Coordinator(coordinator::Error::UnresolvedConflict(retries))) => {
            tracing::warn!(
                schema = schema_name,
                retries,
                "column-coercion conflict escaped map_parallel; retrying single-threaded from scratch"
            );
            load_storage.create_temp_load_package(load_id)?;
            let fallback_pool = coordinator::SynchronousPool;
            spool_files(schema_storage, &load_storage, schema_name, load_id, term_flag, |schema| {
                coordinator::map_single(
                    &fallback_pool,
                    schema,
                    worker_config,
                    normalize_storage_config,
                    load_storage_config,
                    load_id,
                    files,
                )
            })
            .await
        }
        other => other,
    }
}

/// `run(pool)` (`spec.md` §4.5): lists pending extracted files, groups them
/// by schema, and spools one load package per schema group.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    pool: &dyn Pool,
    schema_storage: &SchemaStorage,
    normalize_storage_config: &NormalizeStorageConfig,
    load_storage_config: &LoadStorageConfig,
    worker_config: Arc<WorkerConfig>,
    _poll_interval: Duration,
    term_flag: TermFlag,
) -> Result<RunMetrics, Error> {
    let normalize_storage = NormalizeStorage::new(normalize_storage_config.clone());
    let files = normalize_storage.list_files_to_normalize_sorted()?;

    let mut metrics = RunMetrics::default();
    if files.is_empty() {
        metrics.pending_after = 0;
        return Ok(metrics);
    }

    let groups = group_by_schema(&files)?;
    for (schema_name, group_files) in groups {
        let load_id = next_load_id();
        let _collector = Collector::start("spool_schema_files");

        let row_counts = spool_schema_files(
            pool,
            schema_storage,
            normalize_storage_config,
            load_storage_config,
            worker_config.clone(),
            &schema_name,
            &load_id,
            &group_files,
            &term_flag,
        )
        .await?;

        normalize_storage.delete_extracted_files(&group_files);

        metrics.load_ids.push(load_id);
        metrics.loads_committed += 1;
        metrics.row_counts_by_schema.insert(schema_name, row_counts);
    }

    metrics.pending_after = normalize_storage.list_files_to_normalize_sorted()?.len();
    Ok(metrics)
}
