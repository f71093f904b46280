//! The Run Driver binary (`spec.md` §4.5): spools pending extracted files
//! into load packages, grouped by schema, widening each schema's catalog
//! as it goes and committing one load package per schema per run.

mod driver;
mod signals;

use clap::Parser;
use coordinator::{Pool, SynchronousPool, TokioPool};
use load_storage::LoadStorageConfig;
use normalize_storage::{LoaderFileFormat, NormalizeStorageConfig};
use schema_catalog::storage::SchemaStorage;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use worker_task::WorkerConfig;

/// Command-line configuration for one run of the normalizer, in the style
/// of `crates/agent/src/main.rs`'s `Args`.
#[derive(Parser, Debug)]
#[command(name = "normalizer", about = "Normalizes pending extracted files into load packages")]
struct Args {
    /// Directory of pending extracted files (`spec.md` §4.1).
    #[arg(long, env = "NORMALIZE_EXTRACTED_ROOT")]
    extracted_root: PathBuf,

    /// Root directory for load packages (`temp/` and `processing/` live under here).
    #[arg(long, env = "NORMALIZE_LOAD_ROOT")]
    load_root: PathBuf,

    /// Directory holding one `<schema_name>.json` file per schema.
    #[arg(long, env = "NORMALIZE_SCHEMAS_ROOT")]
    schemas_root: PathBuf,

    /// Worker pool size; 0 selects the synchronous fallback pool
    /// (`spec.md` §4.4 `map_single`).
    #[arg(long, env = "NORMALIZE_WORKER_COUNT", default_value_t = 4)]
    worker_count: usize,

    /// Poll interval for the coordinator's gather loop.
    #[arg(long, env = "NORMALIZE_POLL_INTERVAL", default_value = "300ms", value_parser = humantime::parse_duration)]
    poll_interval: Duration,

    /// Loader's preferred columnar write format, if it accepts one.
    #[arg(long, env = "NORMALIZE_DEFAULT_FORMAT", default_value = "jsonl")]
    default_write_format: LoaderFileFormat,

    /// Whether the destination loader accepts parquet directly.
    #[arg(long, env = "NORMALIZE_SUPPORTS_PARQUET", default_value_t = false)]
    supports_parquet: bool,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.worker_count.max(1))
        .enable_all()
        .build()?;

    let term_flag = signals::register_signal_handlers(runtime.handle().clone())?;

    let mut supported_read_formats = HashSet::new();
    if args.supports_parquet {
        supported_read_formats.insert(LoaderFileFormat::Parquet);
    }
    let worker_config = Arc::new(WorkerConfig {
        capabilities: load_storage::DestinationCapabilities::new(
            Some(args.default_write_format),
            None,
            supported_read_formats,
        ),
    });

    let normalize_storage_config = NormalizeStorageConfig { extracted_root: args.extracted_root.clone() };
    let load_storage_config = LoadStorageConfig { load_root: args.load_root.clone() };
    let schema_storage = SchemaStorage::new(args.schemas_root.clone());

    let pool: Box<dyn Pool> = if args.worker_count == 0 {
        Box::new(SynchronousPool)
    } else {
        Box::new(TokioPool::new(runtime.handle().clone(), args.worker_count))
    };

    let metrics = runtime.block_on(driver::run(
        pool.as_ref(),
        &schema_storage,
        &normalize_storage_config,
        &load_storage_config,
        worker_config,
        args.poll_interval,
        term_flag,
    ))?;

    tracing::info!(
        loads_committed = metrics.loads_committed,
        rows_written = metrics.total_rows(),
        pending_after = metrics.pending_after,
        "normalize run finished",
    );
    Ok(())
}
