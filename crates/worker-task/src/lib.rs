//! The stateless worker task (`spec.md` §4.3): processes one batch of files
//! and returns `(schema_updates, total_items, closed_files, row_counts)`.
//! Must be a pure function of its inputs up to filesystem side effects
//! confined to the temp load directory -- it never touches the
//! coordinator's authoritative `Schema`, only an immutable snapshot of it.

use item_normalizers::{columnar::ColumnarNormalizer, jsonl::JsonlNormalizer, ItemNormalizer};
use load_storage::{DestinationCapabilities, LoadStorage, LoadStorageConfig};
use normalize_storage::{parse_normalize_file_name, LoaderFileFormat, NormalizeStorageConfig};
use schema_catalog::{ColumnCoercionConflict, RowCounts, Schema, SchemaUpdate, StoredSchema};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("malformed extracted file name: {0}")]
    MalformedName(#[from] normalize_storage::MalformedName),
    #[error(transparent)]
    ColumnCoercionConflict(#[from] ColumnCoercionConflict),
    #[error("error normalizing {file}: {source}")]
    Normalize {
        file: PathBuf,
        #[source]
        source: item_normalizers::Error,
    },
    #[error("io error in load storage: {0}")]
    LoadStorage(#[from] load_storage::Error),
    #[error("file {0} is outside the configured normalize-storage root")]
    OutsideNormalizeRoot(PathBuf),
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub capabilities: DestinationCapabilities,
}

pub struct WorkerOutput {
    pub schema_updates: SchemaUpdate,
    pub total_items: usize,
    pub closed_files: Vec<PathBuf>,
    pub row_counts: RowCounts,
}

fn normalizer_for(format: LoaderFileFormat) -> Box<dyn ItemNormalizer> {
    match format {
        LoaderFileFormat::Jsonl => Box::new(JsonlNormalizer),
        LoaderFileFormat::Parquet => Box::new(ColumnarNormalizer),
        LoaderFileFormat::Arrow => unreachable!("arrow is a write-side-only format"),
    }
}

/// The write-format selection rule, `spec.md` §4.3 step 2.
fn select_write_format(input_format: LoaderFileFormat, capabilities: &DestinationCapabilities) -> LoaderFileFormat {
    if input_format == LoaderFileFormat::Parquet && capabilities.supports_parquet() {
        LoaderFileFormat::Arrow
    } else {
        capabilities.default_write_format()
    }
}

/// Processes `files` against `schema_snapshot`, producing the deltas and
/// output files for one worker batch. `load_id` selects the shared temp load
/// package every worker in this load writes into; `unique` is this batch's
/// own disambiguator within it, so its output filenames never collide with
/// another concurrently-running (or retried) batch's (`spec.md` §5).
pub fn process_batch(
    config: &WorkerConfig,
    normalize_storage_config: NormalizeStorageConfig,
    load_storage_config: LoadStorageConfig,
    schema_snapshot: StoredSchema,
    load_id: &str,
    unique: &str,
    files: &[PathBuf],
) -> Result<WorkerOutput, Error> {
    let mut local_schema = Schema::from_stored_schema(schema_snapshot);
    let normalize_storage = normalize_storage::NormalizeStorage::new(normalize_storage_config);

    let mut load_storages: BTreeMap<LoaderFileFormat, LoadStorage> = BTreeMap::new();
    let mut normalizers: BTreeMap<LoaderFileFormat, Box<dyn ItemNormalizer>> = BTreeMap::new();

    let mut schema_updates = SchemaUpdate::new();
    let mut total_items = 0usize;
    let mut row_counts = RowCounts::new();
    let mut root_tables: Vec<String> = Vec::new();
    let mut populated_root_tables: HashSet<String> = HashSet::new();

    let result = (|| -> Result<(), Error> {
        for file in files {
            if !normalize_storage.owns(file) {
                return Err(Error::OutsideNormalizeRoot(file.clone()));
            }
            let parsed = parse_normalize_file_name(file)?;
            let table_name = local_schema.naming.normalize_table_identifier(&parsed.table_name);
            if !root_tables.contains(&table_name) {
                root_tables.push(table_name.clone());
            }

            let normalizer = normalizers
                .entry(parsed.file_format)
                .or_insert_with(|| normalizer_for(parsed.file_format));

            let known_columns = local_schema.get_table_columns(&table_name).cloned();
            let output = normalizer
                .normalize(file, &table_name, known_columns.as_ref())
                .map_err(|source| Error::Normalize { file: file.clone(), source })?;

            for partial in output.schema_updates.0.get(&table_name).into_iter().flatten() {
                local_schema.update_table(&table_name, partial)?;
            }
            schema_updates.extend(output.schema_updates);
            total_items += output.items_count;
            row_counts.merge(&output.row_counts);
            row_counts.ensure(table_name.clone());

            if output.items_count > 0 {
                populated_root_tables.insert(table_name.clone());

                let write_format = select_write_format(parsed.file_format, &config.capabilities);
                let storage = load_storages.entry(write_format).or_insert_with(|| {
                    LoadStorage::new(
                        false,
                        write_format,
                        HashSet::new(),
                        load_storage_config.clone(),
                        unique,
                    )
                });
                let columns = local_schema.get_table_columns(&table_name).cloned().unwrap_or_default();
                let writer = storage.writer_for(load_id, &local_schema.name, &table_name, write_format, &columns)?;
                for row in &output.rows {
                    writer.write_row(row)?;
                }
            }
        }

        // Step 4: a table named in a filename but never populated gets an
        // empty file, but only if it already has a known definition.
        let default_format = config.capabilities.default_write_format();
        for table_name in &root_tables {
            if populated_root_tables.contains(table_name) {
                continue;
            }
            let Some(columns) = local_schema.get_table_columns(table_name).cloned() else {
                continue;
            };
            let storage = load_storages.entry(default_format).or_insert_with(|| {
                LoadStorage::new(false, default_format, HashSet::new(), load_storage_config.clone(), unique)
            });
            storage.write_empty_file(load_id, &local_schema.name, table_name, &columns)?;
        }

        Ok(())
    })();

    if let Err(err) = &result {
        tracing::error!(error = %err, "worker task failed while processing batch");
    }

    // close_writers must run on every exit path, success or failure.
    let mut closed_files = Vec::new();
    for (_, mut storage) in load_storages {
        storage.close_writers(load_id)?;
        closed_files.extend(storage.closed_files().iter().cloned());
    }

    result?;

    Ok(WorkerOutput { schema_updates, total_items, closed_files, row_counts })
}

#[allow(dead_code)]
fn _assert_send<T: Send>() {}

#[cfg(test)]
mod tests {
    use super::*;
    use load_storage::DestinationCapabilities;
    use std::collections::HashSet as StdHashSet;

    fn caps() -> DestinationCapabilities {
        DestinationCapabilities::new(Some(LoaderFileFormat::Jsonl), None, StdHashSet::new())
    }

    #[test]
    fn happy_path_jsonl_produces_rows_and_schema() {
        let extracted = tempfile::tempdir().unwrap();
        let load = tempfile::tempdir().unwrap();
        let schemas_dir = tempfile::tempdir().unwrap();
        let _ = schemas_dir;

        let file_path = extracted.path().join("s.t.jsonl.001.jsonl");
        std::fs::write(&file_path, "{\"a\":1}\n{\"a\":2}\n").unwrap();

        let worker_config = WorkerConfig { capabilities: caps() };
        let normalize_cfg = NormalizeStorageConfig { extracted_root: extracted.path().to_path_buf() };
        let load_cfg = LoadStorageConfig { load_root: load.path().to_path_buf() };

        let load_storage = LoadStorage::new(false, LoaderFileFormat::Jsonl, StdHashSet::new(), load_cfg.clone(), "w0");
        load_storage.create_temp_load_package("L1").unwrap();

        let output = process_batch(
            &worker_config,
            normalize_cfg,
            load_cfg,
            StoredSchema { name: "s".into(), ..Default::default() },
            "L1",
            "w0",
            &[file_path],
        )
        .unwrap();

        assert_eq!(output.total_items, 2);
        assert_eq!(output.row_counts.get("t"), 2);
        assert_eq!(output.closed_files.len(), 1);
        assert_eq!(output.schema_updates.0["t"].len(), 2);
    }

    #[test]
    fn malformed_filename_is_rejected() {
        let extracted = tempfile::tempdir().unwrap();
        let load = tempfile::tempdir().unwrap();
        let bad_path = extracted.path().join("not-a-conforming-name.jsonl");
        std::fs::write(&bad_path, "{}\n").unwrap();

        let worker_config = WorkerConfig { capabilities: caps() };
        let normalize_cfg = NormalizeStorageConfig { extracted_root: extracted.path().to_path_buf() };
        let load_cfg = LoadStorageConfig { load_root: load.path().to_path_buf() };
        let load_storage = LoadStorage::new(false, LoaderFileFormat::Jsonl, StdHashSet::new(), load_cfg.clone(), "w0");
        load_storage.create_temp_load_package("L1").unwrap();

        let err = process_batch(
            &worker_config,
            normalize_cfg,
            load_cfg,
            StoredSchema { name: "s".into(), ..Default::default() },
            "L1",
            "w0",
            &[bad_path],
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedName(_)));
    }

    #[test]
    fn file_outside_normalize_root_is_rejected() {
        let extracted = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let load = tempfile::tempdir().unwrap();

        let file_path = outside.path().join("s.t.jsonl.001.jsonl");
        std::fs::write(&file_path, "{\"a\":1}\n").unwrap();

        let worker_config = WorkerConfig { capabilities: caps() };
        let normalize_cfg = NormalizeStorageConfig { extracted_root: extracted.path().to_path_buf() };
        let load_cfg = LoadStorageConfig { load_root: load.path().to_path_buf() };
        let load_storage = LoadStorage::new(false, LoaderFileFormat::Jsonl, StdHashSet::new(), load_cfg.clone(), "w0");
        load_storage.create_temp_load_package("L1").unwrap();

        let err = process_batch(
            &worker_config,
            normalize_cfg,
            load_cfg,
            StoredSchema { name: "s".into(), ..Default::default() },
            "L1",
            "w0",
            &[file_path],
        )
        .unwrap_err();
        assert!(matches!(err, Error::OutsideNormalizeRoot(_)));
    }

    /// Regression test for the writer-path collision bug: two batches for
    /// the same table and format, distinguished only by `unique`, must not
    /// clobber each other's output file (`spec.md` §5).
    #[test]
    fn distinct_batch_unique_avoids_filename_collision() {
        let extracted = tempfile::tempdir().unwrap();
        let load = tempfile::tempdir().unwrap();
        let worker_config = WorkerConfig { capabilities: caps() };
        let load_cfg = LoadStorageConfig { load_root: load.path().to_path_buf() };

        let file_a = extracted.path().join("s.t.jsonl.001.jsonl");
        std::fs::write(&file_a, "{\"a\":1}\n").unwrap();
        let file_b = extracted.path().join("s.t.jsonl.002.jsonl");
        std::fs::write(&file_b, "{\"a\":2}\n").unwrap();

        let load_storage = LoadStorage::new(false, LoaderFileFormat::Jsonl, StdHashSet::new(), load_cfg.clone(), "w0");
        load_storage.create_temp_load_package("L1").unwrap();

        let normalize_cfg_a = NormalizeStorageConfig { extracted_root: extracted.path().to_path_buf() };
        let out_a = process_batch(
            &worker_config,
            normalize_cfg_a,
            load_cfg.clone(),
            StoredSchema { name: "s".into(), ..Default::default() },
            "L1",
            "w0",
            &[file_a],
        )
        .unwrap();

        let normalize_cfg_b = NormalizeStorageConfig { extracted_root: extracted.path().to_path_buf() };
        let out_b = process_batch(
            &worker_config,
            normalize_cfg_b,
            load_cfg,
            StoredSchema { name: "s".into(), ..Default::default() },
            "L1",
            "w1",
            &[file_b],
        )
        .unwrap();

        assert_ne!(out_a.closed_files[0], out_b.closed_files[0]);
        assert!(out_a.closed_files[0].exists());
        assert!(out_b.closed_files[0].exists());
    }
}
