//! Write-side storage for load packages (`spec.md` §4.2).

pub mod capabilities;
pub mod writer;

pub use capabilities::DestinationCapabilities;
pub use writer::{Error as WriterError, TableWriter};

use normalize_storage::LoaderFileFormat;
use schema_catalog::{ColumnType, SchemaUpdate, StoredSchema};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Writer(#[from] WriterError),
    #[error("load storage opened read-only cannot perform write operation `{0}`")]
    ReadOnly(&'static str),
}

/// Configuration needed to reconstruct a [`LoadStorage`] inside a worker
/// (`spec.md` §4.3 worker signature `load_storage_config`).
#[derive(Clone, Debug)]
pub struct LoadStorageConfig {
    pub load_root: PathBuf,
}

impl LoadStorageConfig {
    fn temp_dir(&self, load_id: &str) -> PathBuf {
        self.load_root.join("temp").join(load_id)
    }

    fn processing_dir(&self, load_id: &str) -> PathBuf {
        self.load_root.join("processing").join(load_id)
    }
}

/// One writable or read-only handle onto the load package filesystem
/// layout. Writable instances are materialized per write format by the
/// worker (`spec.md` §4.3 step 2); a single read-only instance is shared to
/// inspect files of any supported format.
pub struct LoadStorage {
    config: LoadStorageConfig,
    read_only: bool,
    default_write_format: LoaderFileFormat,
    #[allow(dead_code)]
    supported_read_formats: HashSet<LoaderFileFormat>,
    /// Disambiguates this instance's output filenames from every other
    /// instance writing into the same `temp/<load_id>` directory
    /// concurrently (`spec.md` §5: "each worker writes to disjoint
    /// filenames"). The coordinator assigns one per batch (and a fresh one
    /// per retry); callers that never write (e.g. the driver's
    /// schema-only handle) may pass any fixed label.
    unique: String,
    writers: BTreeMap<(String, LoaderFileFormat), Box<dyn TableWriter>>,
    closed_files: Vec<PathBuf>,
}

impl LoadStorage {
    pub fn new(
        read_only: bool,
        default_write_format: LoaderFileFormat,
        supported_read_formats: HashSet<LoaderFileFormat>,
        config: LoadStorageConfig,
        unique: impl Into<String>,
    ) -> Self {
        Self {
            config,
            read_only,
            default_write_format,
            supported_read_formats,
            unique: unique.into(),
            writers: BTreeMap::new(),
            closed_files: Vec::new(),
        }
    }

    pub fn default_write_format(&self) -> LoaderFileFormat {
        self.default_write_format
    }

    /// Creates `temp/<load_id>/…`, purging any prior contents for that id
    /// first so re-creation after a crash is idempotent (`spec.md` §4.2).
    pub fn create_temp_load_package(&self, load_id: &str) -> Result<(), Error> {
        let dir = self.config.temp_dir(load_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|source| Error::Io { path: dir.clone(), source })?;
        }
        std::fs::create_dir_all(&dir).map_err(|source| Error::Io { path: dir.clone(), source })?;
        Ok(())
    }

    fn ensure_writable(&self, op: &'static str) -> Result<(), Error> {
        if self.read_only {
            return Err(Error::ReadOnly(op));
        }
        Ok(())
    }

    fn writer_path(&self, load_id: &str, schema_name: &str, table_name: &str, format: LoaderFileFormat, suffix: &str) -> PathBuf {
        self.config.temp_dir(load_id).join(format!(
            "{schema_name}.{table_name}.{format}.{}-{suffix}.{}",
            self.unique,
            format.extension()
        ))
    }

    /// Returns the writer for `(table_name, format)` within this load,
    /// creating it on first use. Disjointness across concurrently-writing
    /// instances comes from `self.unique`, not from the table/format key
    /// alone -- two batches can otherwise hold rows for the same table and
    /// format at once (`spec.md` §5).
    pub fn writer_for(
        &mut self,
        load_id: &str,
        schema_name: &str,
        table_name: &str,
        format: LoaderFileFormat,
        columns: &BTreeMap<String, ColumnType>,
    ) -> Result<&mut Box<dyn TableWriter>, Error> {
        self.ensure_writable("writer_for")?;
        let key = (table_name.to_string(), format);
        if !self.writers.contains_key(&key) {
            let path = self.writer_path(load_id, schema_name, table_name, format, "w");
            let writer = writer::new_writer(&path, format, columns.clone())?;
            self.writers.insert(key.clone(), writer);
        }
        Ok(self.writers.get_mut(&key).unwrap())
    }

    /// Emits a zero-row file in the default format, for a table that exists
    /// in the schema but received no rows this load (`spec.md` §4.3 step 4).
    pub fn write_empty_file(
        &mut self,
        load_id: &str,
        schema_name: &str,
        table_name: &str,
        columns: &BTreeMap<String, ColumnType>,
    ) -> Result<(), Error> {
        self.ensure_writable("write_empty_file")?;
        let format = self.default_write_format;
        let path = self.writer_path(load_id, schema_name, table_name, format, "empty");
        let writer = writer::new_writer(&path, format, columns.clone())?;
        let path = writer.finish()?;
        self.closed_files.push(path);
        Ok(())
    }

    /// Finalizes every open writer. Must be called on every exit path
    /// (`spec.md` §4.3 step 5), typically from a scope guard so a panic or
    /// early return still flushes partial output.
    pub fn close_writers(&mut self, _load_id: &str) -> Result<(), Error> {
        for (_, writer) in std::mem::take(&mut self.writers) {
            let path = writer.finish()?;
            self.closed_files.push(path);
        }
        Ok(())
    }

    pub fn closed_files(&self) -> &[PathBuf] {
        &self.closed_files
    }

    /// Removes every file this instance has written so far, used by the
    /// coordinator to reclaim a conflicting task's output before resubmit
    /// (`spec.md` §4.4 step 3d).
    pub fn delete_closed_files(&mut self) {
        for path in self.closed_files.drain(..) {
            if let Err(source) = std::fs::remove_file(&path) {
                if source.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(file = %path.display(), error = %source, "failed to reclaim output file");
                }
            }
        }
    }

    pub fn save_temp_schema(&self, schema: &StoredSchema, load_id: &str) -> Result<(), Error> {
        self.ensure_writable("save_temp_schema")?;
        let path = self.config.temp_dir(load_id).join("schema.json");
        let bytes = serde_json::to_vec_pretty(schema).expect("StoredSchema always serializes");
        std::fs::write(&path, bytes).map_err(|source| Error::Io { path, source })
    }

    pub fn save_temp_schema_updates(&self, load_id: &str, merged_updates: &SchemaUpdate) -> Result<(), Error> {
        self.ensure_writable("save_temp_schema_updates")?;
        let path = self.config.temp_dir(load_id).join("schema_updates.json");
        let bytes = serde_json::to_vec_pretty(merged_updates).expect("SchemaUpdate always serializes");
        std::fs::write(&path, bytes).map_err(|source| Error::Io { path, source })
    }

    /// Atomically renames `temp/<load_id>` to `processing/<load_id>`: the
    /// only operation that publishes a load package (`spec.md` §4.2
    /// invariant). A crash before this call leaves no loader-visible state;
    /// a crash during it is a single filesystem rename, which POSIX
    /// guarantees is atomic within one filesystem.
    pub fn commit_temp_load_package(&self, load_id: &str) -> Result<(), Error> {
        self.ensure_writable("commit_temp_load_package")?;
        let processing_root = self.config.load_root.join("processing");
        std::fs::create_dir_all(&processing_root)
            .map_err(|source| Error::Io { path: processing_root.clone(), source })?;
        let from = self.config.temp_dir(load_id);
        let to = self.config.processing_dir(load_id);
        std::fs::rename(&from, &to).map_err(|source| Error::Io { path: to, source })
    }

    pub fn temp_dir(&self, load_id: &str) -> PathBuf {
        self.config.temp_dir(load_id)
    }

    pub fn processing_dir(&self, load_id: &str) -> PathBuf {
        self.config.processing_dir(load_id)
    }
}

pub fn read_only(
    default_write_format: LoaderFileFormat,
    supported_read_formats: HashSet<LoaderFileFormat>,
    config: LoadStorageConfig,
    unique: impl Into<String>,
) -> LoadStorage {
    LoadStorage::new(true, default_write_format, supported_read_formats, config, unique)
}

pub fn writable(
    default_write_format: LoaderFileFormat,
    supported_read_formats: HashSet<LoaderFileFormat>,
    config: LoadStorageConfig,
    unique: impl Into<String>,
) -> LoadStorage {
    LoadStorage::new(false, default_write_format, supported_read_formats, config, unique)
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema_catalog::ColumnType;

    fn config(dir: &Path) -> LoadStorageConfig {
        LoadStorageConfig { load_root: dir.to_path_buf() }
    }

    #[test]
    fn commit_moves_temp_to_processing_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = writable(LoaderFileFormat::Jsonl, HashSet::new(), config(dir.path()), "w0");
        storage.create_temp_load_package("L1").unwrap();
        let mut columns = BTreeMap::new();
        columns.insert("a".to_string(), ColumnType::Integer);
        storage
            .writer_for("L1", "s", "t", LoaderFileFormat::Jsonl, &columns)
            .unwrap()
            .write_row(&serde_json::json!({"a": 1}))
            .unwrap();
        storage.close_writers("L1").unwrap();

        assert!(storage.temp_dir("L1").exists());
        assert!(!storage.processing_dir("L1").exists());
        storage.commit_temp_load_package("L1").unwrap();
        assert!(!storage.temp_dir("L1").exists());
        assert!(storage.processing_dir("L1").exists());
    }

    #[test]
    fn recreating_temp_package_purges_prior_contents() {
        let dir = tempfile::tempdir().unwrap();
        let storage = writable(LoaderFileFormat::Jsonl, HashSet::new(), config(dir.path()), "w0");
        storage.create_temp_load_package("L1").unwrap();
        std::fs::write(storage.temp_dir("L1").join("stale.jsonl"), b"junk").unwrap();
        storage.create_temp_load_package("L1").unwrap();
        assert!(!storage.temp_dir("L1").join("stale.jsonl").exists());
    }

    #[test]
    fn read_only_instance_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = read_only(LoaderFileFormat::Jsonl, HashSet::new(), config(dir.path()), "w0");
        assert!(matches!(storage.commit_temp_load_package("L1"), Err(Error::ReadOnly(_))));
    }

    #[test]
    fn distinct_unique_labels_produce_disjoint_filenames() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = writable(LoaderFileFormat::Jsonl, HashSet::new(), config(dir.path()), "w0");
        let mut b = writable(LoaderFileFormat::Jsonl, HashSet::new(), config(dir.path()), "w1");
        a.create_temp_load_package("L1").unwrap();

        let mut columns = BTreeMap::new();
        columns.insert("a".to_string(), ColumnType::Integer);
        a.writer_for("L1", "s", "t", LoaderFileFormat::Jsonl, &columns).unwrap();
        b.writer_for("L1", "s", "t", LoaderFileFormat::Jsonl, &columns).unwrap();
        a.close_writers("L1").unwrap();
        b.close_writers("L1").unwrap();

        assert_ne!(a.closed_files()[0], b.closed_files()[0]);
    }
}
