//! Read-side storage for pending extracted files (`spec.md` §4.1).

pub mod filename;
pub mod format;

pub use filename::{build_normalize_file_name, parse_normalize_file_name, ExtractedFileName, MalformedName};
pub use format::LoaderFileFormat;

use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error listing extracted files under {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    MalformedName(#[from] MalformedName),
}

/// Configuration needed to reconstruct a [`NormalizeStorage`] inside a
/// worker (`spec.md` §4.3 worker signature `normalize_storage_config`).
#[derive(Clone, Debug)]
pub struct NormalizeStorageConfig {
    pub extracted_root: PathBuf,
}

#[derive(Clone, Debug)]
pub struct NormalizeStorage {
    extracted_root: PathBuf,
}

impl NormalizeStorage {
    pub fn new(config: NormalizeStorageConfig) -> Self {
        Self { extracted_root: config.extracted_root }
    }

    pub fn extracted_root(&self) -> &Path {
        &self.extracted_root
    }

    /// Whether `file` lives under this storage's configured root. A worker
    /// holds a read-only handle to this storage precisely so it can check
    /// this before trusting a path handed to it (`spec.md` §4.3 step 1).
    pub fn owns(&self, file: &Path) -> bool {
        file.starts_with(&self.extracted_root)
    }

    /// Lists every pending extracted file, in a total, stable order --
    /// lexicographic by filename -- so that grouping by schema (which is
    /// the filename's first component) can be done with a single linear
    /// scan.
    pub fn list_files_to_normalize_sorted(&self) -> Result<Vec<PathBuf>, Error> {
        let mut entries = Vec::new();
        let read_dir = match std::fs::read_dir(&self.extracted_root) {
            Ok(rd) => rd,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(Error::Io { path: self.extracted_root.clone(), source }),
        };
        for entry in read_dir {
            let entry = entry.map_err(|source| Error::Io { path: self.extracted_root.clone(), source })?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                entries.push(entry.path());
            }
        }
        entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(entries)
    }

    /// Best-effort, idempotent removal. A file already gone is not an
    /// error: deletion may be retried after a partial failure.
    pub fn delete_extracted_files(&self, files: &[PathBuf]) {
        for file in files {
            match std::fs::remove_file(file) {
                Ok(()) => {}
                Err(source) if source.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    tracing::warn!(file = %file.display(), error = %source, "failed to delete extracted file");
                }
            }
        }
    }
}

/// Groups a filename list that is already sorted by filename into
/// consecutive runs sharing the same schema name. Lazy in spirit (returns
/// owned groups here since the input is already materialized in memory by
/// the caller), but preserves the single linear scan the sortedness buys.
pub fn group_by_schema(files: &[PathBuf]) -> Result<Vec<(String, Vec<PathBuf>)>, Error> {
    let mut groups: Vec<(String, Vec<PathBuf>)> = Vec::new();
    for file in files {
        let parsed = parse_normalize_file_name(file)?;
        match groups.last_mut() {
            Some((schema, batch)) if *schema == parsed.schema_name => batch.push(file.clone()),
            _ => groups.push((parsed.schema_name, vec![file.clone()])),
        }
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use format::LoaderFileFormat;
    use std::fs::File;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn lists_files_sorted_and_groups_by_schema() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.t1.jsonl.001.jsonl");
        touch(dir.path(), "a.t1.jsonl.002.jsonl");
        touch(dir.path(), "a.t2.jsonl.003.jsonl");

        let storage = NormalizeStorage::new(NormalizeStorageConfig { extracted_root: dir.path().to_path_buf() });
        let files = storage.list_files_to_normalize_sorted().unwrap();
        let names: Vec<_> = files.iter().map(|p| p.file_name().unwrap().to_str().unwrap()).collect();
        assert_eq!(names, vec!["a.t1.jsonl.002.jsonl", "a.t2.jsonl.003.jsonl", "b.t1.jsonl.001.jsonl"]);

        let groups = group_by_schema(&files).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "a");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "b");
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.t.jsonl.1.jsonl");
        touch(dir.path(), "a.t.jsonl.1.jsonl");
        let storage = NormalizeStorage::new(NormalizeStorageConfig { extracted_root: dir.path().to_path_buf() });
        storage.delete_extracted_files(&[path.clone()]);
        assert!(!path.exists());
        // Second deletion of the same (now-absent) file must not panic or error.
        storage.delete_extracted_files(&[path]);
    }

    #[test]
    fn malformed_name_surfaces_from_group_by_schema() {
        let files = vec![PathBuf::from("/tmp/garbage")];
        assert!(group_by_schema(&files).is_err());
        let _ = LoaderFileFormat::Jsonl;
    }

    #[test]
    fn owns_only_files_under_extracted_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = NormalizeStorage::new(NormalizeStorageConfig { extracted_root: dir.path().to_path_buf() });
        assert!(storage.owns(&dir.path().join("a.t.jsonl.1.jsonl")));
        assert!(!storage.owns(Path::new("/elsewhere/a.t.jsonl.1.jsonl")));
    }
}
