//! Persistence of the authoritative schema catalog to
//! `<schemas>/<schema_name>.json`, per `spec.md` §6.

use crate::{Schema, StoredSchema};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error reading/writing schema at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed schema json at {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug)]
pub struct SchemaStorage {
    root: PathBuf,
}

impl SchemaStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, schema_name: &str) -> PathBuf {
        self.root.join(format!("{schema_name}.json"))
    }

    /// Loads the schema for `schema_name`, or an empty one if none is
    /// stored yet -- the **schema-not-found** recoverable case described in
    /// `spec.md` §7.
    pub fn load_or_create(&self, schema_name: &str) -> Result<(Schema, bool), Error> {
        let path = self.path_for(schema_name);
        match std::fs::read(&path) {
            Ok(bytes) => {
                let stored: StoredSchema = serde_json::from_slice(&bytes)
                    .map_err(|source| Error::Decode { path: path.clone(), source })?;
                tracing::info!(schema = %schema_name, version = stored.version, "loaded schema");
                Ok((Schema::from_stored_schema(stored), true))
            }
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(schema = %schema_name, "no stored schema found, creating empty");
                Ok((Schema::new(schema_name), false))
            }
            Err(source) => Err(Error::Io { path, source }),
        }
    }

    pub fn save(&self, schema: &Schema) -> Result<(), Error> {
        std::fs::create_dir_all(&self.root)
            .map_err(|source| Error::Io { path: self.root.clone(), source })?;
        let path = self.path_for(&schema.name);
        let bytes = serde_json::to_vec_pretty(&schema.to_dict()).expect("StoredSchema always serializes");
        std::fs::write(&path, bytes).map_err(|source| Error::Io { path, source })
    }
}

impl Schema {
    pub fn storage_path(root: impl AsRef<Path>, schema_name: &str) -> PathBuf {
        root.as_ref().join(format!("{schema_name}.json"))
    }
}
