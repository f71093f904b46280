//! Per-record normalizers: `(file_path, root_table_name)` -> one or more
//! output rows plus a partial schema delta (`spec.md` §4.3/§6).
//!
//! Two canonical implementations, chosen by file format rather than
//! destination format (`spec.md` §4.3 step 3c): [`jsonl`] for line-oriented
//! text, [`columnar`] for parquet batches.

pub mod columnar;
pub mod jsonl;

use schema_catalog::{ColumnType, PartialTable, RowCounts, SchemaUpdate};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error reading {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path} at line {line}: {source}")]
    Json {
        path: std::path::PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("parquet error reading {path}: {source}")]
    Parquet {
        path: std::path::PathBuf,
        #[source]
        source: parquet::errors::ParquetError,
    },
}

/// What a single normalizer invocation produced.
pub struct NormalizeOutput {
    pub schema_updates: SchemaUpdate,
    pub items_count: usize,
    pub row_counts: RowCounts,
    /// Canonicalized output rows for `root_table`, coerced so each column's
    /// value matches the type recorded in `schema_updates`/`known_columns`.
    pub rows: Vec<serde_json::Value>,
}

/// Callable with `(file_path, root_table_name)`, given the schema's current
/// columns for that table as a coercion hint (`spec.md` §2 item 2: workers
/// inductively widen a shared schema from the records they observe).
pub trait ItemNormalizer {
    fn normalize(
        &self,
        file_path: &Path,
        root_table: &str,
        known_columns: Option<&BTreeMap<String, ColumnType>>,
    ) -> Result<NormalizeOutput, Error>;
}

/// Infers or coerces one row's columns against `known_columns`, producing
/// both the partial schema delta and the canonicalized row. Shared by both
/// normalizer implementations.
pub(crate) fn normalize_row(
    row: &serde_json::Map<String, serde_json::Value>,
    known_columns: Option<&BTreeMap<String, ColumnType>>,
) -> (PartialTable, serde_json::Value) {
    let mut partial = PartialTable::default();
    let mut out = serde_json::Map::with_capacity(row.len());
    for (key, value) in row {
        let known = known_columns.and_then(|cols| cols.get(key)).copied();
        let resolved = match known {
            Some(known_ty) => schema_catalog::column::coerce_to_known(known_ty, value).unwrap_or_else(|| schema_catalog::column::infer(value)),
            None => schema_catalog::column::infer(value),
        };
        partial.columns.insert(key.clone(), resolved);
        out.insert(key.clone(), value.clone());
    }
    (partial, serde_json::Value::Object(out))
}
