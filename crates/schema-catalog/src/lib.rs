//! The evolvable table/column catalog described in `spec.md` §3-§4.3.
//!
//! `Schema` is owned exclusively by the coordinator (see `coordinator`
//! crate); workers only ever see a [`StoredSchema`] value snapshot and hand
//! back [`SchemaUpdate`]s. This mirrors the "shared-mutable schema becomes
//! message-passing with value-form deltas" redesign note in `spec.md` §9.

pub mod column;
pub mod naming;
pub mod storage;
pub mod table;
pub mod update;

pub use column::ColumnType;
pub use naming::{DefaultNaming, NamingConvention};
pub use table::{ColumnCoercionConflict, PartialTable, Table};
pub use update::{RowCounts, SchemaUpdate};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Transient per-run annotation key stripped before persisting a schema
/// (`spec.md` §4.5 step 3): records which normalizer most recently touched
/// a table, useful for debugging but meaningless across loads.
pub const TRANSIENT_NORMALIZER_ANNOTATION: &str = "x-normalizer";

/// The value-form of a [`Schema`], suitable for serializing to
/// `<schemas>/<schema_name>.json` or shipping to a worker. This is the type
/// `to_dict`/`from_stored_schema` round-trip through.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoredSchema {
    pub name: String,
    pub version: u64,
    pub tables: BTreeMap<String, Table>,
}

pub struct Schema {
    pub name: String,
    version: u64,
    stored_version: u64,
    tables: BTreeMap<String, Table>,
    pub naming: Arc<dyn NamingConvention>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 0,
            stored_version: 0,
            tables: BTreeMap::new(),
            naming: Arc::new(DefaultNaming),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn stored_version(&self) -> u64 {
        self.stored_version
    }

    pub fn get_table_columns(&self, table_name: &str) -> Option<&BTreeMap<String, ColumnType>> {
        self.tables.get(table_name).map(|t| &t.columns)
    }

    pub fn has_table(&self, table_name: &str) -> bool {
        self.tables.contains_key(table_name)
    }

    /// Merges one table's added/widened columns. Bumps `version` only when
    /// the merge actually changes something, so repeated no-op merges don't
    /// spuriously churn the version.
    pub fn update_table(
        &mut self,
        table_name: &str,
        partial: &PartialTable,
    ) -> Result<(), ColumnCoercionConflict> {
        let entry = self.tables.entry(table_name.to_string()).or_default();
        let before = entry.columns.clone();
        entry.merge(table_name, partial)?;
        if entry.columns != before {
            self.version += 1;
        }
        Ok(())
    }

    /// Re-resolves naming convention implementations after a schema is
    /// loaded from storage (`spec.md` §4.5 step 1, `update_normalizers`).
    /// A black-boxed hook for now: storage always hands back the default
    /// convention, but callers may override it before spooling.
    pub fn update_normalizers(&mut self) {
        // No-op until a pluggable naming-convention registry exists; kept
        // as an explicit call site so the driver's step ordering matches
        // `spec.md` §4.5 exactly.
    }

    /// Strips transient per-run annotations from every table
    /// (`spec.md` §4.5 step 3).
    pub fn strip_transient_annotations(&mut self) {
        for table in self.tables.values_mut() {
            table.annotations.remove(TRANSIENT_NORMALIZER_ANNOTATION);
        }
    }

    pub fn annotate_normalizer(&mut self, table_name: &str, normalizer: &str) {
        let entry = self.tables.entry(table_name.to_string()).or_default();
        entry.annotations.insert(
            TRANSIENT_NORMALIZER_ANNOTATION.to_string(),
            serde_json::Value::String(normalizer.to_string()),
        );
    }

    pub fn to_dict(&self) -> StoredSchema {
        StoredSchema {
            name: self.name.clone(),
            version: self.version,
            tables: self.tables.clone(),
        }
    }

    pub fn from_stored_schema(d: StoredSchema) -> Self {
        let stored_version = d.version;
        Self {
            name: d.name,
            version: d.version,
            stored_version,
            tables: d.tables,
            naming: Arc::new(DefaultNaming),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_via_stored_schema_preserves_tables() {
        let mut s = Schema::new("s1");
        s.update_table("t", &PartialTable::default().with_column("a", ColumnType::Integer))
            .unwrap();

        let stored = s.to_dict();
        let restored = Schema::from_stored_schema(stored);
        assert_eq!(restored.stored_version(), 1);
        assert_eq!(
            restored.get_table_columns("t").unwrap()["a"],
            ColumnType::Integer
        );
    }

    #[test]
    fn strip_transient_annotations_removes_marker_only() {
        let mut s = Schema::new("s1");
        s.update_table("t", &PartialTable::default().with_column("a", ColumnType::Integer))
            .unwrap();
        s.annotate_normalizer("t", "jsonl");
        s.strip_transient_annotations();
        assert!(s.tables.get("t").unwrap().annotations.is_empty());
    }

    #[test]
    fn widening_is_monotonic_a_prior_column_is_never_narrowed() {
        let mut s = Schema::new("s1");
        s.update_table("t", &PartialTable::default().with_column("a", ColumnType::Integer))
            .unwrap();
        s.update_table("t", &PartialTable::default().with_column("a", ColumnType::Double))
            .unwrap();
        assert_eq!(s.get_table_columns("t").unwrap()["a"], ColumnType::Double);
    }
}
