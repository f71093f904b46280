use crate::column::{widen, ColumnType, Widen};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A table as it exists in the authoritative schema: a name, its current
/// columns, and transient per-run annotations (e.g. which normalizer
/// populated it) that never persist past one load.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Table {
    pub columns: BTreeMap<String, ColumnType>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, serde_json::Value>,
}

/// An additive delta against one table: columns observed by a single
/// normalizer invocation, to be merged into the authoritative [`Table`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PartialTable {
    pub columns: BTreeMap<String, ColumnType>,
}

impl PartialTable {
    pub fn with_column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.insert(name.into(), ty);
        self
    }
}

/// Raised by [`Table::merge`] when an incoming column's type cannot be
/// safely widened into the table's existing column of the same name.
#[derive(thiserror::Error, Debug, Clone)]
#[error("column coercion conflict on `{table}.{column}`: existing type {existing} is incompatible with incoming type {incoming} (suggest {suggested})")]
pub struct ColumnCoercionConflict {
    pub table: String,
    pub column: String,
    pub existing: ColumnType,
    pub incoming: ColumnType,
    pub suggested: ColumnType,
}

impl Table {
    /// Merges `partial`'s columns into this table in place. Either every
    /// column in `partial` is absorbed, or the table is left unmodified and
    /// a [`ColumnCoercionConflict`] names the first offending column.
    pub fn merge(&mut self, table_name: &str, partial: &PartialTable) -> Result<(), ColumnCoercionConflict> {
        // Validate before mutating so a conflict never leaves a half-applied delta.
        for (name, incoming) in &partial.columns {
            if let Some(existing) = self.columns.get(name) {
                if let Widen::Conflict { suggested } = widen(*existing, *incoming) {
                    return Err(ColumnCoercionConflict {
                        table: table_name.to_string(),
                        column: name.clone(),
                        existing: *existing,
                        incoming: *incoming,
                        suggested,
                    });
                }
            }
        }
        for (name, incoming) in &partial.columns {
            let widened = match self.columns.get(name) {
                Some(existing) => match widen(*existing, *incoming) {
                    Widen::Ok(t) => t,
                    Widen::Conflict { .. } => unreachable!("validated above"),
                },
                None => *incoming,
            };
            self.columns.insert(name.clone(), widened);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_widens_new_and_existing_columns() {
        let mut t = Table::default();
        t.merge("t", &PartialTable::default().with_column("a", ColumnType::Integer)).unwrap();
        t.merge("t", &PartialTable::default().with_column("a", ColumnType::Double)).unwrap();
        assert_eq!(t.columns["a"], ColumnType::Double);
    }

    #[test]
    fn merge_conflict_leaves_table_unmodified() {
        let mut t = Table::default();
        t.merge("t", &PartialTable::default().with_column("a", ColumnType::Integer)).unwrap();
        let before = t.columns.clone();
        let err = t
            .merge("t", &PartialTable::default().with_column("a", ColumnType::String))
            .unwrap_err();
        assert_eq!(err.column, "a");
        assert_eq!(t.columns, before);
    }
}
