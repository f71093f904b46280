use schema_catalog::{ColumnCoercionConflict, Schema, SchemaUpdate};

/// Applies every table's delta list, in order, into the coordinator's
/// authoritative schema (`spec.md` §4.4 `update_table`). A conflict aborts
/// the whole merge; deltas already applied to tables earlier in iteration
/// order are not rolled back -- the caller (the retry loop) treats the
/// entire worker output as unabsorbed and discards its files regardless.
pub fn update_table(schema: &mut Schema, schema_updates: &SchemaUpdate) -> Result<(), ColumnCoercionConflict> {
    for (table, deltas) in &schema_updates.0 {
        for delta in deltas {
            schema.update_table(table, delta)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema_catalog::{ColumnType, PartialTable};

    #[test]
    fn applies_deltas_in_order() {
        let mut schema = Schema::new("s");
        let mut updates = SchemaUpdate::new();
        updates.push("t", PartialTable::default().with_column("a", ColumnType::Integer));
        updates.push("t", PartialTable::default().with_column("a", ColumnType::Double));
        update_table(&mut schema, &updates).unwrap();
        assert_eq!(schema.get_table_columns("t").unwrap()["a"], ColumnType::Double);
    }

    #[test]
    fn conflicting_delta_is_reported() {
        let mut schema = Schema::new("s");
        schema
            .update_table("t", &PartialTable::default().with_column("a", ColumnType::Integer))
            .unwrap();
        let mut updates = SchemaUpdate::new();
        updates.push("t", PartialTable::default().with_column("a", ColumnType::String));
        assert!(update_table(&mut schema, &updates).is_err());
    }
}
