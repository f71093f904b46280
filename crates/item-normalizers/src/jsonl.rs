use crate::{normalize_row, Error, ItemNormalizer, NormalizeOutput};
use schema_catalog::{ColumnType, RowCounts, SchemaUpdate};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

/// Line-oriented normalizer: one JSON object per line.
pub struct JsonlNormalizer;

impl ItemNormalizer for JsonlNormalizer {
    fn normalize(
        &self,
        file_path: &Path,
        root_table: &str,
        known_columns: Option<&BTreeMap<String, ColumnType>>,
    ) -> Result<NormalizeOutput, Error> {
        let file = std::fs::File::open(file_path).map_err(|source| Error::Io { path: file_path.to_path_buf(), source })?;
        let reader = std::io::BufReader::new(file);

        let mut schema_updates = SchemaUpdate::new();
        let mut row_counts = RowCounts::new();
        let mut rows = Vec::new();
        let mut items_count = 0;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| Error::Io { path: file_path.to_path_buf(), source })?;
            if line.trim().is_empty() {
                continue;
            }
            let value: serde_json::Value = serde_json::from_str(&line)
                .map_err(|source| Error::Json { path: file_path.to_path_buf(), line: line_no + 1, source })?;
            let obj = value.as_object().cloned().unwrap_or_default();
            let (partial, row) = normalize_row(&obj, known_columns);
            schema_updates.push(root_table, partial);
            rows.push(row);
            items_count += 1;
            row_counts.add(root_table, 1);
        }

        Ok(NormalizeOutput { schema_updates, items_count, row_counts, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_two_rows_and_infers_integer_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.jsonl");
        std::fs::write(&path, "{\"a\":1}\n{\"a\":2}\n").unwrap();

        let out = JsonlNormalizer.normalize(&path, "t", None).unwrap();
        assert_eq!(out.items_count, 2);
        assert_eq!(out.row_counts.get("t"), 2);
        assert_eq!(out.schema_updates.0["t"].len(), 2);
        assert_eq!(out.schema_updates.0["t"][0].columns["a"], ColumnType::Integer);
    }

    #[test]
    fn coerces_against_known_column_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.jsonl");
        std::fs::write(&path, "{\"x\":1}\n").unwrap();

        let mut known = BTreeMap::new();
        known.insert("x".to_string(), ColumnType::String);
        let out = JsonlNormalizer.normalize(&path, "t", Some(&known)).unwrap();
        assert_eq!(out.schema_updates.0["t"][0].columns["x"], ColumnType::String);
    }
}
