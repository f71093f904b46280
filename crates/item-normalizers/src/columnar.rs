use crate::{normalize_row, Error, ItemNormalizer, NormalizeOutput};
use schema_catalog::{ColumnType, RowCounts, SchemaUpdate};
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::path::Path;

/// Columnar normalizer for parquet batches, grounded on the teacher's
/// parquet parser (`parser/src/format/parquet.rs`): open a
/// `SerializedFileReader`, stream rows, and convert each to a JSON value
/// via `row.to_json_value()`.
pub struct ColumnarNormalizer;

impl ItemNormalizer for ColumnarNormalizer {
    fn normalize(
        &self,
        file_path: &Path,
        root_table: &str,
        known_columns: Option<&BTreeMap<String, ColumnType>>,
    ) -> Result<NormalizeOutput, Error> {
        let file = std::fs::File::open(file_path).map_err(|source| Error::Io { path: file_path.to_path_buf(), source })?;
        let file_reader = parquet::file::reader::SerializedFileReader::try_from(file)
            .map_err(|source| Error::Parquet { path: file_path.to_path_buf(), source })?;

        let mut schema_updates = SchemaUpdate::new();
        let mut row_counts = RowCounts::new();
        let mut rows = Vec::new();
        let mut items_count = 0;

        for record in parquet::file::reader::FileReader::get_row_iter(&file_reader, None)
            .map_err(|source| Error::Parquet { path: file_path.to_path_buf(), source })?
        {
            let record = record.map_err(|source| Error::Parquet { path: file_path.to_path_buf(), source })?;
            let value = record.to_json_value();
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
