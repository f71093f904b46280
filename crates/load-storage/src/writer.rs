use normalize_storage::LoaderFileFormat;
use schema_catalog::ColumnType;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("arrow error writing {path}: {source}")]
    Arrow {
        path: PathBuf,
        #[source]
        source: arrow::error::ArrowError,
    },
    #[error("parquet error writing {path}: {source}")]
    Parquet {
        path: PathBuf,
        #[source]
        source: parquet::errors::ParquetError,
    },
}

/// One open output file for a single `(table, format)` pair within a load
/// package. A worker holds one of these per table it is actively writing;
/// [`TableWriter::finish`] is called for every open writer from
/// `close_writers`, on both success and failure paths.
pub trait TableWriter: Send {
    fn write_row(&mut self, row: &serde_json::Value) -> Result<(), Error>;
    fn finish(self: Box<Self>) -> Result<PathBuf, Error>;
}

pub struct JsonlWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlWriter {
    pub fn create(path: PathBuf) -> Result<Self, Error> {
        let file = File::create(&path).map_err(|source| Error::Io { path: path.clone(), source })?;
        Ok(Self { path, writer: BufWriter::new(file) })
    }
}

impl TableWriter for JsonlWriter {
    fn write_row(&mut self, row: &serde_json::Value) -> Result<(), Error> {
        serde_json::to_writer(&mut self.writer, row).map_err(|e| Error::Io {
            path: self.path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        self.writer.write_all(b"\n").map_err(|source| Error::Io { path: self.path.clone(), source })
    }

    fn finish(mut self: Box<Self>) -> Result<PathBuf, Error> {
        self.writer.flush().map_err(|source| Error::Io { path: self.path.clone(), source })?;
        Ok(self.path)
    }
}

/// Columnar writer used for both `parquet` and `arrow` (the write-side
/// alias, `spec.md` §4.3 step 2). Rows are buffered as JSON values and
/// assembled into a single Arrow `RecordBatch` at `finish` time, then
/// encoded with the format-appropriate writer. Buffering the whole table in
/// memory is acceptable here: load packages are bounded per-file batches,
/// not unbounded streams.
pub struct ColumnarWriter {
    path: PathBuf,
    format: LoaderFileFormat,
    columns: Vec<(String, ColumnType)>,
    rows: Vec<BTreeMap<String, serde_json::Value>>,
}

impl ColumnarWriter {
    pub fn create(path: PathBuf, format: LoaderFileFormat, columns: BTreeMap<String, ColumnType>) -> Self {
        Self { path, format, columns: columns.into_iter().collect(), rows: Vec::new() }
    }

    fn arrow_schema(&self) -> arrow::datatypes::Schema {
        let fields: Vec<arrow::datatypes::Field> = self
            .columns
            .iter()
            .map(|(name, ty)| arrow::datatypes::Field::new(name, arrow_type(*ty), true))
            .collect();
        arrow::datatypes::Schema::new(fields)
    }

    fn build_record_batch(&self) -> Result<arrow::record_batch::RecordBatch, Error> {
        let schema = Arc::new(self.arrow_schema());
        let mut columns: Vec<arrow::array::ArrayRef> = Vec::with_capacity(self.columns.len());
        for (name, ty) in &self.columns {
            columns.push(build_column(*ty, &self.rows, name));
        }
        arrow::record_batch::RecordBatch::try_new(schema, columns)
            .map_err(|source| Error::Arrow { path: self.path.clone(), source })
    }
}

impl TableWriter for ColumnarWriter {
    fn write_row(&mut self, row: &serde_json::Value) -> Result<(), Error> {
        let obj = row.as_object().cloned().unwrap_or_default();
        self.rows.push(obj.into_iter().collect());
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<PathBuf, Error> {
        let batch = self.build_record_batch()?;
        let file = File::create(&self.path).map_err(|source| Error::Io { path: self.path.clone(), source })?;
        match self.format {
            LoaderFileFormat::Parquet => {
                let mut writer = parquet::arrow::arrow_writer::ArrowWriter::try_new(file, batch.schema(), None)
                    .map_err(|source| Error::Parquet { path: self.path.clone(), source })?;
                writer.write(&batch).map_err(|source| Error::Parquet { path: self.path.clone(), source })?;
                writer.close().map_err(|source| Error::Parquet { path: self.path.clone(), source })?;
            }
            LoaderFileFormat::Arrow => {
                let mut writer = arrow::ipc::writer::FileWriter::try_new(file, &batch.schema())
                    .map_err(|source| Error::Arrow { path: self.path.clone(), source })?;
                writer.write(&batch).map_err(|source| Error::Arrow { path: self.path.clone(), source })?;
                writer.finish().map_err(|source| Error::Arrow { path: self.path.clone(), source })?;
            }
            LoaderFileFormat::Jsonl => unreachable!("ColumnarWriter is never used for jsonl"),
        }
        Ok(self.path)
    }
}

fn arrow_type(ty: ColumnType) -> arrow::datatypes::DataType {
    use arrow::datatypes::DataType;
    match ty {
        ColumnType::Boolean => DataType::Boolean,
        ColumnType::Integer => DataType::Int64,
        ColumnType::Double => DataType::Float64,
        ColumnType::Timestamp => DataType::Utf8,
        ColumnType::String => DataType::Utf8,
        ColumnType::Json => DataType::Utf8,
    }
}

fn build_column(
    ty: ColumnType,
    rows: &[BTreeMap<String, serde_json::Value>],
    name: &str,
) -> arrow::array::ArrayRef {
    use arrow::array::{BooleanArray, Float64Array, Int64Array, StringArray};
    let values = || rows.iter().map(|r| r.get(name));

    match ty {
        ColumnType::Boolean => {
            Arc::new(BooleanArray::from(values().map(|v| v.and_then(|v| v.as_bool())).collect::<Vec<_>>()))
        }
        ColumnType::Integer => {
            Arc::new(Int64Array::from(values().map(|v| v.and_then(|v| v.as_i64())).collect::<Vec<_>>()))
        }
        ColumnType::Double => {
            Arc::new(Float64Array::from(values().map(|v| v.and_then(|v| v.as_f64())).collect::<Vec<_>>()))
        }
        ColumnType::Timestamp | ColumnType::String | ColumnType::Json => Arc::new(StringArray::from(
            values()
                .map(|v| v.map(|v| v.as_str().map(|s| s.to_string()).unwrap_or_else(|| v.to_string())))
                .collect::<Vec<_>>(),
        )),
    }
}

pub fn new_writer(
    path: &Path,
    format: LoaderFileFormat,
    columns: BTreeMap<String, ColumnType>,
) -> Result<Box<dyn TableWriter>, Error> {
    match format {
        LoaderFileFormat::Jsonl => Ok(Box::new(JsonlWriter::create(path.to_path_buf())?)),
        LoaderFileFormat::Parquet | LoaderFileFormat::Arrow => {
            Ok(Box::new(ColumnarWriter::create(path.to_path_buf(), format, columns)))
        }
    }
}
