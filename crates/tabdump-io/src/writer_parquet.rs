//! Parquet output through the Arrow writer, one row group per batch.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arrow_schema::SchemaRef;
use async_trait::async_trait;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use tabdump_core::{DataWriter, DumpOptions, ExportError, Result, Row, Schema};
use tracing::debug;

use crate::batch::{BytesEncoding, arrow_schema, rows_to_batch};
use crate::counting::CountingWriter;

/// Options bound by the front-end under the `parquet` prefix.
#[derive(Debug, Clone)]
pub struct ParquetOptions {
    /// One of `none`, `snappy`, `gzip`, `lz4`, `zstd`.
    pub compression: String,
}

impl Default for ParquetOptions {
    fn default() -> Self {
        Self {
            compression: "zstd".to_owned(),
        }
    }
}

fn parse_compression(name: &str) -> Result<Compression> {
    match name.to_ascii_lowercase().as_str() {
        "none" | "uncompressed" => Ok(Compression::UNCOMPRESSED),
        "snappy" => Ok(Compression::SNAPPY),
        "gzip" => Ok(Compression::GZIP(GzipLevel::default())),
        "lz4" => Ok(Compression::LZ4),
        "zstd" => Ok(Compression::ZSTD(ZstdLevel::default())),
        other => Err(ExportError::Config(format!(
            "unknown parquet compression `{other}`"
        ))),
    }
}

#[derive(Debug)]
pub struct ParquetWriter {
    path: PathBuf,
    compression: Compression,
    /// Row-group size follows the pipeline batch size.
    row_group_size: usize,
    bytes: Arc<AtomicU64>,
    schema: Option<(Schema, SchemaRef)>,
    writer: Option<ArrowWriter<CountingWriter<File>>>,
}

impl ParquetWriter {
    pub fn new(options: &DumpOptions, parquet: Arc<ParquetOptions>) -> Result<Self> {
        Ok(Self {
            path: options.output.clone(),
            compression: parse_compression(&parquet.compression)?,
            row_group_size: options.batch_size.max(1),
            bytes: Arc::new(AtomicU64::new(0)),
            schema: None,
            writer: None,
        })
    }
}

#[async_trait]
impl DataWriter for ParquetWriter {
    fn name(&self) -> &str {
        "parquet"
    }

    async fn initialize(&mut self, schema: &Schema) -> Result<()> {
        let arrow = arrow_schema(schema, BytesEncoding::Binary);
        let file = File::create(&self.path)
            .map_err(|e| ExportError::Output(format!("cannot create `{}`: {e}", self.path.display())))?;
        let sink = CountingWriter::new(file, Arc::clone(&self.bytes));
        let props = WriterProperties::builder()
            .set_max_row_group_size(self.row_group_size)
            .set_compression(self.compression)
            .build();
        let writer = ArrowWriter::try_new(sink, Arc::clone(&arrow), Some(props))
            .map_err(|e| ExportError::Output(e.to_string()))?;
        self.schema = Some((schema.clone(), arrow));
        self.writer = Some(writer);
        Ok(())
    }

    async fn write_batch(&mut self, rows: Vec<Row>) -> Result<()> {
        let batch = {
            let (schema, arrow) = self.schema.as_ref().ok_or_else(|| {
                ExportError::Internal("parquet writer used before initialize".into())
            })?;
            rows_to_batch(schema, arrow, &rows, BytesEncoding::Binary)?
        };
        debug!(rows = batch.num_rows(), "appending parquet batch");
        self.writer
            .as_mut()
            .ok_or_else(|| ExportError::Internal("parquet writer used before initialize".into()))?
            .write(&batch)
            .map_err(|e| ExportError::Output(e.to_string()))
    }

    async fn complete(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .close()
                .map_err(|e| ExportError::Output(e.to_string()))?;
        }
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tabdump_core::{ColumnInfo, LogicalType, Value};

    use super::*;

    fn options(path: PathBuf, batch_size: usize) -> DumpOptions {
        DumpOptions {
            output: path,
            batch_size,
            ..Default::default()
        }
    }

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnInfo::new("id", LogicalType::Int64, false),
            ColumnInfo::new("name", LogicalType::String, true),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn round_trips_rows_and_aligns_row_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let mut writer =
            ParquetWriter::new(&options(path.clone(), 2), Arc::default()).unwrap();
        writer.initialize(&schema()).await.unwrap();
        for chunk in [[1i64, 2], [3, 4]] {
            writer
                .write_batch(
                    chunk
                        .iter()
                        .map(|id| vec![Value::Int64(*id), Value::Str(format!("row{id}"))])
                        .collect(),
                )
                .await
                .unwrap();
        }
        writer.complete().await.unwrap();
        assert!(writer.bytes_written() > 0);

        let file = File::open(&path).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
        assert_eq!(reader.metadata().num_row_groups(), 2);
        let rows: usize = reader
            .build()
            .unwrap()
            .map(|b| b.unwrap().num_rows())
            .sum();
        assert_eq!(rows, 4);
    }

    #[tokio::test]
    async fn empty_result_is_a_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.parquet");
        let mut writer =
            ParquetWriter::new(&options(path.clone(), 10), Arc::default()).unwrap();
        writer.initialize(&schema()).await.unwrap();
        writer.complete().await.unwrap();

        let file = File::open(&path).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
        assert_eq!(reader.schema().fields().len(), 2);
        assert_eq!(reader.build().unwrap().count(), 0);
    }

    #[test]
    fn unknown_compression_is_a_config_error() {
        let parquet = Arc::new(ParquetOptions {
            compression: "brotli9000".into(),
        });
        let err =
            ParquetWriter::new(&options(PathBuf::from("x.parquet"), 10), parquet).unwrap_err();
        assert!(matches!(err, ExportError::Config(_)));
    }
}
