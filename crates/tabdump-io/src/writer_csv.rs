//! CSV output: UTF-8, RFC 4180 quoting, configurable delimiter and header.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use tabdump_core::{DataWriter, DumpOptions, ExportError, Result, Row, Schema};
use tracing::debug;

use crate::batch::{BytesEncoding, arrow_schema, rows_to_batch};
use crate::counting::CountingWriter;

/// Options bound by the front-end under the `csv` prefix.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: char,
    /// Emit the header row.
    pub header: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            header: true,
        }
    }
}

pub struct CsvWriter {
    path: PathBuf,
    options: Arc<CsvOptions>,
    bytes: Arc<AtomicU64>,
    schema: Option<(Schema, SchemaRef)>,
    writer: Option<arrow_csv::Writer<CountingWriter<File>>>,
    wrote_any: bool,
}

impl CsvWriter {
    pub fn new(options: &DumpOptions, csv: Arc<CsvOptions>) -> Result<Self> {
        if !csv.delimiter.is_ascii() {
            return Err(ExportError::Config(format!(
                "csv delimiter `{}` is not an ASCII character",
                csv.delimiter
            )));
        }
        Ok(Self {
            path: options.output.clone(),
            options: csv,
            bytes: Arc::new(AtomicU64::new(0)),
            schema: None,
            writer: None,
            wrote_any: false,
        })
    }

    fn append(&mut self, batch: &RecordBatch) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ExportError::Internal("csv writer used before initialize".into()))?;
        writer
            .write(batch)
            .map_err(|e| ExportError::Output(e.to_string()))
    }
}

#[async_trait]
impl DataWriter for CsvWriter {
    fn name(&self) -> &str {
        "csv"
    }

    async fn initialize(&mut self, schema: &Schema) -> Result<()> {
        let arrow = arrow_schema(schema, BytesEncoding::Hex);
        let file = File::create(&self.path)
            .map_err(|e| ExportError::Output(format!("cannot create `{}`: {e}", self.path.display())))?;
        let sink = CountingWriter::new(file, Arc::clone(&self.bytes));
        let writer = arrow_csv::WriterBuilder::new()
            .with_header(self.options.header)
            .with_delimiter(self.options.delimiter as u8)
            .build(sink);
        self.schema = Some((schema.clone(), arrow));
        self.writer = Some(writer);
        Ok(())
    }

    async fn write_batch(&mut self, rows: Vec<Row>) -> Result<()> {
        let batch = {
            let (schema, arrow) = self
                .schema
                .as_ref()
                .ok_or_else(|| ExportError::Internal("csv writer used before initialize".into()))?;
            rows_to_batch(schema, arrow, &rows, BytesEncoding::Hex)?
        };
        debug!(rows = batch.num_rows(), "appending csv batch");
        self.append(&batch)?;
        self.wrote_any = self.wrote_any || batch.num_rows() > 0;
        Ok(())
    }

    async fn complete(&mut self) -> Result<()> {
        // The arrow writer only emits the header on its first write; an
        // empty result still gets one so the file is well-formed.
        if !self.wrote_any {
            if let Some((_, arrow)) = &self.schema {
                let empty = RecordBatch::new_empty(Arc::clone(arrow));
                self.append(&empty)?;
            }
        }
        self.writer = None;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}
