//! The export orchestrator: descriptor resolution, schema threading, and
//! the three-stage streaming pipeline.
//!
//! Producer, transformer, and consumer run as separate tokio tasks joined by
//! two bounded row channels. Backpressure is `send().await` on a full
//! channel: a slow writer stalls the transformer, which stalls the producer,
//! which stalls the database cursor. A single cancellation token links the
//! stages; the failing stage fires it and keeps its own error, peers exit at
//! their next suspension point, and the orchestrator reports the first real
//! error rather than the cascade. Reaching the row limit is not an error:
//! the producer simply drops its sender and lets the pipeline drain.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ExportError, Result};
use crate::options::{DumpOptions, OptionsRegistry};
use crate::progress::Progress;
use crate::provider::{DataTransformer, DataWriter, ProviderCatalog, StreamReader};
use crate::schema::Schema;
use crate::value::{LogicalType, Row, Value};

/// Rows buffered per channel before the sender blocks.
pub const CHANNEL_CAPACITY: usize = 1000;

/// How a run ended when no error occurred.
#[derive(Debug)]
pub enum ExportOutcome {
    Completed(ExportSummary),
    /// The query produced no columns; nothing was written.
    NoColumns,
    DryRun(DryRunReport),
}

#[derive(Debug, Clone, Copy)]
pub struct ExportSummary {
    pub rows_read: u64,
    pub rows_written: u64,
    pub bytes_written: u64,
}

/// One line of the dry-run diff: a writer-visible or virtual column with its
/// value before and after the transformer chain.
#[derive(Debug)]
pub struct DryRunColumn {
    pub name: String,
    pub input_type: Option<LogicalType>,
    pub input_value: Option<String>,
    pub output_type: LogicalType,
    pub output_value: Option<String>,
    pub is_virtual: bool,
    pub changed: bool,
}

#[derive(Debug)]
pub struct DryRunReport {
    pub columns: Vec<DryRunColumn>,
}

pub struct ExportService {
    catalog: ProviderCatalog,
    options: DumpOptions,
    registry: Arc<OptionsRegistry>,
    progress: Arc<Progress>,
}

enum Prepared {
    NoColumns,
    DryRun(DryRunReport),
    Pipeline {
        transformers: Vec<Box<dyn DataTransformer>>,
        writer: Box<dyn DataWriter>,
        /// Indices of the non-virtual columns in the chain's output schema.
        physical: Vec<usize>,
    },
}

impl ExportService {
    pub fn new(
        catalog: ProviderCatalog,
        options: DumpOptions,
        registry: Arc<OptionsRegistry>,
        progress: Arc<Progress>,
    ) -> Self {
        Self {
            catalog,
            options,
            registry,
            progress,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<ExportOutcome> {
        let descriptor = self
            .catalog
            .reader(&self.options.provider, &self.options.connection)?;
        info!(provider = descriptor.name, "opening source");
        let mut reader = (descriptor.construct)(&self.options, &self.registry)?;

        match self.prepare(reader.as_mut()).await {
            Err(err) => {
                reader.close().await;
                Err(err)
            }
            Ok(Prepared::NoColumns) => {
                reader.close().await;
                Ok(ExportOutcome::NoColumns)
            }
            Ok(Prepared::DryRun(report)) => {
                reader.close().await;
                Ok(ExportOutcome::DryRun(report))
            }
            Ok(Prepared::Pipeline {
                transformers,
                writer,
                physical,
            }) => {
                self.run_pipeline(reader, transformers, writer, physical, cancel)
                    .await
            }
        }
    }

    /// Everything up to (but not including) the concurrent part: open the
    /// reader, thread the schema through the transformer chain, and either
    /// produce the dry-run diff or initialize the writer.
    async fn prepare(&self, reader: &mut dyn StreamReader) -> Result<Prepared> {
        reader.open().await?;
        let source_schema = reader.schema().clone();
        if source_schema.is_empty() {
            return Ok(Prepared::NoColumns);
        }

        let mut transformers: Vec<Box<dyn DataTransformer>> = Vec::new();
        let mut schema = source_schema.clone();
        for descriptor in self.catalog.transformers() {
            if !(descriptor.enabled)(&self.registry) {
                continue;
            }
            let mut transformer = (descriptor.construct)(&self.registry)?;
            schema = transformer.initialize(&schema)?;
            debug!(
                transformer = transformer.name(),
                columns = schema.len(),
                "transformer initialized"
            );
            transformers.push(transformer);
        }

        if self.options.dry_run {
            let report = dry_run_diff(reader, &source_schema, &mut transformers, &schema).await?;
            return Ok(Prepared::DryRun(report));
        }

        let writer_schema = schema.without_virtual();
        let descriptor = self.catalog.writer_for(&self.options.output)?;
        info!(
            writer = descriptor.name,
            output = %self.options.output.display(),
            "initializing output"
        );
        let mut writer = (descriptor.construct)(&self.options, &self.registry)?;
        writer.initialize(&writer_schema).await?;

        // Rows leaving the transform stage still carry virtual cells; the
        // consumer projects them away to match the writer schema.
        Ok(Prepared::Pipeline {
            transformers,
            writer,
            physical: schema.physical_indices(),
        })
    }

    async fn run_pipeline(
        &self,
        reader: Box<dyn StreamReader>,
        transformers: Vec<Box<dyn DataTransformer>>,
        writer: Box<dyn DataWriter>,
        physical: Vec<usize>,
        cancel: CancellationToken,
    ) -> Result<ExportOutcome> {
        let batch_size = self.options.batch_size.max(1);
        let (raw_tx, raw_rx) = mpsc::channel::<Row>(CHANNEL_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel::<Row>(CHANNEL_CAPACITY);

        let producer = tokio::spawn(producer_stage(
            reader,
            raw_tx,
            batch_size,
            self.options.limit,
            cancel.clone(),
            Arc::clone(&self.progress),
        ));
        let transform = tokio::spawn(transform_stage(
            transformers,
            raw_rx,
            out_tx,
            cancel.clone(),
            Arc::clone(&self.progress),
        ));
        let consumer = tokio::spawn(consumer_stage(
            writer,
            out_rx,
            batch_size,
            physical,
            cancel.clone(),
            Arc::clone(&self.progress),
        ));

        let (producer_res, transform_res, consumer_res) =
            tokio::join!(producer, transform, consumer);
        let producer_res = flatten_join(producer_res);
        let transform_res = flatten_join(transform_res);
        let consumer_res = flatten_join(consumer_res);

        let mut errors = Vec::new();
        let rows_read = match producer_res {
            Ok(n) => n,
            Err(e) => {
                errors.push(e);
                0
            }
        };
        if let Err(e) = transform_res {
            errors.push(e);
        }
        let written = match consumer_res {
            Ok(counts) => Some(counts),
            Err(e) => {
                errors.push(e);
                None
            }
        };

        if let Some(err) = take_first_real_error(&mut errors) {
            return Err(err);
        }
        if !errors.is_empty() {
            return Err(ExportError::Cancelled);
        }
        let (rows_written, bytes_written) =
            written.ok_or_else(|| ExportError::Internal("consumer vanished".to_owned()))?;
        Ok(ExportOutcome::Completed(ExportSummary {
            rows_read,
            rows_written,
            bytes_written,
        }))
    }
}

/// Prefer the originating failure: the failing stage fired the cancellation
/// token, so its peers only ever report `Cancelled`. Ties between genuine
/// simultaneous failures resolve in producer, transform, consumer order.
fn take_first_real_error(errors: &mut Vec<ExportError>) -> Option<ExportError> {
    let idx = errors
        .iter()
        .position(|e| !matches!(e, ExportError::Cancelled))?;
    Some(errors.swap_remove(idx))
}

fn flatten_join<T>(
    joined: std::result::Result<Result<T>, tokio::task::JoinError>,
) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(err) => Err(ExportError::Internal(format!("pipeline stage died: {err}"))),
    }
}

async fn producer_stage(
    mut reader: Box<dyn StreamReader>,
    tx: mpsc::Sender<Row>,
    batch_size: usize,
    limit: Option<u64>,
    cancel: CancellationToken,
    progress: Arc<Progress>,
) -> Result<u64> {
    let mut sent: u64 = 0;
    let result = 'read: loop {
        if limit.is_some_and(|limit| sent >= limit) {
            debug!(rows = sent, "row limit reached, stopping producer");
            break Ok(());
        }
        let fetched = tokio::select! {
            _ = cancel.cancelled() => break Err(ExportError::Cancelled),
            batch = reader.next_batch(batch_size) => batch,
        };
        let rows = match fetched {
            Ok(Some(rows)) => rows,
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        };
        for row in rows {
            let delivered = tokio::select! {
                _ = cancel.cancelled() => break 'read Err(ExportError::Cancelled),
                delivered = tx.send(row) => delivered,
            };
            if delivered.is_err() {
                // Downstream hung up; whatever killed it reports the error.
                break 'read Ok(());
            }
            sent += 1;
            progress.add_read(1);
            if limit.is_some_and(|limit| sent >= limit) {
                debug!(rows = sent, "row limit reached, stopping producer");
                break 'read Ok(());
            }
        }
    };
    reader.close().await;
    match result {
        Ok(()) => Ok(sent),
        Err(err) => {
            if !matches!(err, ExportError::Cancelled) {
                cancel.cancel();
            }
            Err(err)
        }
    }
}

async fn transform_stage(
    mut transformers: Vec<Box<dyn DataTransformer>>,
    mut rx: mpsc::Receiver<Row>,
    tx: mpsc::Sender<Row>,
    cancel: CancellationToken,
    progress: Arc<Progress>,
) -> Result<u64> {
    let mut count: u64 = 0;
    let result = loop {
        let row = tokio::select! {
            _ = cancel.cancelled() => break Err(ExportError::Cancelled),
            received = rx.recv() => match received {
                Some(row) => row,
                None => break Ok(()),
            },
        };
        let transformed = transformers
            .iter_mut()
            .try_fold(row, |row, t| t.transform(row));
        let row = match transformed {
            Ok(row) => row,
            Err(err) => break Err(err),
        };
        let delivered = tokio::select! {
            _ = cancel.cancelled() => break Err(ExportError::Cancelled),
            delivered = tx.send(row) => delivered,
        };
        if delivered.is_err() {
            break Ok(());
        }
        count += 1;
        progress.add_transformed(1);
    };
    match result {
        Ok(()) => Ok(count),
        Err(err) => {
            if !matches!(err, ExportError::Cancelled) {
                cancel.cancel();
            }
            Err(err)
        }
    }
}

async fn consumer_stage(
    mut writer: Box<dyn DataWriter>,
    mut rx: mpsc::Receiver<Row>,
    batch_size: usize,
    physical: Vec<usize>,
    cancel: CancellationToken,
    progress: Arc<Progress>,
) -> Result<(u64, u64)> {
    // Virtual cells are dropped here, right before the writer boundary.
    let project = |mut row: Row| -> Row {
        if physical.len() == row.len() {
            return row;
        }
        physical
            .iter()
            .map(|&i| std::mem::replace(&mut row[i], Value::Null))
            .collect()
    };

    let mut pending: Vec<Row> = Vec::with_capacity(batch_size.min(CHANNEL_CAPACITY));
    let mut written: u64 = 0;
    let result = loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break Err(ExportError::Cancelled),
            received = rx.recv() => received,
        };
        match received {
            Some(row) => {
                pending.push(project(row));
                if pending.len() >= batch_size {
                    let rows = pending.len() as u64;
                    if let Err(err) = writer.write_batch(std::mem::take(&mut pending)).await {
                        break Err(err);
                    }
                    written += rows;
                    progress.add_written(rows);
                    progress.record_bytes(writer.bytes_written());
                }
            }
            None => {
                // Channel drained. Only complete if nothing upstream failed
                // in the meantime.
                if cancel.is_cancelled() {
                    break Err(ExportError::Cancelled);
                }
                if !pending.is_empty() {
                    let rows = pending.len() as u64;
                    if let Err(err) = writer.write_batch(std::mem::take(&mut pending)).await {
                        break Err(err);
                    }
                    written += rows;
                    progress.add_written(rows);
                }
                if let Err(err) = writer.complete().await {
                    break Err(err);
                }
                progress.record_bytes(writer.bytes_written());
                break Ok(());
            }
        }
    };
    match result {
        Ok(()) => Ok((written, writer.bytes_written())),
        Err(err) => {
            if written > 0 || !matches!(err, ExportError::Cancelled) {
                warn!("export did not finish; the output file may be incomplete");
            }
            if !matches!(err, ExportError::Cancelled) {
                cancel.cancel();
            }
            Err(err)
        }
    }
}

/// Fetches a single row, runs it through the chain, and reports the
/// per-column effect. The writer is never constructed.
async fn dry_run_diff(
    reader: &mut dyn StreamReader,
    source_schema: &Schema,
    transformers: &mut [Box<dyn DataTransformer>],
    output_schema: &Schema,
) -> Result<DryRunReport> {
    let sample = reader
        .next_batch(1)
        .await?
        .and_then(|rows| rows.into_iter().next());

    let (input_row, output_row) = match sample {
        Some(row) => {
            let input = row.clone();
            let output = transformers
                .iter_mut()
                .try_fold(row, |row, t| t.transform(row))?;
            (Some(input), Some(output))
        }
        None => (None, None),
    };

    let render = |row: &Option<Row>, index: usize| -> Option<String> {
        row.as_ref().map(|r| r[index].to_string())
    };

    let mut columns = Vec::with_capacity(output_schema.len());
    for (out_idx, column) in output_schema.columns().iter().enumerate() {
        let in_idx = source_schema.index_of(&column.name);
        let input_type = in_idx.map(|i| source_schema.column(i).data_type);
        let input_value = in_idx.and_then(|i| render(&input_row, i));
        let output_value = render(&output_row, out_idx);
        let changed = input_type != Some(column.data_type) || input_value != output_value;
        columns.push(DryRunColumn {
            name: column.name.clone(),
            input_type,
            input_value,
            output_value,
            output_type: column.data_type,
            is_virtual: column.is_virtual,
            changed,
        });
    }
    Ok(DryRunReport { columns })
}
