//! Capability traits and the passive descriptors that select them.
//!
//! A descriptor is an immutable record: provider name, a predicate, and a
//! constructor returning the boxed capability. The set is fixed at process
//! start by each implementation crate's `register` function; lookups are by
//! provider name or output-path extension, never by dynamic loading.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{ExportError, Result};
use crate::options::{DumpOptions, OptionsRegistry};
use crate::schema::Schema;
use crate::value::Row;

/// Produces row batches from a relational source.
///
/// `open` establishes the connection, submits the query, and materializes
/// the column schema; statements other than `SELECT`/`WITH` are rejected
/// before they reach the engine. The batch sequence is lazy and not
/// restartable. `close` is idempotent and must be called on every exit path.
#[async_trait]
pub trait StreamReader: Send {
    fn name(&self) -> &str;

    async fn open(&mut self) -> Result<()>;

    /// The source schema. Valid only after a successful `open`.
    fn schema(&self) -> &Schema;

    /// The next batch of 1..=`max_rows` rows, or `None` once the result set
    /// is exhausted.
    async fn next_batch(&mut self, max_rows: usize) -> Result<Option<Vec<Row>>>;

    async fn close(&mut self);
}

/// Appends row batches to an output file.
///
/// The schema handed to `initialize` never contains virtual columns. The
/// output is self-consistent only after `complete`; an interrupted run
/// leaves it in an implementation-defined state.
#[async_trait]
pub trait DataWriter: Send {
    fn name(&self) -> &str;

    async fn initialize(&mut self, schema: &Schema) -> Result<()>;

    async fn write_batch(&mut self, rows: Vec<Row>) -> Result<()>;

    async fn complete(&mut self) -> Result<()>;

    /// Monotonic byte counter for progress reporting.
    fn bytes_written(&self) -> u64;
}

/// Schema-rewriting, row-rewriting pipeline stage.
///
/// `initialize` is one-shot: it receives the cumulative schema produced by
/// all upstream transformers and publishes the schema the next stage sees.
/// `transform` is synchronous and must not block on I/O; it may mutate the
/// row in place or return a new one.
pub trait DataTransformer: Send {
    fn name(&self) -> &str;

    fn initialize(&mut self, input: &Schema) -> Result<Schema>;

    fn transform(&mut self, row: Row) -> Result<Row>;
}

pub type ReaderFactory = fn(&DumpOptions, &OptionsRegistry) -> Result<Box<dyn StreamReader>>;
pub type WriterFactory = fn(&DumpOptions, &OptionsRegistry) -> Result<Box<dyn DataWriter>>;
pub type TransformerFactory = fn(&OptionsRegistry) -> Result<Box<dyn DataTransformer>>;

pub struct ReaderDescriptor {
    pub name: &'static str,
    /// Environment variable consulted when the connection flag is empty.
    pub env_var: Option<&'static str>,
    /// Connection-string predicate used by `auto` provider selection.
    pub can_handle: fn(&str) -> bool,
    pub construct: ReaderFactory,
}

pub struct WriterDescriptor {
    pub name: &'static str,
    /// Lowercase output-path extensions this writer claims.
    pub extensions: &'static [&'static str],
    pub construct: WriterFactory,
}

pub struct TransformerDescriptor {
    pub name: &'static str,
    /// Whether the bound options activate this transformer for the run.
    pub enabled: fn(&OptionsRegistry) -> bool,
    pub construct: TransformerFactory,
}

/// The full descriptor set for a process, in registration order. Transformer
/// order is fixed: transformers run in the order they were registered.
#[derive(Default)]
pub struct ProviderCatalog {
    readers: Vec<ReaderDescriptor>,
    writers: Vec<WriterDescriptor>,
    transformers: Vec<TransformerDescriptor>,
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_reader(&mut self, descriptor: ReaderDescriptor) {
        self.readers.push(descriptor);
    }

    pub fn add_writer(&mut self, descriptor: WriterDescriptor) {
        self.writers.push(descriptor);
    }

    pub fn add_transformer(&mut self, descriptor: TransformerDescriptor) {
        self.transformers.push(descriptor);
    }

    pub fn readers(&self) -> &[ReaderDescriptor] {
        &self.readers
    }

    pub fn transformers(&self) -> &[TransformerDescriptor] {
        &self.transformers
    }

    /// Resolves the reader for a run: by case-insensitive provider name, or
    /// for `auto` by asking each descriptor whether it recognizes the
    /// connection string.
    pub fn reader(&self, provider: &str, connection: &str) -> Result<&ReaderDescriptor> {
        if provider.eq_ignore_ascii_case("auto") {
            return self
                .readers
                .iter()
                .find(|d| (d.can_handle)(connection))
                .ok_or_else(|| {
                    ExportError::Config(
                        "no provider recognizes the connection string; pass --provider".to_owned(),
                    )
                });
        }
        self.readers
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(provider))
            .ok_or_else(|| ExportError::Config(format!("unknown provider `{provider}`")))
    }

    pub fn reader_by_name(&self, provider: &str) -> Option<&ReaderDescriptor> {
        self.readers
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(provider))
    }

    /// Resolves the writer by the output path's extension.
    pub fn writer_for(&self, output: &Path) -> Result<&WriterDescriptor> {
        let ext = output
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .ok_or_else(|| {
                ExportError::Config(format!(
                    "cannot infer output format: `{}` has no extension",
                    output.display()
                ))
            })?;
        self.writers
            .iter()
            .find(|d| d.extensions.contains(&ext.as_str()))
            .ok_or_else(|| ExportError::Config(format!("no writer for `.{ext}` output")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_reader(_: &DumpOptions, _: &OptionsRegistry) -> Result<Box<dyn StreamReader>> {
        Err(ExportError::Internal("not constructible in tests".into()))
    }

    fn catalog() -> ProviderCatalog {
        let mut catalog = ProviderCatalog::new();
        catalog.add_reader(ReaderDescriptor {
            name: "sqlite",
            env_var: None,
            can_handle: |c| c.starts_with("sqlite:"),
            construct: noop_reader,
        });
        catalog.add_reader(ReaderDescriptor {
            name: "postgres",
            env_var: None,
            can_handle: |c| c.starts_with("postgres://"),
            construct: noop_reader,
        });
        catalog
    }

    #[test]
    fn lookup_by_name_is_case_insensitive() {
        let catalog = catalog();
        assert_eq!(catalog.reader("SQLite", "").unwrap().name, "sqlite");
        assert!(matches!(
            catalog.reader("mysql", ""),
            Err(ExportError::Config(_))
        ));
    }

    #[test]
    fn auto_sniffs_the_connection_string() {
        let catalog = catalog();
        let desc = catalog.reader("auto", "postgres://db/app").unwrap();
        assert_eq!(desc.name, "postgres");
        assert!(matches!(
            catalog.reader("auto", "mysql://nope"),
            Err(ExportError::Config(_))
        ));
    }
}
