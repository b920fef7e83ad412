//! # tabdump core
//!
//! Foundational types and the orchestrator for the tabdump export pipeline.
//! This crate defines the row/value/schema data model, the closed error-kind
//! set, the capability traits readers, writers, and transformers implement,
//! the descriptor records that select them, and the [`ExportService`] that
//! wires everything into a three-stage concurrent pipeline.
//!
//! ## Key components
//!
//! - **Data model**: [`Value`], [`Row`], [`LogicalType`], [`Schema`]
//! - **Capabilities**: [`StreamReader`], [`DataWriter`], [`DataTransformer`]
//! - **Dispatch**: [`ProviderCatalog`] over passive descriptor records
//! - **Orchestration**: [`ExportService`] with bounded channels,
//!   backpressure, cancellation, row limits, and dry-run
//!
//! Concrete readers/writers live in `tabdump-io`, row transformers in
//! `tabdump-tx`; both plug in through [`ProviderCatalog`] at startup.

pub mod error;
pub mod export;
pub mod options;
pub mod progress;
pub mod provider;
pub mod query;
pub mod schema;
pub mod value;

pub use error::{ExportError, Result};
pub use export::{
    DryRunColumn, DryRunReport, ExportOutcome, ExportService, ExportSummary, CHANNEL_CAPACITY,
};
pub use options::{DumpOptions, OptionsRegistry};
pub use progress::{Progress, ProgressSnapshot};
pub use provider::{
    DataTransformer, DataWriter, ProviderCatalog, ReaderDescriptor, StreamReader,
    TransformerDescriptor, WriterDescriptor,
};
pub use query::ensure_read_only;
pub use schema::{ColumnInfo, Schema};
pub use value::{LogicalType, Row, Value};
