//! # tabdump I/O
//!
//! Reader and writer implementations for the tabdump pipeline: SQLite and
//! PostgreSQL sources, CSV and Parquet sinks, and the row↔Arrow bridge they
//! share. Everything plugs into the orchestrator through the descriptors
//! added by [`register`].

use tabdump_core::{
    DataWriter, DumpOptions, OptionsRegistry, ProviderCatalog, ReaderDescriptor, Result,
    StreamReader, WriterDescriptor,
};

pub mod batch;
mod counting;

/// SQLite file source
pub mod reader_sqlite;

/// PostgreSQL source
pub mod reader_postgres;

/// CSV file sink
pub mod writer_csv;

/// Parquet file sink
pub mod writer_parquet;

pub use writer_csv::{CsvOptions, CsvWriter};
pub use writer_parquet::{ParquetOptions, ParquetWriter};

fn construct_sqlite(
    options: &DumpOptions,
    _registry: &OptionsRegistry,
) -> Result<Box<dyn StreamReader>> {
    Ok(Box::new(reader_sqlite::SqliteReader::new(options)))
}

fn construct_postgres(
    options: &DumpOptions,
    _registry: &OptionsRegistry,
) -> Result<Box<dyn StreamReader>> {
    Ok(Box::new(reader_postgres::PostgresReader::new(options)))
}

fn construct_csv(
    options: &DumpOptions,
    registry: &OptionsRegistry,
) -> Result<Box<dyn DataWriter>> {
    let csv = registry.get_or_default::<CsvOptions>();
    Ok(Box::new(CsvWriter::new(options, csv)?))
}

fn construct_parquet(
    options: &DumpOptions,
    registry: &OptionsRegistry,
) -> Result<Box<dyn DataWriter>> {
    let parquet = registry.get_or_default::<ParquetOptions>();
    Ok(Box::new(ParquetWriter::new(options, parquet)?))
}

/// Adds the built-in reader and writer descriptors to the catalog.
pub fn register(catalog: &mut ProviderCatalog) {
    catalog.add_reader(ReaderDescriptor {
        name: "sqlite",
        env_var: Some("TABDUMP_SQLITE_PATH"),
        can_handle: reader_sqlite::can_handle,
        construct: construct_sqlite,
    });
    catalog.add_reader(ReaderDescriptor {
        name: "postgres",
        env_var: Some("TABDUMP_POSTGRES_DSN"),
        can_handle: reader_postgres::can_handle,
        construct: construct_postgres,
    });
    catalog.add_writer(WriterDescriptor {
        name: "csv",
        extensions: &["csv"],
        construct: construct_csv,
    });
    catalog.add_writer(WriterDescriptor {
        name: "parquet",
        extensions: &["parquet"],
        construct: construct_parquet,
    });
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn catalog_resolves_providers_and_writers() {
        let mut catalog = ProviderCatalog::new();
        register(&mut catalog);

        assert_eq!(catalog.reader("SQLITE", "").unwrap().name, "sqlite");
        assert_eq!(
            catalog.reader("auto", "postgres://db/app").unwrap().name,
            "postgres"
        );
        assert_eq!(
            catalog.writer_for(Path::new("out.CSV")).unwrap().name,
            "csv"
        );
        assert_eq!(
            catalog.writer_for(Path::new("dir/out.parquet")).unwrap().name,
            "parquet"
        );
        assert!(catalog.writer_for(Path::new("out.xlsx")).is_err());
        assert!(catalog.writer_for(Path::new("noext")).is_err());
    }
}
