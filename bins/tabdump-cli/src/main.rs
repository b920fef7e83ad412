//! # tabdump: SQL query exporter
//!
//! Streams the result of a read-only SQL query into a Parquet or CSV file,
//! optionally passing every row through anonymization and formatting
//! transformers.
//!
//! ## Usage
//!
//! ```bash
//! # Export a query from SQLite to CSV
//! tabdump -c warehouse.db -q "SELECT * FROM orders" -o orders.csv
//!
//! # Anonymize columns on the way out, reproducibly
//! tabdump -c postgres://app@db/app -q "SELECT * FROM users" -o users.parquet \
//!     --fake "EMAIL:internet.safeemail" --fake "NAME:name.name" \
//!     --null SSN --fake-seed 42
//!
//! # Preview the pipeline's effect on a single row
//! tabdump -c warehouse.db -q "SELECT * FROM users" -o users.csv \
//!     --fake "NAME:name.name" --dry-run
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tabdump_core::{
    DryRunReport, DumpOptions, ExportError, ExportOutcome, ExportService, OptionsRegistry,
    Progress, ProviderCatalog,
};
use tabdump_io::{CsvOptions, ParquetOptions};
use tabdump_tx::{FakeOptions, FakerRegistry, FormatOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments. Descriptor-specific flags carry their options
/// type's prefix (`--fake-*`, `--csv-*`, `--parquet-*`).
#[derive(Parser, Debug)]
#[command(name = "tabdump")]
#[command(version)]
#[command(about = "Export SQL query results to Parquet or CSV")]
struct Args {
    /// Connection string; falls back to the selected provider's
    /// environment variable when omitted
    #[arg(short = 'c', long)]
    connection: Option<String>,

    /// Source provider, or `auto` to detect it from the connection string
    #[arg(long, default_value = "auto")]
    provider: String,

    /// Read-only SQL query to export
    #[arg(short = 'q', long)]
    query: Option<String>,

    /// Output file; the extension selects the format (.csv, .parquet)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Per-fetch query timeout in seconds; 0 disables it
    #[arg(long, default_value_t = 0)]
    query_timeout: u64,

    /// Rows per source fetch and per output batch (Parquet row-group size)
    #[arg(long, default_value_t = 50_000)]
    batch_size: usize,

    /// Stop after this many rows; 0 exports everything
    #[arg(long, default_value_t = 0)]
    limit: u64,

    /// Preview the pipeline's effect on one row without writing anything
    #[arg(long)]
    dry_run: bool,

    /// List available faker datasets and methods, then exit
    #[arg(long)]
    list_fakers: bool,

    /// Replace COLUMN by SPEC: a faker path (`name.firstname`), literal
    /// text, or a template with `{{OTHER_COLUMN}}` references; repeatable
    #[arg(long = "fake", value_name = "COLUMN:SPEC")]
    fake: Vec<String>,

    /// Overwrite COLUMN with null; repeatable
    #[arg(long = "null", value_name = "COLUMN")]
    null: Vec<String>,

    /// Faker locale
    #[arg(long, default_value = "en")]
    fake_locale: String,

    /// Faker seed for reproducible output
    #[arg(long)]
    fake_seed: Option<u64>,

    /// Rewrite COLUMN from a template with `{NAME}` or `{NAME:format}`
    /// placeholders; repeatable
    #[arg(long = "format", value_name = "COLUMN:TEMPLATE")]
    format: Vec<String>,

    /// CSV field delimiter
    #[arg(long, default_value_t = ',')]
    csv_delimiter: char,

    /// Whether to write the CSV header row
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, value_name = "BOOL")]
    csv_header: bool,

    /// Parquet compression: none, snappy, gzip, lz4, zstd
    #[arg(long, default_value = "zstd")]
    parquet_compression: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => {}
        Err(err) => {
            eprintln!("error[{}]: {err}", err.kind());
            debug!(error = ?err, "export failed");
            std::process::exit(err.exit_code());
        }
    }
}

async fn run(args: Args) -> Result<(), ExportError> {
    let mut catalog = ProviderCatalog::new();
    tabdump_io::register(&mut catalog);
    tabdump_tx::register(&mut catalog);

    if args.list_fakers {
        list_fakers(&args.fake_locale)?;
        return Ok(());
    }

    let options = build_options(&args, &catalog)?;
    let registry = bind_options(&args);
    let progress = Arc::new(Progress::new());
    let service = ExportService::new(catalog, options, Arc::new(registry), Arc::clone(&progress));

    let cancel = CancellationToken::new();
    let started = Instant::now();
    let runner = service.run(cancel.clone());
    tokio::pin!(runner);
    let outcome = tokio::select! {
        outcome = &mut runner => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, draining pipeline");
            cancel.cancel();
            runner.await
        }
    }?;

    match outcome {
        ExportOutcome::Completed(summary) => {
            let snapshot = progress.snapshot();
            debug!(
                rows_read = snapshot.rows_read,
                rows_transformed = snapshot.rows_transformed,
                "pipeline counters"
            );
            eprintln!(
                "{} rows written ({} bytes) in {:.1}s",
                summary.rows_written,
                summary.bytes_written,
                started.elapsed().as_secs_f64()
            );
        }
        ExportOutcome::NoColumns => {
            eprintln!("the query returned no columns; nothing to export");
        }
        ExportOutcome::DryRun(report) => print_dry_run(&report),
    }
    Ok(())
}

fn build_options(args: &Args, catalog: &ProviderCatalog) -> Result<DumpOptions, ExportError> {
    let query = args
        .query
        .clone()
        .ok_or_else(|| ExportError::Config("missing --query".into()))?;
    let output = args
        .output
        .clone()
        .ok_or_else(|| ExportError::Config("missing --output".into()))?;
    let connection = match &args.connection {
        Some(connection) if !connection.is_empty() => connection.clone(),
        _ => connection_from_env(&args.provider, catalog)?,
    };
    Ok(DumpOptions {
        provider: args.provider.clone(),
        connection,
        query,
        output,
        connect_timeout: Duration::from_secs(args.connect_timeout),
        query_timeout: (args.query_timeout > 0).then(|| Duration::from_secs(args.query_timeout)),
        batch_size: args.batch_size.max(1),
        limit: (args.limit > 0).then_some(args.limit),
        dry_run: args.dry_run,
    })
}

/// With no `--connection`, a named provider may supply the name of an
/// environment variable to read the connection string from.
fn connection_from_env(provider: &str, catalog: &ProviderCatalog) -> Result<String, ExportError> {
    if !provider.eq_ignore_ascii_case("auto") {
        if let Some(var) = catalog.reader_by_name(provider).and_then(|d| d.env_var) {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    info!(variable = var, "connection string taken from environment");
                    return Ok(value);
                }
            }
            return Err(ExportError::Config(format!(
                "missing --connection (and `{var}` is not set)"
            )));
        }
    }
    Err(ExportError::Config("missing --connection".into()))
}

fn bind_options(args: &Args) -> OptionsRegistry {
    let mut registry = OptionsRegistry::new();
    registry.bind(FakeOptions {
        mappings: args.fake.clone(),
        null_columns: args.null.clone(),
        locale: args.fake_locale.clone(),
        seed: args.fake_seed,
    });
    registry.bind(FormatOptions {
        mappings: args.format.clone(),
    });
    registry.bind(CsvOptions {
        delimiter: args.csv_delimiter,
        header: args.csv_header,
    });
    registry.bind(ParquetOptions {
        compression: args.parquet_compression.clone(),
    });
    registry
}

fn list_fakers(locale: &str) -> Result<(), ExportError> {
    let registry = FakerRegistry::for_locale(locale)?;
    println!("{:<28} RETURNS", "METHOD");
    for method in registry.methods() {
        println!(
            "{:<28} {}",
            format!("{}.{}", method.dataset, method.method),
            method.returns
        );
    }
    Ok(())
}

/// Renders the dry-run diff: one line per output column, changed cells
/// marked in the first column.
fn print_dry_run(report: &DryRunReport) {
    let mut rows: Vec<[String; 6]> = vec![[
        String::new(),
        "COLUMN".into(),
        "IN TYPE".into(),
        "IN VALUE".into(),
        "OUT TYPE".into(),
        "OUT VALUE".into(),
    ]];
    for column in &report.columns {
        let name = if column.is_virtual {
            format!("{} (virtual)", column.name)
        } else {
            column.name.clone()
        };
        rows.push([
            if column.changed { "*".into() } else { String::new() },
            name,
            column
                .input_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".into()),
            column.input_value.clone().unwrap_or_else(|| "-".into()),
            column.output_type.to_string(),
            column.output_value.clone().unwrap_or_else(|| "-".into()),
        ]);
    }

    let mut widths = [0usize; 6];
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }
    for row in &rows {
        let line = row
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{cell:<width$}", width = widths[i]))
            .collect::<Vec<_>>()
            .join("  ");
        println!("{}", line.trim_end());
    }
}
