//! End-to-end pipeline tests: reader → transformers → writer through the
//! orchestrator, against the mock provider and against real SQLite files.

mod common;

use std::path::PathBuf;
use std::time::Duration;

use tabdump_core::{DumpOptions, ExportError, ExportOutcome, OptionsRegistry};
use tabdump_tx::{FakeOptions, FormatOptions};
use tempfile::TempDir;

fn options(connection: &str, query: &str, output: PathBuf) -> DumpOptions {
    DumpOptions {
        provider: "auto".into(),
        connection: connection.into(),
        query: query.into(),
        output,
        ..Default::default()
    }
}

fn out(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

#[tokio::test]
async fn plain_csv_export() {
    let dir = tempfile::tempdir().unwrap();
    let path = out(&dir, "out.csv");
    let opts = options("mock:people", "SELECT 1", path.clone());
    let outcome = common::run(opts, OptionsRegistry::new()).await.unwrap();

    let ExportOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.rows_read, 2);
    assert_eq!(summary.rows_written, 2);
    assert!(summary.bytes_written > 0);
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "id,name,active,score\n1,Alice,true,95.50\n2,Bob,false,80.00\n"
    );
}

#[tokio::test]
async fn sqlite_to_csv_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let db = out(&dir, "app.db");
    {
        let conn = rusqlite::Connection::open(&db).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER, name TEXT, active BOOLEAN);
             INSERT INTO users VALUES (1, 'Alice', 1), (2, 'Bob', 0), (3, NULL, 1);",
        )
        .unwrap();
    }

    let path = out(&dir, "users.csv");
    let opts = options(
        db.to_str().unwrap(),
        "SELECT id, name, active FROM users ORDER BY id",
        path.clone(),
    );
    let outcome = common::run(opts, OptionsRegistry::new()).await.unwrap();
    assert!(matches!(outcome, ExportOutcome::Completed(_)));
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "id,name,active\n1,Alice,true\n2,Bob,false\n3,,true\n"
    );
}

#[tokio::test]
async fn row_limit_stops_the_producer() {
    let dir = tempfile::tempdir().unwrap();
    let path = out(&dir, "limited.csv");
    let mut opts = options("mock:rows=10000000", "SELECT 1", path.clone());
    opts.batch_size = 100;
    opts.limit = Some(1000);
    let outcome = common::run(opts, OptionsRegistry::new()).await.unwrap();

    let ExportOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.rows_read, 1000);
    assert_eq!(summary.rows_written, 1000);
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 1001);
}

#[tokio::test]
async fn row_limit_equal_to_source_size_is_a_clean_finish() {
    let dir = tempfile::tempdir().unwrap();
    let path = out(&dir, "exact.csv");
    let mut opts = options("mock:rows=100", "SELECT 1", path.clone());
    opts.batch_size = 7;
    opts.limit = Some(100);
    let outcome = common::run(opts, OptionsRegistry::new()).await.unwrap();
    let ExportOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.rows_written, 100);
}

#[tokio::test]
async fn rows_arrive_in_source_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = out(&dir, "ordered.csv");
    let mut opts = options("mock:rows=2500", "SELECT 1", path.clone());
    opts.batch_size = 64;
    common::run(opts, OptionsRegistry::new()).await.unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    for (expected, line) in content.lines().skip(1).enumerate() {
        let id: usize = line.split(',').next().unwrap().parse().unwrap();
        assert_eq!(id, expected);
    }
}

#[tokio::test]
async fn empty_result_set_produces_a_valid_file() {
    let dir = tempfile::tempdir().unwrap();
    let db = out(&dir, "app.db");
    rusqlite::Connection::open(&db)
        .unwrap()
        .execute_batch("CREATE TABLE t (a INTEGER, b TEXT);")
        .unwrap();

    let path = out(&dir, "empty.csv");
    let opts = options(
        db.to_str().unwrap(),
        "SELECT a, b FROM t",
        path.clone(),
    );
    let outcome = common::run(opts, OptionsRegistry::new()).await.unwrap();
    assert!(matches!(outcome, ExportOutcome::Completed(_)));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "a,b\n");
}

#[tokio::test]
async fn non_select_statement_is_refused_before_any_output() {
    let dir = tempfile::tempdir().unwrap();
    let db = out(&dir, "app.db");
    rusqlite::Connection::open(&db)
        .unwrap()
        .execute_batch("CREATE TABLE t (a INTEGER);")
        .unwrap();

    let path = out(&dir, "never.csv");
    let opts = options(db.to_str().unwrap(), "DELETE FROM t", path.clone());
    let err = common::run(opts, OptionsRegistry::new()).await.unwrap_err();
    assert!(matches!(err, ExportError::Security(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(!path.exists());
}

#[tokio::test]
async fn seeded_fake_runs_are_identical() {
    let dir = tempfile::tempdir().unwrap();
    let mut contents = Vec::new();
    for run in 0..2 {
        let path = out(&dir, &format!("fake{run}.csv"));
        let opts = options("mock:people", "SELECT 1", path.clone());
        let mut registry = OptionsRegistry::new();
        registry.bind(FakeOptions {
            mappings: vec!["NAME:name.firstname".into()],
            seed: Some(42),
            ..Default::default()
        });
        common::run(opts, registry).await.unwrap();
        contents.push(std::fs::read_to_string(&path).unwrap());
    }
    assert_eq!(contents[0], contents[1]);
    let names: Vec<&str> = contents[0]
        .lines()
        .skip(1)
        .map(|line| line.split(',').nth(1).unwrap())
        .collect();
    assert_ne!(names, vec!["Alice", "Bob"]);
}

#[tokio::test]
async fn fake_virtual_column_feeds_format_and_stays_out_of_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = out(&dir, "masked.csv");
    let opts = options("mock:people", "SELECT 1", path.clone());
    let mut registry = OptionsRegistry::new();
    registry.bind(FakeOptions {
        mappings: vec!["ALIAS:John".into()],
        ..Default::default()
    });
    registry.bind(FormatOptions {
        mappings: vec!["NAME:{ALIAS}-{ID}".into()],
    });
    common::run(opts, registry).await.unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some("id,name,active,score"));
    assert_eq!(lines.next(), Some("1,John-1,true,95.50"));
    assert_eq!(lines.next(), Some("2,John-2,false,80.00"));
}

#[tokio::test]
async fn null_override_blanks_the_column() {
    let dir = tempfile::tempdir().unwrap();
    let path = out(&dir, "nulled.csv");
    let opts = options("mock:people", "SELECT 1", path.clone());
    let mut registry = OptionsRegistry::new();
    registry.bind(FakeOptions {
        null_columns: vec!["name".into()],
        ..Default::default()
    });
    common::run(opts, registry).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "id,name,active,score\n1,,true,95.50\n2,,false,80.00\n"
    );
}

#[tokio::test]
async fn reference_cycle_fails_before_any_file_exists() {
    let dir = tempfile::tempdir().unwrap();
    let path = out(&dir, "never.csv");
    let opts = options("mock:people", "SELECT 1", path.clone());
    let mut registry = OptionsRegistry::new();
    registry.bind(FakeOptions {
        mappings: vec!["A:{{B}}".into(), "B:{{A}}".into()],
        ..Default::default()
    });
    let err = common::run(opts, registry).await.unwrap_err();
    assert!(matches!(err, ExportError::Config(_)));
    assert!(!path.exists());
}

#[tokio::test]
async fn dry_run_reports_the_diff_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let path = out(&dir, "never.csv");
    let mut opts = options("mock:people", "SELECT 1", path.clone());
    opts.dry_run = true;
    let mut registry = OptionsRegistry::new();
    registry.bind(FakeOptions {
        mappings: vec!["NAME:REDACTED".into()],
        ..Default::default()
    });
    let outcome = common::run(opts, registry).await.unwrap();

    let ExportOutcome::DryRun(report) = outcome else {
        panic!("expected dry-run outcome, got {outcome:?}");
    };
    assert!(!path.exists());
    let name = report
        .columns
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case("name"))
        .unwrap();
    assert!(name.changed);
    assert_eq!(name.input_value.as_deref(), Some("Alice"));
    assert_eq!(name.output_value.as_deref(), Some("REDACTED"));
    let id = report
        .columns
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case("id"))
        .unwrap();
    assert!(!id.changed);
}

#[tokio::test]
async fn schema_without_columns_short_circuits() {
    let dir = tempfile::tempdir().unwrap();
    let path = out(&dir, "never.csv");
    let opts = options("mock:empty", "SELECT 1", path.clone());
    let outcome = common::run(opts, OptionsRegistry::new()).await.unwrap();
    assert!(matches!(outcome, ExportOutcome::NoColumns));
    assert!(!path.exists());
}

#[tokio::test]
async fn parquet_export_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = out(&dir, "out.parquet");
    let mut opts = options("mock:rows=1000", "SELECT 1", path.clone());
    opts.batch_size = 250;
    common::run(opts, OptionsRegistry::new()).await.unwrap();

    let file = std::fs::File::open(&path).unwrap();
    let reader = parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder::try_new(file)
        .unwrap();
    assert_eq!(reader.metadata().num_row_groups(), 4);
    let rows: usize = reader
        .build()
        .unwrap()
        .map(|b| b.unwrap().num_rows())
        .sum();
    assert_eq!(rows, 1000);
}

#[tokio::test]
async fn unknown_provider_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options("mock:people", "SELECT 1", out(&dir, "x.csv"));
    opts.provider = "oracle".into();
    let err = common::run(opts, OptionsRegistry::new()).await.unwrap_err();
    assert!(matches!(err, ExportError::Config(_)));
}

#[tokio::test]
async fn connect_timeout_is_plumbed_through() {
    // A DSN nothing listens on: the connect attempt must respect the
    // configured timeout instead of hanging.
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options(
        "host=127.0.0.1 port=1 user=nobody dbname=none connect_timeout=1",
        "SELECT 1",
        out(&dir, "x.csv"),
    );
    opts.connect_timeout = Duration::from_secs(1);
    let err = common::run(opts, OptionsRegistry::new()).await.unwrap_err();
    assert!(matches!(err, ExportError::Connection(_)));
}
