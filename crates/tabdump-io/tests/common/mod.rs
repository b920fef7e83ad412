//! Shared test support: an in-memory reader provider and catalog/run
//! helpers for exercising the full pipeline without a database server.

use std::sync::Arc;

use async_trait::async_trait;
use tabdump_core::{
    ColumnInfo, DumpOptions, ExportError, ExportOutcome, ExportService, LogicalType,
    OptionsRegistry, Progress, ProviderCatalog, ReaderDescriptor, Result, Row, Schema,
    StreamReader, Value,
};
use tokio_util::sync::CancellationToken;

pub struct MockReader {
    schema: Schema,
    fixed: Vec<Row>,
    generated_total: u64,
    cursor: u64,
    open: bool,
}

impl MockReader {
    fn people() -> Self {
        let schema = Schema::new(vec![
            ColumnInfo::new("id", LogicalType::Int64, false),
            ColumnInfo::new("name", LogicalType::String, true),
            ColumnInfo::new("active", LogicalType::Boolean, true),
            ColumnInfo::new(
                "score",
                LogicalType::Decimal {
                    precision: 5,
                    scale: 2,
                },
                true,
            ),
        ])
        .unwrap();
        let fixed = vec![
            vec![
                Value::Int64(1),
                Value::Str("Alice".into()),
                Value::Boolean(true),
                Value::Decimal { unscaled: 9550, scale: 2 },
            ],
            vec![
                Value::Int64(2),
                Value::Str("Bob".into()),
                Value::Boolean(false),
                Value::Decimal { unscaled: 8000, scale: 2 },
            ],
        ];
        Self {
            schema,
            fixed,
            generated_total: 0,
            cursor: 0,
            open: false,
        }
    }

    fn generated(total: u64) -> Self {
        let schema = Schema::new(vec![
            ColumnInfo::new("id", LogicalType::Int64, false),
            ColumnInfo::new("name", LogicalType::String, true),
        ])
        .unwrap();
        Self {
            schema,
            fixed: Vec::new(),
            generated_total: total,
            cursor: 0,
            open: false,
        }
    }

    fn empty_schema() -> Self {
        Self {
            schema: Schema::empty(),
            fixed: Vec::new(),
            generated_total: 0,
            cursor: 0,
            open: false,
        }
    }
}

#[async_trait]
impl StreamReader for MockReader {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn next_batch(&mut self, max_rows: usize) -> Result<Option<Vec<Row>>> {
        assert!(self.open, "next_batch before open");
        if !self.fixed.is_empty() {
            let take = self.fixed.len().min(max_rows);
            let rest = self.fixed.split_off(take);
            return Ok(Some(std::mem::replace(&mut self.fixed, rest)));
        }
        if self.cursor >= self.generated_total {
            return Ok(None);
        }
        let end = self.generated_total.min(self.cursor + max_rows as u64);
        let rows: Vec<Row> = (self.cursor..end)
            .map(|i| {
                vec![
                    Value::Int64(i as i64),
                    Value::Str(format!("name{i}")),
                ]
            })
            .collect();
        self.cursor = end;
        Ok(Some(rows))
    }

    async fn close(&mut self) {
        self.open = false;
    }
}

fn construct_mock(
    options: &DumpOptions,
    _registry: &OptionsRegistry,
) -> Result<Box<dyn StreamReader>> {
    let spec = options
        .connection
        .strip_prefix("mock:")
        .ok_or_else(|| ExportError::Config("not a mock connection".into()))?;
    let reader = match spec {
        "people" => MockReader::people(),
        "empty" => MockReader::empty_schema(),
        _ => {
            let total = spec
                .strip_prefix("rows=")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| ExportError::Config(format!("bad mock spec `{spec}`")))?;
            MockReader::generated(total)
        }
    };
    Ok(Box::new(reader))
}

pub fn catalog() -> ProviderCatalog {
    let mut catalog = ProviderCatalog::new();
    tabdump_io::register(&mut catalog);
    tabdump_tx::register(&mut catalog);
    catalog.add_reader(ReaderDescriptor {
        name: "mock",
        env_var: None,
        can_handle: |c| c.starts_with("mock:"),
        construct: construct_mock,
    });
    catalog
}

pub async fn run(options: DumpOptions, registry: OptionsRegistry) -> Result<ExportOutcome> {
    let service = ExportService::new(
        catalog(),
        options,
        Arc::new(registry),
        Arc::new(Progress::new()),
    );
    service.run(CancellationToken::new()).await
}
