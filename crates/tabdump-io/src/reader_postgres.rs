//! PostgreSQL source over tokio-postgres: prepared statement for the
//! column types, `query_raw` row stream for the data.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tabdump_core::{
    ColumnInfo, DumpOptions, ExportError, LogicalType, Result, Row, Schema, StreamReader, Value,
    ensure_read_only,
};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, RowStream};
use tracing::debug;

pub fn can_handle(connection: &str) -> bool {
    connection.starts_with("postgres://")
        || connection.starts_with("postgresql://")
        || connection.contains("host=")
}

pub struct PostgresReader {
    dsn: String,
    query: String,
    connect_timeout: Duration,
    query_timeout: Option<Duration>,
    schema: Schema,
    column_types: Vec<Type>,
    client: Option<Client>,
    stream: Option<Pin<Box<RowStream>>>,
}

impl PostgresReader {
    pub fn new(options: &DumpOptions) -> Self {
        Self {
            dsn: options.connection.clone(),
            query: options.query.clone(),
            connect_timeout: options.connect_timeout,
            query_timeout: options.query_timeout,
            schema: Schema::empty(),
            column_types: Vec::new(),
            client: None,
            stream: None,
        }
    }
}

/// The documented tokio-postgres helper for passing an empty parameter
/// slice to `query_raw`.
fn slice_iter<'a>(
    params: &'a [&'a (dyn ToSql + Sync)],
) -> impl ExactSizeIterator<Item = &'a dyn ToSql> + 'a {
    params.iter().map(|p| *p as _)
}

#[async_trait]
impl StreamReader for PostgresReader {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn open(&mut self) -> Result<()> {
        ensure_read_only(&self.query)?;
        let mut config: tokio_postgres::Config = self
            .dsn
            .parse()
            .map_err(|e| ExportError::Connection(format!("invalid connection string: {e}")))?;
        config.connect_timeout(self.connect_timeout);
        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| ExportError::Connection(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!(error = %err, "postgres connection task ended");
            }
        });

        let statement = client.prepare(&self.query).await.map_err(map_postgres)?;
        let mut columns = Vec::with_capacity(statement.columns().len());
        let mut column_types = Vec::with_capacity(statement.columns().len());
        for column in statement.columns() {
            let logical = map_pg_type(column.type_()).ok_or_else(|| {
                ExportError::Query(format!(
                    "column `{}` has unsupported type `{}`",
                    column.name(),
                    column.type_()
                ))
            })?;
            columns.push(ColumnInfo::new(column.name(), logical, true));
            column_types.push(column.type_().clone());
        }
        self.schema = Schema::new(columns)?;
        self.column_types = column_types;

        let stream = client
            .query_raw(&statement, slice_iter(&[]))
            .await
            .map_err(map_postgres)?;
        self.stream = Some(Box::pin(stream));
        self.client = Some(client);
        Ok(())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn next_batch(&mut self, max_rows: usize) -> Result<Option<Vec<Row>>> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        let mut rows = Vec::new();
        while rows.len() < max_rows.max(1) {
            let next = match self.query_timeout {
                Some(timeout) => tokio::time::timeout(timeout, stream.next())
                    .await
                    .map_err(|_| {
                        ExportError::Query(format!("fetch exceeded query timeout of {timeout:?}"))
                    })?,
                None => stream.next().await,
            };
            match next {
                Some(Ok(row)) => rows.push(convert_row(&row, &self.column_types)?),
                Some(Err(err)) => {
                    self.stream = None;
                    return Err(map_postgres(err));
                }
                None => {
                    self.stream = None;
                    break;
                }
            }
        }
        Ok((!rows.is_empty()).then_some(rows))
    }

    async fn close(&mut self) {
        // Dropping the client tears down the connection task.
        self.stream = None;
        self.client = None;
    }
}

fn map_postgres(err: tokio_postgres::Error) -> ExportError {
    match err.code() {
        Some(state) if *state == SqlState::INSUFFICIENT_PRIVILEGE => {
            ExportError::Permission(err.to_string())
        }
        Some(_) => ExportError::Query(err.to_string()),
        None => ExportError::Connection(err.to_string()),
    }
}

fn map_pg_type(ty: &Type) -> Option<LogicalType> {
    let logical = if *ty == Type::BOOL {
        LogicalType::Boolean
    } else if *ty == Type::INT2 {
        LogicalType::Int16
    } else if *ty == Type::INT4 {
        LogicalType::Int32
    } else if *ty == Type::INT8 {
        LogicalType::Int64
    } else if *ty == Type::FLOAT4 {
        LogicalType::Float32
    } else if *ty == Type::FLOAT8 {
        LogicalType::Float64
    } else if *ty == Type::NUMERIC {
        // NUMERIC precision/scale are value-dependent on the wire; the
        // lossless export form is text.
        LogicalType::String
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
    {
        LogicalType::String
    } else if *ty == Type::BYTEA {
        LogicalType::Bytes
    } else if *ty == Type::DATE {
        LogicalType::Date
    } else if *ty == Type::TIME {
        LogicalType::Time
    } else if *ty == Type::TIMESTAMP || *ty == Type::TIMESTAMPTZ {
        LogicalType::Timestamp
    } else if *ty == Type::UUID {
        LogicalType::Uuid
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        LogicalType::Json
    } else {
        return None;
    };
    Some(logical)
}

fn convert_row(row: &tokio_postgres::Row, types: &[Type]) -> Result<Row> {
    let mut cells = Vec::with_capacity(types.len());
    for (index, ty) in types.iter().enumerate() {
        cells.push(convert_cell(row, index, ty)?);
    }
    Ok(cells)
}

fn convert_cell(row: &tokio_postgres::Row, index: usize, ty: &Type) -> Result<Value> {
    fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
        row: &'a tokio_postgres::Row,
        index: usize,
    ) -> Result<Option<T>> {
        row.try_get(index)
            .map_err(|e| ExportError::Query(format!("row decode failed: {e}")))
    }

    Ok(if *ty == Type::BOOL {
        get::<bool>(row, index)?.map_or(Value::Null, Value::Boolean)
    } else if *ty == Type::INT2 {
        get::<i16>(row, index)?.map_or(Value::Null, Value::Int16)
    } else if *ty == Type::INT4 {
        get::<i32>(row, index)?.map_or(Value::Null, Value::Int32)
    } else if *ty == Type::INT8 {
        get::<i64>(row, index)?.map_or(Value::Null, Value::Int64)
    } else if *ty == Type::FLOAT4 {
        get::<f32>(row, index)?.map_or(Value::Null, Value::Float32)
    } else if *ty == Type::FLOAT8 {
        get::<f64>(row, index)?.map_or(Value::Null, Value::Float64)
    } else if *ty == Type::NUMERIC {
        get::<rust_decimal::Decimal>(row, index)?
            .map_or(Value::Null, |d| Value::Str(d.to_string()))
    } else if *ty == Type::BYTEA {
        get::<Vec<u8>>(row, index)?.map_or(Value::Null, Value::Bytes)
    } else if *ty == Type::DATE {
        get::<chrono::NaiveDate>(row, index)?.map_or(Value::Null, |d| {
            Value::Date(tabdump_core::value::date_to_epoch_days(d))
        })
    } else if *ty == Type::TIME {
        get::<chrono::NaiveTime>(row, index)?.map_or(Value::Null, |t| {
            Value::Time(tabdump_core::value::time_to_midnight_micros(t))
        })
    } else if *ty == Type::TIMESTAMP {
        get::<chrono::NaiveDateTime>(row, index)?
            .map_or(Value::Null, |ts| Value::Timestamp(ts.and_utc().timestamp_micros()))
    } else if *ty == Type::TIMESTAMPTZ {
        get::<chrono::DateTime<chrono::Utc>>(row, index)?
            .map_or(Value::Null, |ts| Value::Timestamp(ts.timestamp_micros()))
    } else if *ty == Type::UUID {
        get::<uuid::Uuid>(row, index)?.map_or(Value::Null, Value::Uuid)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        get::<serde_json::Value>(row, index)?.map_or(Value::Null, Value::Json)
    } else {
        get::<String>(row, index)?.map_or(Value::Null, Value::Str)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_strings() {
        assert!(can_handle("postgres://user@db/app"));
        assert!(can_handle("postgresql://db/app"));
        assert!(can_handle("host=localhost user=app dbname=app"));
        assert!(!can_handle("sqlite://app.db"));
    }

    #[test]
    fn type_mapping_covers_the_logical_set() {
        assert_eq!(map_pg_type(&Type::INT8), Some(LogicalType::Int64));
        assert_eq!(map_pg_type(&Type::NUMERIC), Some(LogicalType::String));
        assert_eq!(map_pg_type(&Type::JSONB), Some(LogicalType::Json));
        assert_eq!(map_pg_type(&Type::TIMESTAMPTZ), Some(LogicalType::Timestamp));
        assert_eq!(map_pg_type(&Type::POINT), None);
    }
}
