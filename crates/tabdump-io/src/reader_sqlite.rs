//! SQLite source. rusqlite rows borrow their statement, so the whole
//! cursor lives on a dedicated thread that feeds batches into a bounded
//! channel; the async side only ever touches the channel.

use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use tabdump_core::{
    ColumnInfo, DumpOptions, ExportError, LogicalType, Result, Row, Schema, StreamReader, Value,
    ensure_read_only,
};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Batches buffered between the cursor thread and the producer.
const PIPELINE_DEPTH: usize = 2;

pub fn can_handle(connection: &str) -> bool {
    connection.starts_with("sqlite:")
        || connection == ":memory:"
        || connection.ends_with(".db")
        || connection.ends_with(".sqlite")
        || connection.ends_with(".sqlite3")
}

pub struct SqliteReader {
    path: String,
    query: String,
    busy_timeout: Duration,
    batch_size: usize,
    schema: Schema,
    batches: Option<mpsc::Receiver<Result<Vec<Row>>>>,
    /// Rows received but not yet handed out, so `next_batch` can honor a
    /// caller cap smaller than the cursor batch size.
    pending: Vec<Row>,
}

impl SqliteReader {
    pub fn new(options: &DumpOptions) -> Self {
        let path = options
            .connection
            .strip_prefix("sqlite://")
            .or_else(|| options.connection.strip_prefix("sqlite:"))
            .unwrap_or(&options.connection)
            .to_owned();
        Self {
            path,
            query: options.query.clone(),
            busy_timeout: options.connect_timeout,
            batch_size: options.batch_size.max(1),
            schema: Schema::empty(),
            batches: None,
            pending: Vec::new(),
        }
    }
}

#[async_trait]
impl StreamReader for SqliteReader {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn open(&mut self) -> Result<()> {
        ensure_read_only(&self.query)?;
        let (schema_tx, schema_rx) = oneshot::channel();
        let (batch_tx, batch_rx) = mpsc::channel(PIPELINE_DEPTH);
        let path = self.path.clone();
        let query = self.query.clone();
        let busy_timeout = self.busy_timeout;
        let batch_size = self.batch_size;
        std::thread::spawn(move || {
            cursor_thread(path, query, busy_timeout, batch_size, schema_tx, batch_tx)
        });
        self.schema = schema_rx.await.map_err(|_| {
            ExportError::Internal("sqlite cursor thread exited before describing columns".into())
        })??;
        self.batches = Some(batch_rx);
        Ok(())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn next_batch(&mut self, max_rows: usize) -> Result<Option<Vec<Row>>> {
        if self.pending.is_empty() {
            let Some(batches) = self.batches.as_mut() else {
                return Ok(None);
            };
            match batches.recv().await {
                Some(Ok(rows)) => self.pending = rows,
                Some(Err(err)) => {
                    self.batches = None;
                    return Err(err);
                }
                None => return Ok(None),
            }
        }
        let take = self.pending.len().min(max_rows.max(1));
        let rest = self.pending.split_off(take);
        let batch = std::mem::replace(&mut self.pending, rest);
        Ok(Some(batch))
    }

    async fn close(&mut self) {
        // Dropping the receiver stops the cursor thread at its next send.
        self.batches = None;
        self.pending.clear();
    }
}

fn cursor_thread(
    path: String,
    query: String,
    busy_timeout: Duration,
    batch_size: usize,
    schema_tx: oneshot::Sender<Result<Schema>>,
    batch_tx: mpsc::Sender<Result<Vec<Row>>>,
) {
    let conn = match open_connection(&path, busy_timeout) {
        Ok(conn) => conn,
        Err(err) => {
            let _ = schema_tx.send(Err(err));
            return;
        }
    };
    let mut stmt = match conn.prepare(&query) {
        Ok(stmt) => stmt,
        Err(err) => {
            let _ = schema_tx.send(Err(map_sqlite(err, &path)));
            return;
        }
    };

    let columns: Vec<(String, LogicalType)> = stmt
        .columns()
        .iter()
        .map(|c| (c.name().to_owned(), logical_from_decl(c.decl_type())))
        .collect();
    let schema = Schema::new(
        columns
            .iter()
            .map(|(name, ty)| ColumnInfo::new(name.clone(), *ty, true))
            .collect(),
    );
    let schema = match schema {
        Ok(schema) => schema,
        Err(err) => {
            let _ = schema_tx.send(Err(err));
            return;
        }
    };
    if schema_tx.send(Ok(schema)).is_err() {
        return;
    }

    let mut rows = match stmt.query([]) {
        Ok(rows) => rows,
        Err(err) => {
            let _ = batch_tx.blocking_send(Err(map_sqlite(err, &path)));
            return;
        }
    };
    let mut batch: Vec<Row> = Vec::with_capacity(batch_size);
    loop {
        match rows.next() {
            Ok(Some(row)) => {
                let mut cells = Vec::with_capacity(columns.len());
                for (index, (name, ty)) in columns.iter().enumerate() {
                    match row.get_ref(index) {
                        Ok(value) => match cell(value, *ty, name) {
                            Ok(cell) => cells.push(cell),
                            Err(err) => {
                                let _ = batch_tx.blocking_send(Err(err));
                                return;
                            }
                        },
                        Err(err) => {
                            let _ = batch_tx.blocking_send(Err(map_sqlite(err, &path)));
                            return;
                        }
                    }
                }
                batch.push(cells);
                if batch.len() >= batch_size
                    && batch_tx
                        .blocking_send(Ok(std::mem::take(&mut batch)))
                        .is_err()
                {
                    debug!("sqlite cursor consumer hung up, stopping");
                    return;
                }
            }
            Ok(None) => break,
            Err(err) => {
                let _ = batch_tx.blocking_send(Err(map_sqlite(err, &path)));
                return;
            }
        }
    }
    if !batch.is_empty() {
        let _ = batch_tx.blocking_send(Ok(batch));
    }
}

fn open_connection(path: &str, busy_timeout: Duration) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)
        .map_err(|e| ExportError::Connection(format!("cannot open `{path}`: {e}")))?;
    conn.busy_timeout(busy_timeout)
        .map_err(|e| map_sqlite(e, path))?;
    Ok(conn)
}

fn map_sqlite(err: rusqlite::Error, path: &str) -> ExportError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::PermissionDenied
            | ErrorCode::ReadOnly
            | ErrorCode::AuthorizationForStatementDenied => {
                ExportError::Permission(err.to_string())
            }
            ErrorCode::CannotOpen | ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                ExportError::Connection(format!("`{path}`: {err}"))
            }
            _ => ExportError::Query(err.to_string()),
        },
        _ => ExportError::Query(err.to_string()),
    }
}

/// SQLite declared types follow affinity conventions rather than a fixed
/// set; expression columns carry no declaration at all and fall back to a
/// lossless string rendering.
fn logical_from_decl(decl: Option<&str>) -> LogicalType {
    let Some(decl) = decl else {
        return LogicalType::String;
    };
    let decl = decl.to_ascii_uppercase();
    if decl.contains("BOOL") {
        LogicalType::Boolean
    } else if decl.contains("INT") {
        LogicalType::Int64
    } else if decl.contains("CHAR") || decl.contains("CLOB") || decl.contains("TEXT") {
        LogicalType::String
    } else if decl.contains("BLOB") {
        LogicalType::Bytes
    } else if decl.contains("REAL")
        || decl.contains("FLOA")
        || decl.contains("DOUB")
        || decl.contains("DEC")
        || decl.contains("NUMERIC")
    {
        LogicalType::Float64
    } else if decl.contains("DATETIME") || decl.contains("TIMESTAMP") {
        LogicalType::Timestamp
    } else if decl.contains("DATE") {
        LogicalType::Date
    } else if decl.contains("TIME") {
        LogicalType::Time
    } else if decl.contains("JSON") {
        LogicalType::Json
    } else if decl.contains("UUID") {
        LogicalType::Uuid
    } else {
        LogicalType::String
    }
}

/// SQLite storage is dynamically typed; coerce what the engine actually
/// stored into the declared logical type.
fn cell(value: ValueRef<'_>, ty: LogicalType, column: &str) -> Result<Value> {
    if matches!(value, ValueRef::Null) {
        return Ok(Value::Null);
    }
    let unsupported = || {
        ExportError::Query(format!(
            "column `{column}`: cannot read stored {:?} as {ty}",
            value.data_type()
        ))
    };
    Ok(match ty {
        LogicalType::Int64 => match value {
            ValueRef::Integer(v) => Value::Int64(v),
            _ => return Err(unsupported()),
        },
        LogicalType::Float64 => match value {
            ValueRef::Integer(v) => Value::Float64(v as f64),
            ValueRef::Real(v) => Value::Float64(v),
            _ => return Err(unsupported()),
        },
        LogicalType::Boolean => match value {
            ValueRef::Integer(v) => Value::Boolean(v != 0),
            _ => return Err(unsupported()),
        },
        LogicalType::Bytes => match value {
            ValueRef::Blob(v) => Value::Bytes(v.to_vec()),
            _ => return Err(unsupported()),
        },
        LogicalType::Date => match value {
            ValueRef::Text(_) => {
                let text = text_of(value, column)?;
                let date = chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .map_err(|e| ExportError::Query(format!("column `{column}`: {e}")))?;
                Value::Date(tabdump_core::value::date_to_epoch_days(date))
            }
            _ => return Err(unsupported()),
        },
        LogicalType::Time => match value {
            ValueRef::Text(_) => {
                let text = text_of(value, column)?;
                let time = chrono::NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
                    .map_err(|e| ExportError::Query(format!("column `{column}`: {e}")))?;
                Value::Time(tabdump_core::value::time_to_midnight_micros(time))
            }
            _ => return Err(unsupported()),
        },
        LogicalType::Timestamp => match value {
            // Integer timestamps are Unix seconds by SQLite convention.
            ValueRef::Integer(v) => Value::Timestamp(v * 1_000_000),
            ValueRef::Text(_) => {
                let text = text_of(value, column)?;
                let ts = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                    .or_else(|_| {
                        chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                    })
                    .map_err(|e| ExportError::Query(format!("column `{column}`: {e}")))?;
                Value::Timestamp(ts.and_utc().timestamp_micros())
            }
            _ => return Err(unsupported()),
        },
        LogicalType::Json => {
            let text = text_of(value, column)?;
            let json = serde_json::from_str(text)
                .map_err(|e| ExportError::Query(format!("column `{column}`: {e}")))?;
            Value::Json(json)
        }
        LogicalType::Uuid => {
            let text = text_of(value, column)?;
            let uuid = text
                .parse::<uuid::Uuid>()
                .map_err(|e| ExportError::Query(format!("column `{column}`: {e}")))?;
            Value::Uuid(uuid)
        }
        // Everything else is exported as text, rendering whatever the
        // engine stored.
        _ => match value {
            ValueRef::Integer(v) => Value::Str(v.to_string()),
            ValueRef::Real(v) => Value::Str(v.to_string()),
            ValueRef::Text(_) => Value::Str(text_of(value, column)?.to_owned()),
            ValueRef::Blob(v) => Value::Str(Value::Bytes(v.to_vec()).to_string()),
            ValueRef::Null => Value::Null,
        },
    })
}

fn text_of<'a>(value: ValueRef<'a>, column: &str) -> Result<&'a str> {
    value
        .as_str()
        .map_err(|e| ExportError::Query(format!("column `{column}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_strings() {
        assert!(can_handle("sqlite://data/app.db"));
        assert!(can_handle("sqlite:app.db"));
        assert!(can_handle("warehouse.sqlite3"));
        assert!(can_handle(":memory:"));
        assert!(!can_handle("postgres://host/db"));
        assert!(!can_handle("export.parquet"));
    }

    #[test]
    fn decl_type_mapping() {
        assert_eq!(logical_from_decl(Some("BIGINT")), LogicalType::Int64);
        assert_eq!(logical_from_decl(Some("boolean")), LogicalType::Boolean);
        assert_eq!(logical_from_decl(Some("VARCHAR(40)")), LogicalType::String);
        assert_eq!(logical_from_decl(Some("NUMERIC(8,2)")), LogicalType::Float64);
        assert_eq!(logical_from_decl(Some("DATETIME")), LogicalType::Timestamp);
        assert_eq!(logical_from_decl(Some("DATE")), LogicalType::Date);
        assert_eq!(logical_from_decl(None), LogicalType::String);
    }

    #[test]
    fn dynamic_cells_coerce_to_declared_types() {
        assert_eq!(
            cell(ValueRef::Integer(1), LogicalType::Boolean, "b").unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            cell(ValueRef::Integer(3), LogicalType::Float64, "f").unwrap(),
            Value::Float64(3.0)
        );
        assert_eq!(
            cell(ValueRef::Text(b"2021-03-14"), LogicalType::Date, "d").unwrap(),
            Value::Date(tabdump_core::value::date_to_epoch_days(
                chrono::NaiveDate::from_ymd_opt(2021, 3, 14).unwrap()
            ))
        );
        assert_eq!(
            cell(ValueRef::Integer(12), LogicalType::String, "s").unwrap(),
            Value::Str("12".into())
        );
        assert!(cell(ValueRef::Text(b"x"), LogicalType::Int64, "i").is_err());
    }
}
