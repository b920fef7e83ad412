//! Bridge between pipeline rows and Arrow record batches.
//!
//! Writers are Arrow-based, so each flushed batch is converted column-wise
//! into Arrow arrays. The logical-type table here is the single source of
//! truth for how exported columns appear in the output files.

use std::sync::Arc;

use arrow_array::builder::{
    BinaryBuilder, BooleanBuilder, Date32Builder, Decimal128Builder, Float32Builder,
    Float64Builder, Int8Builder, Int16Builder, Int32Builder, Int64Builder, StringBuilder,
    Time64MicrosecondBuilder, TimestampMicrosecondBuilder, UInt8Builder, UInt16Builder,
    UInt32Builder, UInt64Builder,
};
use arrow_array::{ArrayRef, RecordBatch};
use arrow_schema::{DataType, Field, Schema as ArrowSchema, SchemaRef, TimeUnit};
use tabdump_core::{ExportError, LogicalType, Result, Row, Schema, Value};

/// How byte columns are written. CSV has no binary representation, so the
/// CSV writer asks for lowercase hex strings instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BytesEncoding {
    Binary,
    Hex,
}

pub fn arrow_data_type(logical: LogicalType, bytes: BytesEncoding) -> DataType {
    match logical {
        LogicalType::Int8 => DataType::Int8,
        LogicalType::Int16 => DataType::Int16,
        LogicalType::Int32 => DataType::Int32,
        LogicalType::Int64 => DataType::Int64,
        LogicalType::UInt8 => DataType::UInt8,
        LogicalType::UInt16 => DataType::UInt16,
        LogicalType::UInt32 => DataType::UInt32,
        LogicalType::UInt64 => DataType::UInt64,
        LogicalType::Float32 => DataType::Float32,
        LogicalType::Float64 => DataType::Float64,
        LogicalType::Decimal { precision, scale } => DataType::Decimal128(precision, scale),
        LogicalType::Boolean => DataType::Boolean,
        LogicalType::String => DataType::Utf8,
        LogicalType::Bytes => match bytes {
            BytesEncoding::Binary => DataType::Binary,
            BytesEncoding::Hex => DataType::Utf8,
        },
        LogicalType::Date => DataType::Date32,
        LogicalType::Time => DataType::Time64(TimeUnit::Microsecond),
        LogicalType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        // Rendered forms; Parquet keeps them queryable, CSV keeps them flat.
        LogicalType::Uuid => DataType::Utf8,
        LogicalType::Json => DataType::Utf8,
    }
}

pub fn arrow_schema(schema: &Schema, bytes: BytesEncoding) -> SchemaRef {
    let fields: Vec<Field> = schema
        .columns()
        .iter()
        .map(|c| Field::new(&c.name, arrow_data_type(c.data_type, bytes), c.nullable))
        .collect();
    Arc::new(ArrowSchema::new(fields))
}

fn mismatch(column: &str, expected: LogicalType, got: &Value) -> ExportError {
    ExportError::Internal(format!(
        "column `{column}` expected a {expected} cell, got {got:?}"
    ))
}

/// Converts one flushed batch of rows into a record batch matching
/// `arrow_schema(schema, bytes)`.
pub fn rows_to_batch(
    schema: &Schema,
    arrow: &SchemaRef,
    rows: &[Row],
    bytes: BytesEncoding,
) -> Result<RecordBatch> {
    macro_rules! primitive {
        ($builder:ty, $variant:ident, $index:expr, $name:expr, $logical:expr) => {{
            let mut builder = <$builder>::with_capacity(rows.len());
            for row in rows {
                match &row[$index] {
                    Value::Null => builder.append_null(),
                    Value::$variant(v) => builder.append_value(*v),
                    other => return Err(mismatch($name, $logical, other)),
                }
            }
            Arc::new(builder.finish()) as ArrayRef
        }};
    }

    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.len());
    for (index, column) in schema.columns().iter().enumerate() {
        let name = column.name.as_str();
        let logical = column.data_type;
        let array: ArrayRef = match logical {
            LogicalType::Int8 => primitive!(Int8Builder, Int8, index, name, logical),
            LogicalType::Int16 => primitive!(Int16Builder, Int16, index, name, logical),
            LogicalType::Int32 => primitive!(Int32Builder, Int32, index, name, logical),
            LogicalType::Int64 => primitive!(Int64Builder, Int64, index, name, logical),
            LogicalType::UInt8 => primitive!(UInt8Builder, UInt8, index, name, logical),
            LogicalType::UInt16 => primitive!(UInt16Builder, UInt16, index, name, logical),
            LogicalType::UInt32 => primitive!(UInt32Builder, UInt32, index, name, logical),
            LogicalType::UInt64 => primitive!(UInt64Builder, UInt64, index, name, logical),
            LogicalType::Float32 => primitive!(Float32Builder, Float32, index, name, logical),
            LogicalType::Float64 => primitive!(Float64Builder, Float64, index, name, logical),
            LogicalType::Date => primitive!(Date32Builder, Date, index, name, logical),
            LogicalType::Time => {
                primitive!(Time64MicrosecondBuilder, Time, index, name, logical)
            }
            LogicalType::Timestamp => {
                primitive!(TimestampMicrosecondBuilder, Timestamp, index, name, logical)
            }
            LogicalType::Boolean => {
                let mut builder = BooleanBuilder::with_capacity(rows.len());
                for row in rows {
                    match &row[index] {
                        Value::Null => builder.append_null(),
                        Value::Boolean(v) => builder.append_value(*v),
                        other => return Err(mismatch(name, logical, other)),
                    }
                }
                Arc::new(builder.finish())
            }
            LogicalType::Decimal { precision, scale } => {
                let mut builder = Decimal128Builder::with_capacity(rows.len())
                    .with_precision_and_scale(precision, scale)
                    .map_err(|e| ExportError::Schema(e.to_string()))?;
                for row in rows {
                    match &row[index] {
                        Value::Null => builder.append_null(),
                        Value::Decimal { unscaled, .. } => builder.append_value(*unscaled),
                        other => return Err(mismatch(name, logical, other)),
                    }
                }
                Arc::new(builder.finish())
            }
            LogicalType::String => {
                let mut builder = StringBuilder::new();
                for row in rows {
                    match &row[index] {
                        Value::Null => builder.append_null(),
                        Value::Str(v) => builder.append_value(v),
                        other => return Err(mismatch(name, logical, other)),
                    }
                }
                Arc::new(builder.finish())
            }
            LogicalType::Uuid => {
                let mut builder = StringBuilder::new();
                for row in rows {
                    match &row[index] {
                        Value::Null => builder.append_null(),
                        Value::Uuid(v) => builder.append_value(v.to_string()),
                        other => return Err(mismatch(name, logical, other)),
                    }
                }
                Arc::new(builder.finish())
            }
            LogicalType::Json => {
                let mut builder = StringBuilder::new();
                for row in rows {
                    match &row[index] {
                        Value::Null => builder.append_null(),
                        Value::Json(v) => builder.append_value(v.to_string()),
                        other => return Err(mismatch(name, logical, other)),
                    }
                }
                Arc::new(builder.finish())
            }
            LogicalType::Bytes => match bytes {
                BytesEncoding::Binary => {
                    let mut builder = BinaryBuilder::new();
                    for row in rows {
                        match &row[index] {
                            Value::Null => builder.append_null(),
                            Value::Bytes(v) => builder.append_value(v),
                            other => return Err(mismatch(name, logical, other)),
                        }
                    }
                    Arc::new(builder.finish())
                }
                BytesEncoding::Hex => {
                    let mut builder = StringBuilder::new();
                    for row in rows {
                        match &row[index] {
                            Value::Null => builder.append_null(),
                            // Value's Display is already lowercase hex.
                            Value::Bytes(_) => builder.append_value(row[index].to_string()),
                            other => return Err(mismatch(name, logical, other)),
                        }
                    }
                    Arc::new(builder.finish())
                }
            },
        };
        arrays.push(array);
    }
    RecordBatch::try_new(Arc::clone(arrow), arrays)
        .map_err(|e| ExportError::Internal(format!("batch assembly failed: {e}")))
}

#[cfg(test)]
mod tests {
    use tabdump_core::ColumnInfo;

    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnInfo::new("id", LogicalType::Int64, false),
            ColumnInfo::new("name", LogicalType::String, true),
            ColumnInfo::new("active", LogicalType::Boolean, true),
            ColumnInfo::new(
                "score",
                LogicalType::Decimal {
                    precision: 10,
                    scale: 2,
                },
                true,
            ),
        ])
        .unwrap()
    }

    #[test]
    fn converts_rows_with_nulls() {
        let schema = schema();
        let arrow = arrow_schema(&schema, BytesEncoding::Binary);
        let rows = vec![
            vec![
                Value::Int64(1),
                Value::Str("Alice".into()),
                Value::Boolean(true),
                Value::Decimal {
                    unscaled: 9550,
                    scale: 2,
                },
            ],
            vec![Value::Int64(2), Value::Null, Value::Null, Value::Null],
        ];
        let batch = rows_to_batch(&schema, &arrow, &rows, BytesEncoding::Binary).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 4);
        assert_eq!(batch.column(1).null_count(), 1);
    }

    #[test]
    fn type_mismatch_is_an_internal_error() {
        let schema = schema();
        let arrow = arrow_schema(&schema, BytesEncoding::Binary);
        let rows = vec![vec![
            Value::Str("not an int".into()),
            Value::Null,
            Value::Null,
            Value::Null,
        ]];
        let err = rows_to_batch(&schema, &arrow, &rows, BytesEncoding::Binary).unwrap_err();
        assert!(matches!(err, ExportError::Internal(_)));
    }

    #[test]
    fn bytes_encode_as_hex_for_csv() {
        let schema = Schema::new(vec![ColumnInfo::new("blob", LogicalType::Bytes, true)]).unwrap();
        let arrow = arrow_schema(&schema, BytesEncoding::Hex);
        assert_eq!(arrow.field(0).data_type(), &DataType::Utf8);
        let rows = vec![vec![Value::Bytes(vec![0xca, 0xfe])]];
        let batch = rows_to_batch(&schema, &arrow, &rows, BytesEncoding::Hex).unwrap();
        let strings = batch
            .column(0)
            .as_any()
            .downcast_ref::<arrow_array::StringArray>()
            .unwrap();
        assert_eq!(strings.value(0), "cafe");
    }
}
