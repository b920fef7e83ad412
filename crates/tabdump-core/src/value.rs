//! Cell values and the closed set of logical column types.
//!
//! Rows travel the pipeline as positional sequences of [`Value`]s. The
//! variants form a closed union, one per [`LogicalType`], plus the null
//! sentinel; transformers may swap a cell for any variant as long as they
//! also rewrite the column's logical type during initialization.

use std::fmt;

use chrono::{NaiveDate, NaiveTime};

/// Days between 0001-01-01 (chrono's internal origin) and 1970-01-01.
const UNIX_EPOCH_FROM_CE: i32 = 719_163;

/// Logical column types understood by every reader, transformer, and writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Decimal { precision: u8, scale: i8 },
    Boolean,
    String,
    Bytes,
    Date,
    Time,
    Timestamp,
    Uuid,
    Json,
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::Int8 => write!(f, "int8"),
            LogicalType::Int16 => write!(f, "int16"),
            LogicalType::Int32 => write!(f, "int32"),
            LogicalType::Int64 => write!(f, "int64"),
            LogicalType::UInt8 => write!(f, "uint8"),
            LogicalType::UInt16 => write!(f, "uint16"),
            LogicalType::UInt32 => write!(f, "uint32"),
            LogicalType::UInt64 => write!(f, "uint64"),
            LogicalType::Float32 => write!(f, "float32"),
            LogicalType::Float64 => write!(f, "float64"),
            LogicalType::Decimal { precision, scale } => {
                write!(f, "decimal({precision},{scale})")
            }
            LogicalType::Boolean => write!(f, "boolean"),
            LogicalType::String => write!(f, "string"),
            LogicalType::Bytes => write!(f, "bytes"),
            LogicalType::Date => write!(f, "date"),
            LogicalType::Time => write!(f, "time"),
            LogicalType::Timestamp => write!(f, "timestamp"),
            LogicalType::Uuid => write!(f, "uuid"),
            LogicalType::Json => write!(f, "json"),
        }
    }
}

/// A single cell. `Date` is days since the Unix epoch, `Time` microseconds
/// since midnight, `Timestamp` microseconds since the epoch (no zone).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Decimal { unscaled: i128, scale: i8 },
    Boolean(bool),
    Str(String),
    Bytes(Vec<u8>),
    Date(i32),
    Time(i64),
    Timestamp(i64),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
}

/// One row, positionally aligned with the schema of its pipeline stage.
pub type Row = Vec<Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl fmt::Display for Value {
    /// Text rendering used by templates and the dry-run diff. Null renders
    /// as the empty string; bytes render as lowercase hex.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt8(v) => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Decimal { unscaled, scale } => {
                write!(f, "{}", format_decimal(*unscaled, *scale))
            }
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Bytes(v) => {
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Value::Date(days) => match date_from_epoch_days(*days) {
                Some(d) => write!(f, "{}", d.format("%Y-%m-%d")),
                None => write!(f, "{days}"),
            },
            Value::Time(micros) => match time_from_midnight_micros(*micros) {
                Some(t) => write!(f, "{}", t.format("%H:%M:%S%.6f")),
                None => write!(f, "{micros}"),
            },
            Value::Timestamp(micros) => {
                match chrono::DateTime::from_timestamp_micros(*micros) {
                    Some(ts) => {
                        write!(f, "{}", ts.naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f"))
                    }
                    None => write!(f, "{micros}"),
                }
            }
            Value::Uuid(v) => write!(f, "{v}"),
            Value::Json(v) => write!(f, "{v}"),
        }
    }
}

pub fn date_from_epoch_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(UNIX_EPOCH_FROM_CE.checked_add(days)?)
}

pub fn date_to_epoch_days(date: NaiveDate) -> i32 {
    chrono::Datelike::num_days_from_ce(&date) - UNIX_EPOCH_FROM_CE
}

pub fn time_from_midnight_micros(micros: i64) -> Option<NaiveTime> {
    if micros < 0 {
        return None;
    }
    let secs = (micros / 1_000_000) as u32;
    let nanos = ((micros % 1_000_000) * 1_000) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
}

pub fn time_to_midnight_micros(time: NaiveTime) -> i64 {
    use chrono::Timelike;
    time.num_seconds_from_midnight() as i64 * 1_000_000 + (time.nanosecond() / 1_000) as i64
}

fn format_decimal(unscaled: i128, scale: i8) -> String {
    if scale <= 0 {
        let shifted = unscaled.saturating_mul(10i128.saturating_pow(scale.unsigned_abs() as u32));
        return shifted.to_string();
    }
    let width = scale as usize;
    let sign = if unscaled < 0 { "-" } else { "" };
    let abs = unscaled.unsigned_abs();
    let pow = 10u128.pow(scale as u32);
    format!("{sign}{}.{:0width$}", abs / pow, abs % pow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_rendering_keeps_scale() {
        let v = Value::Decimal { unscaled: 9550, scale: 2 };
        assert_eq!(v.to_string(), "95.50");
        let v = Value::Decimal { unscaled: -7, scale: 2 };
        assert_eq!(v.to_string(), "-0.07");
        let v = Value::Decimal { unscaled: 42, scale: 0 };
        assert_eq!(v.to_string(), "42");
    }

    #[test]
    fn null_renders_empty() {
        assert_eq!(Value::Null.to_string(), "");
    }

    #[test]
    fn epoch_day_round_trip() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let days = date_to_epoch_days(date);
        assert_eq!(date_from_epoch_days(days), Some(date));
        assert_eq!(date_from_epoch_days(0).unwrap().to_string(), "1970-01-01");
    }

    #[test]
    fn bytes_render_as_hex() {
        assert_eq!(Value::Bytes(vec![0xde, 0xad, 0x01]).to_string(), "dead01");
    }
}
