//! Template-based column rewriting: `COLUMN:template` mappings where the
//! template mixes literal text with `{NAME}` / `{NAME:format}` placeholders.

use std::sync::Arc;

use tabdump_core::value::{date_from_epoch_days, time_from_midnight_micros};
use tabdump_core::{
    ColumnInfo, DataTransformer, ExportError, LogicalType, Result, Row, Schema, Value,
};

use crate::template::{self, Segment};

/// Options bound by the front-end under the `format` prefix.
#[derive(Debug, Clone, Default)]
pub struct FormatOptions {
    /// `COLUMN:template` mappings.
    pub mappings: Vec<String>,
}

impl FormatOptions {
    pub fn is_active(&self) -> bool {
        !self.mappings.is_empty()
    }
}

enum Piece {
    Literal(String),
    Column { index: usize, format: Option<String> },
}

struct Target {
    column: usize,
    pieces: Vec<Piece>,
}

pub struct FormatDataTransformer {
    options: Arc<FormatOptions>,
    /// Targets in generation order; built once in `initialize`.
    targets: Vec<Target>,
}

impl FormatDataTransformer {
    pub fn new(options: Arc<FormatOptions>) -> Self {
        Self {
            options,
            targets: Vec::new(),
        }
    }
}

impl DataTransformer for FormatDataTransformer {
    fn name(&self) -> &str {
        "format"
    }

    fn initialize(&mut self, input: &Schema) -> Result<Schema> {
        let mut columns: Vec<ColumnInfo> = input.columns().to_vec();

        struct Parsed {
            column: usize,
            pieces: Vec<Piece>,
            reads: Vec<usize>,
        }
        let mut parsed: Vec<Parsed> = Vec::new();
        for entry in &self.options.mappings {
            let (name, tpl) = entry.split_once(':').ok_or_else(|| {
                ExportError::Config(format!(
                    "malformed format mapping `{entry}`, expected COLUMN:TEMPLATE"
                ))
            })?;
            // Unlike fake, format never invents columns: the target must
            // already exist (virtual columns included).
            let column = input.index_of(name).ok_or_else(|| {
                ExportError::Config(format!("format target `{name}` is not a column"))
            })?;
            if parsed.iter().any(|p| p.column == column) {
                return Err(ExportError::Config(format!(
                    "column `{name}` is formatted more than once"
                )));
            }

            let mut pieces = Vec::new();
            let mut reads = Vec::new();
            for segment in template::parse_single_brace(tpl) {
                match segment {
                    Segment::Literal(text) => pieces.push(Piece::Literal(text)),
                    Segment::Placeholder { name, format } => match input.index_of(&name) {
                        Some(index) => {
                            reads.push(index);
                            pieces.push(Piece::Column { index, format });
                        }
                        None => pieces.push(Piece::Literal(template::restore_single_brace(
                            &name,
                            format.as_deref(),
                        ))),
                    },
                }
            }
            parsed.push(Parsed {
                column,
                pieces,
                reads,
            });
        }

        let names: Vec<String> = parsed
            .iter()
            .map(|p| columns[p.column].name.clone())
            .collect();
        let column_to_target: Vec<Option<usize>> = (0..columns.len())
            .map(|col| parsed.iter().position(|p| p.column == col))
            .collect();
        let deps: Vec<Vec<usize>> = parsed
            .iter()
            .map(|p| {
                p.reads
                    .iter()
                    .filter_map(|&col| column_to_target[col])
                    .collect()
            })
            .collect();
        let order = template::generation_order(&names, &deps)?;

        let mut parsed: Vec<Option<Parsed>> = parsed.into_iter().map(Some).collect();
        self.targets = order
            .into_iter()
            .map(|i| {
                let p = parsed[i].take().expect("each target ordered once");
                columns[p.column].data_type = LogicalType::String;
                Target {
                    column: p.column,
                    pieces: p.pieces,
                }
            })
            .collect();
        Schema::new(columns)
    }

    fn transform(&mut self, mut row: Row) -> Result<Row> {
        for target in &self.targets {
            let mut text = String::new();
            for piece in &target.pieces {
                match piece {
                    Piece::Literal(s) => text.push_str(s),
                    // A self-reference reads the cell before it is
                    // overwritten below.
                    Piece::Column { index, format } => {
                        text.push_str(&render(&row[*index], format.as_deref()));
                    }
                }
            }
            row[target.column] = Value::Str(text);
        }
        Ok(row)
    }
}

/// Renders a cell with an optional format hint. A hint that does not apply
/// to the value falls back to the plain rendering.
fn render(value: &Value, format: Option<&str>) -> String {
    format
        .and_then(|hint| apply_hint(value, hint))
        .unwrap_or_else(|| value.to_string())
}

fn apply_hint(value: &Value, hint: &str) -> Option<String> {
    if is_digit_pattern(hint) {
        let decimals = hint.rsplit_once('.').map_or(0, |(_, frac)| frac.len());
        return as_f64(value).map(|v| format!("{v:.decimals$}"));
    }
    if let Some(pattern) = chrono_pattern(hint) {
        let ts = match value {
            Value::Date(days) => date_from_epoch_days(*days)?.and_hms_opt(0, 0, 0)?,
            Value::Time(micros) => {
                date_from_epoch_days(0)?.and_time(time_from_midnight_micros(*micros)?)
            }
            Value::Timestamp(micros) => {
                chrono::DateTime::from_timestamp_micros(*micros)?.naive_utc()
            }
            _ => return None,
        };
        return Some(ts.format(&pattern).to_string());
    }
    None
}

fn is_digit_pattern(hint: &str) -> bool {
    !hint.is_empty()
        && hint.contains(['0', '#'])
        && hint.chars().all(|c| matches!(c, '0' | '#' | ',' | '.'))
}

fn as_f64(value: &Value) -> Option<f64> {
    Some(match value {
        Value::Int8(v) => *v as f64,
        Value::Int16(v) => *v as f64,
        Value::Int32(v) => *v as f64,
        Value::Int64(v) => *v as f64,
        Value::UInt8(v) => *v as f64,
        Value::UInt16(v) => *v as f64,
        Value::UInt32(v) => *v as f64,
        Value::UInt64(v) => *v as f64,
        Value::Float32(v) => *v as f64,
        Value::Float64(v) => *v,
        Value::Decimal { unscaled, scale } => {
            *unscaled as f64 / 10f64.powi(*scale as i32)
        }
        _ => return None,
    })
}

/// Translates `yyyy-MM-dd HH:mm:ss` style tokens into a chrono format
/// string. Returns `None` when the hint holds no recognizable token.
fn chrono_pattern(hint: &str) -> Option<String> {
    const TOKENS: &[(&str, &str)] = &[
        ("yyyy", "%Y"),
        ("yy", "%y"),
        ("MM", "%m"),
        ("dd", "%d"),
        ("HH", "%H"),
        ("mm", "%M"),
        ("ss", "%S"),
        ("fff", "%3f"),
    ];
    let mut out = String::with_capacity(hint.len());
    let mut found = false;
    let mut rest = hint;
    'scan: while !rest.is_empty() {
        for (token, replacement) in TOKENS {
            if let Some(after) = rest.strip_prefix(token) {
                out.push_str(replacement);
                rest = after;
                found = true;
                continue 'scan;
            }
        }
        let ch = rest.chars().next().expect("rest is non-empty");
        // Escape so stray percent signs cannot reach the formatter.
        if ch == '%' {
            out.push_str("%%");
        } else {
            out.push(ch);
        }
        rest = &rest[ch.len_utf8()..];
    }
    found.then_some(out)
}
