//! Column anonymization: replaces cell values with generated data,
//! literal text, or `{{REF}}` templates over other columns.

use std::sync::Arc;

use fake::rand::SeedableRng;
use fake::rand::rngs::StdRng;
use tabdump_core::{
    ColumnInfo, DataTransformer, ExportError, LogicalType, Result, Row, Schema, Value,
};
use tracing::warn;

use crate::faker::{FakerRegistry, GenerateFn};
use crate::template::{self, Segment};

/// Options bound by the front-end under the `fake` prefix. The transformer
/// is active when at least one mapping or null override is present.
#[derive(Debug, Clone)]
pub struct FakeOptions {
    /// `COLUMN:spec` mappings; spec is a faker path, a literal, or a
    /// `{{REF}}` template.
    pub mappings: Vec<String>,
    /// Columns forced to null regardless of any mapping.
    pub null_columns: Vec<String>,
    pub locale: String,
    /// Reproducible output when set.
    pub seed: Option<u64>,
}

impl Default for FakeOptions {
    fn default() -> Self {
        Self {
            mappings: Vec::new(),
            null_columns: Vec::new(),
            locale: "en".to_owned(),
            seed: None,
        }
    }
}

impl FakeOptions {
    pub fn is_active(&self) -> bool {
        !self.mappings.is_empty() || !self.null_columns.is_empty()
    }
}

enum Plan {
    /// Draw from the faker RNG stream.
    Generate(GenerateFn),
    /// Literal text with resolved column references.
    Template(Vec<Piece>),
}

enum Piece {
    Literal(String),
    /// Column index in the output schema.
    Column(usize),
}

struct Target {
    column: usize,
    plan: Plan,
}

pub struct FakeDataTransformer {
    options: Arc<FakeOptions>,
    registry: FakerRegistry,
    rng: StdRng,
    /// Targets in generation order; built once in `initialize`.
    targets: Vec<Target>,
    null_indices: Vec<usize>,
    output_len: usize,
}

impl FakeDataTransformer {
    pub fn new(options: Arc<FakeOptions>) -> Result<Self> {
        let registry = FakerRegistry::for_locale(&options.locale)?;
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            options,
            registry,
            rng,
            targets: Vec::new(),
            null_indices: Vec::new(),
            output_len: 0,
        })
    }
}

/// A parsed `COLUMN:spec` mapping before column resolution.
struct Mapping {
    column: String,
    spec: String,
}

fn parse_mappings(raw: &[String]) -> Result<Vec<Mapping>> {
    let mut mappings: Vec<Mapping> = Vec::with_capacity(raw.len());
    for entry in raw {
        let (column, spec) = entry.split_once(':').ok_or_else(|| {
            ExportError::Config(format!("malformed fake mapping `{entry}`, expected COLUMN:SPEC"))
        })?;
        if column.is_empty() {
            return Err(ExportError::Config(format!(
                "malformed fake mapping `{entry}`, column name is empty"
            )));
        }
        if mappings
            .iter()
            .any(|m| m.column.eq_ignore_ascii_case(column))
        {
            return Err(ExportError::Config(format!(
                "column `{column}` is mapped more than once"
            )));
        }
        mappings.push(Mapping {
            column: column.to_owned(),
            spec: spec.to_owned(),
        });
    }
    Ok(mappings)
}

impl DataTransformer for FakeDataTransformer {
    fn name(&self) -> &str {
        "fake"
    }

    fn initialize(&mut self, input: &Schema) -> Result<Schema> {
        let mappings = parse_mappings(&self.options.mappings)?;
        let mut columns: Vec<ColumnInfo> = input.columns().to_vec();

        // Targets missing from the input schema become virtual columns, so
        // later transformers can reference intermediate values.
        for mapping in &mappings {
            if !columns
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&mapping.column))
            {
                columns.push(ColumnInfo::virtual_column(
                    mapping.column.clone(),
                    LogicalType::String,
                ));
            }
        }

        let index_of = |columns: &[ColumnInfo], name: &str| {
            columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
        };

        // Classify each mapping and rewrite the column's logical type.
        struct Classified {
            column: usize,
            plan: Plan,
            reads: Vec<usize>,
        }
        let mut classified: Vec<Classified> = Vec::new();
        for mapping in &mappings {
            let column = index_of(&columns, &mapping.column).expect("target column exists");
            if let Some((dataset, method)) = mapping.spec.split_once('.') {
                if self.registry.has_dataset(dataset) {
                    match self.registry.get(dataset, method) {
                        Some(found) => {
                            columns[column].data_type = found.returns;
                            classified.push(Classified {
                                column,
                                plan: Plan::Generate(found.generator()),
                                reads: Vec::new(),
                            });
                        }
                        None => {
                            warn!(
                                column = %mapping.column,
                                spec = %mapping.spec,
                                "unknown faker method, keeping original values"
                            );
                        }
                    }
                    continue;
                }
            }
            // Literal or template spec.
            let mut pieces = Vec::new();
            let mut reads = Vec::new();
            for segment in template::parse_double_brace(&mapping.spec) {
                match segment {
                    Segment::Literal(text) => pieces.push(Piece::Literal(text)),
                    Segment::Placeholder { name, .. } => match index_of(&columns, &name) {
                        Some(idx) => {
                            pieces.push(Piece::Column(idx));
                            reads.push(idx);
                        }
                        None => {
                            pieces.push(Piece::Literal(template::restore_double_brace(&name)));
                        }
                    },
                }
            }
            columns[column].data_type = LogicalType::String;
            classified.push(Classified {
                column,
                plan: Plan::Template(pieces),
                reads,
            });
        }

        // Null overrides win over mappings and force nullability.
        self.null_indices.clear();
        for name in &self.options.null_columns {
            match index_of(&columns, name) {
                Some(idx) => {
                    columns[idx].nullable = true;
                    if !self.null_indices.contains(&idx) {
                        self.null_indices.push(idx);
                    }
                }
                None => warn!(column = %name, "null override for unknown column, ignoring"),
            }
        }

        // Order generation so referenced targets are produced first.
        let names: Vec<String> = classified
            .iter()
            .map(|c| columns[c.column].name.clone())
            .collect();
        let column_to_target: Vec<Option<usize>> = (0..columns.len())
            .map(|col| classified.iter().position(|c| c.column == col))
            .collect();
        let deps: Vec<Vec<usize>> = classified
            .iter()
            .map(|c| {
                c.reads
                    .iter()
                    .filter_map(|&col| column_to_target[col])
                    .collect()
            })
            .collect();
        let order = template::generation_order(&names, &deps)?;

        let mut classified: Vec<Option<Classified>> = classified.into_iter().map(Some).collect();
        self.targets = order
            .into_iter()
            .map(|i| {
                let c = classified[i].take().expect("each target ordered once");
                Target {
                    column: c.column,
                    plan: c.plan,
                }
            })
            .collect();
        self.output_len = columns.len();
        Schema::new(columns)
    }

    fn transform(&mut self, mut row: Row) -> Result<Row> {
        row.resize(self.output_len, Value::Null);
        for target in &self.targets {
            let value = match &target.plan {
                Plan::Generate(generate) => generate(&mut self.rng),
                Plan::Template(pieces) => {
                    let mut text = String::new();
                    for piece in pieces {
                        match piece {
                            Piece::Literal(s) => text.push_str(s),
                            // A self-reference reads the cell before it is
                            // overwritten below.
                            Piece::Column(idx) => text.push_str(&row[*idx].to_string()),
                        }
                    }
                    Value::Str(text)
                }
            };
            row[target.column] = value;
        }
        for &idx in &self.null_indices {
            row[idx] = Value::Null;
        }
        Ok(row)
    }
}
