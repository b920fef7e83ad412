//! Column metadata and the per-stage schema contract.
//!
//! Each pipeline stage receives an input schema and publishes an output
//! schema exactly once, during initialization; after that the schema is
//! immutable. Column names are case-insensitive identities. Virtual columns
//! exist only between transformers and are stripped before the writer sees
//! the schema.

use crate::error::{ExportError, Result};
use crate::value::LogicalType;

/// Describes one column of a pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: LogicalType,
    pub nullable: bool,
    /// Present in transformer schemas only; elided before the writer.
    pub is_virtual: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: LogicalType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            is_virtual: false,
        }
    }

    pub fn virtual_column(name: impl Into<String>, data_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            is_virtual: true,
        }
    }
}

/// An ordered sequence of columns with unique case-insensitive names.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    columns: Vec<ColumnInfo>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnInfo>) -> Result<Self> {
        for (i, col) in columns.iter().enumerate() {
            if columns[..i]
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&col.name))
            {
                return Err(ExportError::Schema(format!(
                    "duplicate column name `{}`",
                    col.name
                )));
            }
        }
        Ok(Self { columns })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Case-insensitive positional lookup.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column(&self, index: usize) -> &ColumnInfo {
        &self.columns[index]
    }

    /// The writer-facing projection: every non-virtual column, in order.
    pub fn without_virtual(&self) -> Schema {
        Schema {
            columns: self
                .columns
                .iter()
                .filter(|c| !c.is_virtual)
                .cloned()
                .collect(),
        }
    }

    /// Indices of the non-virtual columns, used to project rows the same
    /// way `without_virtual` projects the schema.
    pub fn physical_indices(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_virtual)
            .map(|(i, _)| i)
            .collect()
    }
}
