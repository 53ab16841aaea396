//! Logical schema definitions for synced tables.
//!
//! A [`LogicalSchema`] is the backend-agnostic contract for one table:
//! ordered columns with a logical type, nullability, and an optional key
//! flag. The calling tool defines it once per table and it stays immutable
//! for the lifetime of a sync operation. Column order is significant for
//! file-based dialects and irrelevant for keyed backends.

use crate::error::{Result, SyncError};
use crate::types::LogicalType;
use crate::values::{coerce, Row};
use serde::{Deserialize, Serialize};

/// One column in a logical schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name as it appears in the target
    pub name: String,

    /// Backend-agnostic type
    #[serde(rename = "type")]
    pub logical_type: LogicalType,

    /// Whether null values are accepted
    #[serde(default)]
    pub nullable: bool,

    /// Whether this column is part of the UPSERT key set
    #[serde(default)]
    pub key: bool,
}

/// Ordered, validated set of columns for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalSchema {
    columns: Vec<Column>,
}

impl LogicalSchema {
    /// Start building a schema.
    pub fn builder() -> LogicalSchemaBuilder {
        LogicalSchemaBuilder { columns: vec![] }
    }

    /// All columns in declaration order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Columns flagged as part of the UPSERT key set, in declaration order.
    pub fn key_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.key)
    }

    /// Whether any column is flagged as a key column.
    pub fn has_keys(&self) -> bool {
        self.columns.iter().any(|c| c.key)
    }

    /// Coerce a row against this schema, producing a row that contains
    /// exactly the schema's columns.
    ///
    /// Cells absent from the input row become null (and fail for
    /// non-nullable columns); cells naming a column the schema does not
    /// declare fail with a configuration error.
    pub fn coerce_row(&self, mut row: Row) -> Result<Row> {
        let mut coerced = Row::new();
        for column in &self.columns {
            let value = row.take(&column.name).unwrap_or(crate::values::Value::Null);
            coerced.insert(column.name.clone(), coerce(value, column)?);
        }
        if let Some(stray) = row.columns().next() {
            return Err(SyncError::Configuration(format!(
                "row contains column '{stray}' not declared in the schema"
            )));
        }
        Ok(coerced)
    }
}

/// Builder for [`LogicalSchema`].
pub struct LogicalSchemaBuilder {
    columns: Vec<Column>,
}

impl LogicalSchemaBuilder {
    /// Add a non-nullable column.
    pub fn column(mut self, name: impl Into<String>, logical_type: LogicalType) -> Self {
        self.columns.push(Column {
            name: name.into(),
            logical_type,
            nullable: false,
            key: false,
        });
        self
    }

    /// Add a nullable column.
    pub fn nullable(mut self, name: impl Into<String>, logical_type: LogicalType) -> Self {
        self.columns.push(Column {
            name: name.into(),
            logical_type,
            nullable: true,
            key: false,
        });
        self
    }

    /// Add a key column. Key columns are implicitly non-nullable.
    pub fn key(mut self, name: impl Into<String>, logical_type: LogicalType) -> Self {
        self.columns.push(Column {
            name: name.into(),
            logical_type,
            nullable: false,
            key: true,
        });
        self
    }

    /// Validate and build the schema.
    pub fn build(self) -> Result<LogicalSchema> {
        if self.columns.is_empty() {
            return Err(SyncError::Configuration(
                "a schema must declare at least one column".to_string(),
            ));
        }
        for (i, column) in self.columns.iter().enumerate() {
            if column.name.is_empty() {
                return Err(SyncError::Configuration(
                    "column names must not be empty".to_string(),
                ));
            }
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(SyncError::Configuration(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        Ok(LogicalSchema {
            columns: self.columns,
        })
    }
}
