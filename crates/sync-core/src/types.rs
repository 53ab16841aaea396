//! Logical column types shared by every metasync dialect.
//!
//! `LogicalType` is the backend-agnostic type universe. Each dialect maps
//! FROM `LogicalType` TO its native column type via the [`ToDdl`] trait, so
//! DDL generation lives next to the connector that owns the backend rather
//! than in the shared core.

use serde::{Deserialize, Serialize};

/// Backend-agnostic column type.
///
/// This is the complete type universe a calling tool can declare for a synced
/// table. Dialects that have no native representation for a type document
/// their fallback (typically serialized text) on their descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    /// Unbounded UTF-8 text
    String,

    /// 64-bit signed integer
    Integer,

    /// 64-bit IEEE 754 floating point
    Float,

    /// Boolean value
    Boolean,

    /// Point in time, always stored normalized to UTC
    Datetime,

    /// Calendar date without a time component
    Date,

    /// JSON document; maps to the backend's native JSON type when one exists
    Json,
}

impl LogicalType {
    /// Canonical lowercase name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalType::String => "string",
            LogicalType::Integer => "integer",
            LogicalType::Float => "float",
            LogicalType::Boolean => "boolean",
            LogicalType::Datetime => "datetime",
            LogicalType::Date => "date",
            LogicalType::Json => "json",
        }
    }
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Native DDL derivation for SQL-shaped dialects.
///
/// Each SQL dialect implements this to translate the logical schema into its
/// own `CREATE TABLE` statement. The default `to_create_table` covers the
/// common shape; dialects override `quote_ident` where the quoting rules
/// differ (MySQL backticks vs ANSI double quotes).
pub trait ToDdl {
    /// Map a single logical type to the dialect's native column type token.
    fn to_ddl(&self, logical_type: &LogicalType) -> String;

    /// Quote an identifier for this dialect.
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{ident}\"")
    }

    /// Generate a complete CREATE TABLE statement for the schema.
    ///
    /// Key columns become the table's primary key so that native merge
    /// syntax (`ON CONFLICT`, `ON DUPLICATE KEY`) has an index to work with.
    fn to_create_table(&self, table: &str, schema: &crate::schema::LogicalSchema) -> String {
        let mut defs: Vec<String> = Vec::with_capacity(schema.columns().len() + 1);
        for column in schema.columns() {
            let mut def = format!(
                "{} {}",
                self.quote_ident(&column.name),
                self.to_ddl(&column.logical_type)
            );
            if !column.nullable {
                def.push_str(" NOT NULL");
            }
            defs.push(def);
        }
        let keys: Vec<String> = schema
            .key_columns()
            .map(|c| self.quote_ident(&c.name))
            .collect();
        if !keys.is_empty() {
            defs.push(format!("PRIMARY KEY ({})", keys.join(", ")));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.quote_ident(table),
            defs.join(", ")
        )
    }
}
