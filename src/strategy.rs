//! Load strategies and the executor that realizes them.
//!
//! A strategy is fixed for the lifetime of a syncer (it comes from the
//! parsed URI, not the call site). The executor turns one `dump` call into
//! the connector primitives that realize that strategy:
//!
//! - `APPEND` - insert without looking at existing keys; chunked into
//!   batches, each batch committing independently
//! - `TRUNCATE` - replace the whole target as a single logical unit; the
//!   connector stages and swaps (or wraps in a transaction) so a failure
//!   never leaves the target half-emptied
//! - `UPSERT` - merge keyed on the schema's key columns; the connector
//!   stages the incoming rows and merges once, so chunk boundaries can
//!   never produce partial-key duplicates

use crate::dialects::Connector;
use std::str::FromStr;
use sync_core::{LogicalSchema, Result, Row, SyncError};
use tracing::debug;

/// Write semantics applied when syncing rows to a target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LoadStrategy {
    /// Always insert, no dedup.
    #[default]
    Append,

    /// Delete all existing rows in the target, then insert.
    Truncate,

    /// Insert or update keyed on the schema's key columns.
    Upsert,
}

impl LoadStrategy {
    /// Canonical uppercase name, as written in URIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStrategy::Append => "APPEND",
            LoadStrategy::Truncate => "TRUNCATE",
            LoadStrategy::Upsert => "UPSERT",
        }
    }
}

impl std::fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadStrategy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "APPEND" => Ok(LoadStrategy::Append),
            "TRUNCATE" => Ok(LoadStrategy::Truncate),
            "UPSERT" => Ok(LoadStrategy::Upsert),
            _ => Err(SyncError::Configuration(format!(
                "'{s}' is not a load strategy, expected APPEND, TRUNCATE, or UPSERT"
            ))),
        }
    }
}

/// Realize one `dump` call against a connector. Returns rows written.
///
/// Rows are coerced against the schema batch-by-batch for `APPEND`, so a
/// bad row fails only the batch containing it; earlier committed batches
/// stay committed. `TRUNCATE` and `UPSERT` coerce everything up front
/// because the connector applies them as one transactional unit.
pub(crate) async fn execute_dump(
    connector: &mut dyn Connector,
    strategy: LoadStrategy,
    batch_size: usize,
    table: &str,
    schema: &LogicalSchema,
    rows: Vec<Row>,
) -> Result<u64> {
    match strategy {
        LoadStrategy::Append => {
            if rows.is_empty() {
                return Ok(0);
            }
            connector.ensure_table(table, schema).await?;
            let mut written: u64 = 0;
            let mut batch = Vec::with_capacity(batch_size.min(rows.len()));
            for row in rows {
                batch.push(schema.coerce_row(row)?);
                if batch.len() == batch_size {
                    connector.append_rows(table, schema, &batch).await?;
                    written += batch.len() as u64;
                    debug!(table, written, "flushed append batch");
                    batch.clear();
                }
            }
            if !batch.is_empty() {
                connector.append_rows(table, schema, &batch).await?;
                written += batch.len() as u64;
            }
            Ok(written)
        }
        LoadStrategy::Truncate => {
            // An empty dump still empties the target.
            connector.ensure_table(table, schema).await?;
            let coerced = coerce_all(schema, rows)?;
            let written = coerced.len() as u64;
            connector.replace_all(table, schema, &coerced).await?;
            Ok(written)
        }
        LoadStrategy::Upsert => {
            if !schema.has_keys() {
                return Err(SyncError::Configuration(format!(
                    "load strategy UPSERT requires key columns in the schema for table '{table}'"
                )));
            }
            if rows.is_empty() {
                return Ok(0);
            }
            connector.ensure_table(table, schema).await?;
            let coerced = coerce_all(schema, rows)?;
            let written = coerced.len() as u64;
            connector.merge_rows(table, schema, &coerced).await?;
            Ok(written)
        }
    }
}

fn coerce_all(schema: &LogicalSchema, rows: Vec<Row>) -> Result<Vec<Row>> {
    rows.into_iter().map(|r| schema.coerce_row(r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parse_is_case_insensitive() {
        assert_eq!(
            "append".parse::<LoadStrategy>().unwrap(),
            LoadStrategy::Append
        );
        assert_eq!(
            "Truncate".parse::<LoadStrategy>().unwrap(),
            LoadStrategy::Truncate
        );
        assert_eq!(
            "UPSERT".parse::<LoadStrategy>().unwrap(),
            LoadStrategy::Upsert
        );
    }

    #[test]
    fn unknown_strategy_is_a_configuration_error() {
        let err = "REPLACE".parse::<LoadStrategy>().unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn display_round_trips() {
        for strategy in [
            LoadStrategy::Append,
            LoadStrategy::Truncate,
            LoadStrategy::Upsert,
        ] {
            assert_eq!(
                strategy.to_string().parse::<LoadStrategy>().unwrap(),
                strategy
            );
        }
    }
}
