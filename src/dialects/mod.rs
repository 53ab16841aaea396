//! Dialect connectors.
//!
//! Every backend sits behind the [`Connector`] contract. The load-strategy
//! executor drives these primitives; tools never touch a connector
//! directly. Each dialect module exports its factory (registered in
//! [`crate::registry`]), a typed config struct built from the parsed URI,
//! and the connector itself.

use async_trait::async_trait;
use sync_core::{LogicalSchema, Result, Row};

pub mod csv;
pub mod excel;
pub mod mock;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

/// The write/read primitives every dialect implements.
///
/// A connector exclusively owns its backend handle (file, connection,
/// in-memory workbook) and must release it in `close` on every exit path.
/// A single connector is not safe for concurrent callers; the owning
/// syncer serializes access.
#[async_trait]
pub trait Connector: Send {
    /// Create the target table if missing; verify compatibility if present.
    ///
    /// Idempotent. Additive drift (columns missing from an existing target
    /// that the schema declares as nullable) is migrated in place where the
    /// backend allows it; any other drift fails with `SchemaMismatch`.
    /// Destructive migrations are never performed.
    async fn ensure_table(&mut self, table: &str, schema: &LogicalSchema) -> Result<()>;

    /// Insert a batch of coerced rows without examining existing keys.
    async fn append_rows(
        &mut self,
        table: &str,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<()>;

    /// Replace the target's entire contents with the given rows, as one
    /// logical unit: on failure the target keeps its pre-operation state.
    async fn replace_all(
        &mut self,
        table: &str,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<()>;

    /// Insert-or-update keyed on the schema's key columns, as one logical
    /// unit. Only called when the schema declares key columns.
    async fn merge_rows(&mut self, table: &str, schema: &LogicalSchema, rows: &[Row])
        -> Result<()>;

    /// Read every row currently in the target, typed against the schema.
    async fn read_all(&mut self, table: &str, schema: &LogicalSchema) -> Result<Vec<Row>>;

    /// Release the backend handle. Called exactly once by the syncer.
    async fn close(&mut self) -> Result<()>;
}
