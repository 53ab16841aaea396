//! Mock dialect: a counting no-op sink.
//!
//! Accepts every strategy, writes nothing, and logs what it would have
//! written. Useful for dry runs of data-producing tools and as the target
//! in tests that only care about the orchestration path.

use crate::dialects::Connector;
use crate::registry::{DialectDescriptor, DialectFactory};
use crate::strategy::LoadStrategy;
use crate::uri::ConnectionConfig;
use async_trait::async_trait;
use std::collections::BTreeMap;
use sync_core::{LogicalSchema, Result, Row, SyncError};
use tracing::info;

static DESCRIPTOR: DialectDescriptor = DialectDescriptor {
    protocol: "mock",
    summary: "no-op sink that counts rows instead of writing them",
    required_keys: &[],
    optional_keys: &[],
    load_strategies: &[
        LoadStrategy::Append,
        LoadStrategy::Truncate,
        LoadStrategy::Upsert,
    ],
    supports_load: false,
    default_batch_size: 1000,
};

/// Factory for `mock://`.
#[derive(Debug)]
pub struct MockDialect;

#[async_trait]
impl DialectFactory for MockDialect {
    fn descriptor(&self) -> &'static DialectDescriptor {
        &DESCRIPTOR
    }

    async fn open(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connector>> {
        Ok(Box::new(MockConnector {
            rows_by_table: BTreeMap::new(),
        }))
    }
}

/// Connector that records row counts per table.
pub struct MockConnector {
    rows_by_table: BTreeMap<String, u64>,
}

impl MockConnector {
    fn record(&mut self, table: &str, rows: usize) {
        *self.rows_by_table.entry(table.to_string()).or_insert(0) += rows as u64;
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn ensure_table(&mut self, table: &str, schema: &LogicalSchema) -> Result<()> {
        info!(
            dialect = "mock",
            table,
            columns = schema.columns().len(),
            "would ensure table"
        );
        Ok(())
    }

    async fn append_rows(
        &mut self,
        table: &str,
        _schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<()> {
        self.record(table, rows.len());
        info!(dialect = "mock", table, rows = rows.len(), "would append");
        Ok(())
    }

    async fn replace_all(
        &mut self,
        table: &str,
        _schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<()> {
        self.rows_by_table.insert(table.to_string(), 0);
        self.record(table, rows.len());
        info!(dialect = "mock", table, rows = rows.len(), "would replace");
        Ok(())
    }

    async fn merge_rows(
        &mut self,
        table: &str,
        _schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<()> {
        self.record(table, rows.len());
        info!(dialect = "mock", table, rows = rows.len(), "would merge");
        Ok(())
    }

    async fn read_all(&mut self, _table: &str, _schema: &LogicalSchema) -> Result<Vec<Row>> {
        Err(SyncError::Unsupported {
            dialect: "mock".to_string(),
            operation: "load".to_string(),
        })
    }

    async fn close(&mut self) -> Result<()> {
        for (table, rows) in &self.rows_by_table {
            info!(dialect = "mock", table = %table, rows, "session total");
        }
        Ok(())
    }
}
