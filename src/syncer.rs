//! The facade tools actually hold.
//!
//! A [`Syncer`] owns exactly one connector and its configuration for its
//! whole lifetime: constructed from a URI, used for `dump`/`load`, released
//! by `close`. This is the only public entry point; no dialect is ever
//! instantiated directly by calling tools.

use crate::dialects::Connector;
use crate::registry::{self, DialectDescriptor, DialectRegistry};
use crate::strategy::{self, LoadStrategy};
use crate::uri::ConnectionConfig;
use sync_core::{LogicalSchema, Result, Row, SyncError};
use tracing::{info, warn};

/// A ready, opened connection to one sync target.
pub struct Syncer {
    descriptor: &'static DialectDescriptor,
    load_strategy: LoadStrategy,
    batch_size: usize,
    connector: Box<dyn Connector>,
    closed: bool,
}

impl std::fmt::Debug for Syncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Syncer")
            .field("descriptor", &self.descriptor)
            .field("load_strategy", &self.load_strategy)
            .field("batch_size", &self.batch_size)
            .field("connector", &format_args!("<dyn Connector>"))
            .field("closed", &self.closed)
            .finish()
    }
}

impl Syncer {
    /// Construct a syncer from a declarative URI using the process-wide
    /// registry of built-in dialects.
    ///
    /// Parses and validates the URI, resolves the dialect, and opens the
    /// backend handle eagerly: every configuration problem surfaces here,
    /// before any rows exist.
    pub async fn from_uri(uri: &str) -> Result<Self> {
        Self::from_uri_in(registry::init(), uri).await
    }

    /// Construct a syncer against an explicit registry.
    ///
    /// This is the extension point for out-of-tree dialects and the
    /// isolation point for tests.
    pub async fn from_uri_in(registry: &DialectRegistry, uri: &str) -> Result<Self> {
        let mut config = ConnectionConfig::parse(uri)?;
        let factory = registry.resolve(config.protocol())?;
        let descriptor = factory.descriptor();
        config.validate_for(descriptor)?;

        let connector = factory.open(&config).await?;
        let load_strategy = config.load_strategy();
        let batch_size = config.batch_size().unwrap_or(descriptor.default_batch_size);
        info!(
            dialect = descriptor.protocol,
            strategy = %load_strategy,
            batch_size,
            "opened syncer"
        );
        Ok(Self {
            descriptor,
            load_strategy,
            batch_size,
            connector,
            closed: false,
        })
    }

    /// Protocol name of the dialect behind this syncer.
    pub fn dialect(&self) -> &'static str {
        self.descriptor.protocol
    }

    /// The strategy every `dump` on this syncer applies.
    pub fn load_strategy(&self) -> LoadStrategy {
        self.load_strategy
    }

    /// Write rows to the named table under the configured load strategy.
    ///
    /// Returns the number of rows written. The strategy lives in the
    /// parsed config, not the call site.
    pub async fn dump(
        &mut self,
        table: &str,
        schema: &LogicalSchema,
        rows: Vec<Row>,
    ) -> Result<u64> {
        let written = strategy::execute_dump(
            self.connector.as_mut(),
            self.load_strategy,
            self.batch_size,
            table,
            schema,
            rows,
        )
        .await?;
        info!(
            dialect = self.descriptor.protocol,
            table,
            rows = written,
            strategy = %self.load_strategy,
            "dump complete"
        );
        Ok(written)
    }

    /// Read back every row previously synced to the named table.
    ///
    /// Not every dialect can read; asking a write-only dialect fails with
    /// [`SyncError::Unsupported`].
    pub async fn load(&mut self, table: &str, schema: &LogicalSchema) -> Result<Vec<Row>> {
        if !self.descriptor.supports_load {
            return Err(SyncError::Unsupported {
                dialect: self.descriptor.protocol.to_string(),
                operation: "load".to_string(),
            });
        }
        self.connector.read_all(table, schema).await
    }

    /// Release the backend handle.
    ///
    /// File-backed dialects flush and persist here, so skipping `close`
    /// can lose buffered output.
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        self.connector.close().await
    }
}

impl Drop for Syncer {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                dialect = self.descriptor.protocol,
                "syncer dropped without close, buffered output may be lost"
            );
        }
    }
}
