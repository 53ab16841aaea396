//! Metasync Library
//!
//! Pluggable tabular-data persistence behind a single declarative URI, for
//! the administrative tools that export BI platform metadata to external
//! targets.
//!
//! # Features
//!
//! - One connection-string grammar for every backend: `protocol://key=value&...`
//! - Load strategies: `APPEND`, `TRUNCATE`, `UPSERT`, translated into each
//!   backend's native write path
//! - File, spreadsheet, embedded-SQL, and warehouse dialects behind one
//!   [`Connector`](dialects::Connector) contract
//! - Typed, fail-fast configuration errors before any I/O is attempted
//!
//! # Dialects
//!
//! | protocol   | backend                 | strategies               | load |
//! |------------|-------------------------|--------------------------|------|
//! | `csv`      | delimited files         | APPEND, TRUNCATE         | yes  |
//! | `excel`    | xlsx workbook           | APPEND, TRUNCATE         | yes  |
//! | `sqlite`   | SQLite database file    | APPEND, TRUNCATE, UPSERT | yes  |
//! | `postgres` | PostgreSQL              | APPEND, TRUNCATE, UPSERT | yes  |
//! | `mysql`    | MySQL                   | APPEND, TRUNCATE, UPSERT | yes  |
//! | `mock`     | counting no-op sink     | APPEND, TRUNCATE, UPSERT | no   |
//!
//! # Usage
//!
//! ```no_run
//! use metasync::{LogicalSchema, LogicalType, Row, Syncer};
//!
//! # async fn example() -> metasync::Result<()> {
//! let schema = LogicalSchema::builder()
//!     .key("id", LogicalType::Integer)
//!     .column("name", LogicalType::String)
//!     .build()?;
//!
//! let mut syncer = Syncer::from_uri("csv://directory=/tmp/out&load_strategy=APPEND").await?;
//! let rows = vec![
//!     Row::new().with("id", 1_i64).with("name", "a"),
//!     Row::new().with("id", 2_i64).with("name", "b"),
//! ];
//! syncer.dump("users", &schema, rows).await?;
//! syncer.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Tools interact only through [`Syncer::from_uri`], [`Syncer::dump`], and
//! [`Syncer::load`]; no dialect is ever constructed directly.

pub mod dialects;
pub mod registry;
pub mod strategy;
pub mod syncer;
pub mod uri;

// Re-export the shared core so callers depend on one crate
pub use sync_core::{Column, LogicalSchema, LogicalType, Result, Row, SyncError, Value};

pub use registry::{init, DialectDescriptor, DialectFactory, DialectRegistry};
pub use strategy::LoadStrategy;
pub use syncer::Syncer;
pub use uri::ConnectionConfig;
