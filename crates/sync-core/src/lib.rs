//! Foundational types for the metasync framework.
//!
//! This crate holds everything the dialect connectors share and none of the
//! I/O:
//!
//! - [`LogicalType`] - backend-agnostic column types
//! - [`LogicalSchema`] / [`Column`] - the per-table contract declared by tools
//! - [`Value`] / [`Row`] - the in-memory row model and its coercion rules
//! - [`SyncError`] - the typed error taxonomy every operation surfaces
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    └─── metasync          (URI parser, registry, executor, facade,
//!                            and the dialect connectors under src/dialects/)
//! ```
//!
//! # Example
//!
//! ```rust
//! use sync_core::{LogicalSchema, LogicalType, Row};
//!
//! let schema = LogicalSchema::builder()
//!     .key("id", LogicalType::Integer)
//!     .column("name", LogicalType::String)
//!     .build()
//!     .unwrap();
//!
//! let row = Row::new().with("id", 1_i64).with("name", "alice");
//! let coerced = schema.coerce_row(row).unwrap();
//! assert_eq!(coerced.len(), 2);
//! ```

pub mod error;
pub mod schema;
pub mod types;
pub mod values;

// Re-exports for convenience
pub use error::{Result, SyncError};
pub use schema::{Column, LogicalSchema, LogicalSchemaBuilder};
pub use types::{LogicalType, ToDdl};
pub use values::{coerce, parse_datetime_utc, Row, Value};
