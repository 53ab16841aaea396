//! CSV dialect: one delimited file per table inside a directory.
//!
//! `APPEND` appends data rows to the table's file, writing the header
//! exactly once when the file is first created. `TRUNCATE` rewrites the
//! file through a staging file in the same directory followed by an atomic
//! rename, because a flat file has no rollback primitive to lean on.
//! `UPSERT` is not advertised: there is no key lookup on a flat file.
//!
//! Cells are the text forms defined by [`Value::to_text`]; `load` re-parses
//! them against the schema. JSON cells are serialized text, a documented
//! lossy mapping (member order may differ after a round trip).

use crate::dialects::Connector;
use crate::registry::{DialectDescriptor, DialectFactory};
use crate::strategy::LoadStrategy;
use crate::uri::ConnectionConfig;
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use sync_core::{Column, LogicalSchema, Result, Row, SyncError, Value};
use tracing::debug;

static DESCRIPTOR: DialectDescriptor = DialectDescriptor {
    protocol: "csv",
    summary: "delimited text files, one file per table",
    required_keys: &["directory"],
    optional_keys: &[("delimiter", Some(","))],
    load_strategies: &[LoadStrategy::Append, LoadStrategy::Truncate],
    supports_load: true,
    default_batch_size: 50_000,
};

/// Factory for `csv://`.
#[derive(Debug)]
pub struct CsvDialect;

#[async_trait]
impl DialectFactory for CsvDialect {
    fn descriptor(&self) -> &'static DialectDescriptor {
        &DESCRIPTOR
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Connector>> {
        let config = CsvConfig::from_config(config)?;
        if !config.directory.is_dir() {
            return Err(SyncError::connection(
                "csv",
                anyhow::anyhow!("'{}' is not a directory", config.directory.display()),
            ));
        }
        Ok(Box::new(CsvConnector { config }))
    }
}

/// Validated configuration for the CSV dialect.
#[derive(Debug, Clone)]
pub struct CsvConfig {
    directory: PathBuf,
    delimiter: u8,
}

impl CsvConfig {
    fn from_config(config: &ConnectionConfig) -> Result<Self> {
        let directory = PathBuf::from(config.require("directory")?);
        let delimiter = config.get_or("delimiter", ",");
        if delimiter.len() != 1 || !delimiter.is_ascii() {
            return Err(SyncError::Configuration(format!(
                "delimiter must be a single ASCII character, got '{delimiter}' \
                 (percent-encode control characters, e.g. %09 for tab)"
            )));
        }
        Ok(Self {
            directory,
            delimiter: delimiter.as_bytes()[0],
        })
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.directory.join(format!("{table}.csv"))
    }
}

/// Connector writing one `<table>.csv` per table.
pub struct CsvConnector {
    config: CsvConfig,
}

impl CsvConnector {
    fn header_of(&self, path: &Path) -> Result<Option<Vec<String>>> {
        if !path.exists() {
            return Ok(None);
        }
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.config.delimiter)
            .from_path(path)
            .map_err(|e| SyncError::backend("csv", format!("reading {}", path.display()), e))?;
        let header = reader
            .headers()
            .map_err(|e| SyncError::backend("csv", format!("reading {}", path.display()), e))?;
        Ok(Some(header.iter().map(|h| h.to_string()).collect()))
    }

    fn write_rows<W: std::io::Write>(
        &self,
        writer: &mut csv::Writer<W>,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<()> {
        for row in rows {
            let record: Vec<String> = schema
                .columns()
                .iter()
                .map(|c| row.get(&c.name).unwrap_or(&Value::Null).to_text())
                .collect();
            writer
                .write_record(&record)
                .map_err(|e| SyncError::backend("csv", "writing record", e))?;
        }
        writer
            .flush()
            .map_err(|e| SyncError::backend("csv", "flushing writer", e))?;
        Ok(())
    }
}

#[async_trait]
impl Connector for CsvConnector {
    async fn ensure_table(&mut self, table: &str, schema: &LogicalSchema) -> Result<()> {
        let path = self.config.table_path(table);
        if let Some(header) = self.header_of(&path)? {
            let expected: Vec<&str> = schema.column_names().collect();
            if header != expected {
                return Err(SyncError::SchemaMismatch {
                    dialect: "csv".to_string(),
                    table: table.to_string(),
                    detail: format!(
                        "existing file header [{}] does not match schema columns [{}]; \
                         a flat file cannot be migrated in place",
                        header.join(", "),
                        expected.join(", ")
                    ),
                });
            }
        }
        Ok(())
    }

    async fn append_rows(
        &mut self,
        table: &str,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<()> {
        let path = self.config.table_path(table);
        let fresh = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.config.delimiter)
            .has_headers(false)
            .from_writer(file);
        if fresh {
            let header: Vec<&str> = schema.column_names().collect();
            writer
                .write_record(&header)
                .map_err(|e| SyncError::backend("csv", "writing header", e))?;
        }
        self.write_rows(&mut writer, schema, rows)?;
        debug!(table, rows = rows.len(), path = %path.display(), "appended csv rows");
        Ok(())
    }

    async fn replace_all(
        &mut self,
        table: &str,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<()> {
        let path = self.config.table_path(table);
        let staged = tempfile::Builder::new()
            .prefix(&format!(".{table}.stage-"))
            .suffix(".csv")
            .tempfile_in(&self.config.directory)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(self.config.delimiter)
                .has_headers(false)
                .from_writer(staged.as_file());
            let header: Vec<&str> = schema.column_names().collect();
            writer
                .write_record(&header)
                .map_err(|e| SyncError::backend("csv", "writing header", e))?;
            self.write_rows(&mut writer, schema, rows)?;
        }
        // Same-directory rename: the target is either untouched or fully replaced.
        staged.persist(&path).map_err(|e| SyncError::Io(e.error))?;
        debug!(table, rows = rows.len(), path = %path.display(), "replaced csv file");
        Ok(())
    }

    async fn merge_rows(
        &mut self,
        _table: &str,
        _schema: &LogicalSchema,
        _rows: &[Row],
    ) -> Result<()> {
        Err(SyncError::Unsupported {
            dialect: "csv".to_string(),
            operation: "UPSERT".to_string(),
        })
    }

    async fn read_all(&mut self, table: &str, schema: &LogicalSchema) -> Result<Vec<Row>> {
        let path = self.config.table_path(table);
        if !path.exists() {
            return Ok(vec![]);
        }
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.config.delimiter)
            .from_path(&path)
            .map_err(|e| SyncError::backend("csv", format!("reading {}", path.display()), e))?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| SyncError::backend("csv", "reading header", e))?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let columns: Vec<(usize, &Column)> = schema
            .columns()
            .iter()
            .map(|column| {
                headers
                    .iter()
                    .position(|h| *h == column.name)
                    .map(|idx| (idx, column))
                    .ok_or_else(|| SyncError::SchemaMismatch {
                        dialect: "csv".to_string(),
                        table: table.to_string(),
                        detail: format!("file has no column '{}'", column.name),
                    })
            })
            .collect::<Result<_>>()?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record =
                record.map_err(|e| SyncError::backend("csv", "reading record", e))?;
            let mut row = Row::new();
            for (idx, column) in &columns {
                let text = record.get(*idx).unwrap_or_default();
                row.insert(column.name.clone(), typed_cell(column, text)?);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    async fn close(&mut self) -> Result<()> {
        // Writers are flushed per call; nothing is held open between them.
        Ok(())
    }
}

/// Parse one text cell, attributing failures to the column.
pub(crate) fn typed_cell(column: &Column, text: &str) -> Result<Value> {
    Value::from_text(text, &column.logical_type).map_err(|e| match e {
        SyncError::TypeCoercion { detail, .. } => SyncError::TypeCoercion {
            column: column.name.clone(),
            detail,
        },
        other => other,
    })
}
