//! Excel dialect: one workbook, one worksheet per table.
//!
//! An xlsx file cannot be appended to in place, so the connector keeps the
//! session's rows in memory and writes the whole workbook after every dump,
//! through a staging file and an atomic rename. Opening an `APPEND`/`UPSERT`
//! syncer against an existing workbook does not overwrite it: the target
//! gets a disambiguating numeric suffix instead. `TRUNCATE` replaces the
//! workbook.
//!
//! Numbers are stored as IEEE doubles (Excel has no integer cells); reading
//! an INTEGER column back accepts integral doubles and refuses fractional
//! ones. Datetimes, dates, and JSON are stored as text, a documented lossy
//! mapping.

use crate::dialects::csv::typed_cell;
use crate::dialects::Connector;
use crate::registry::{DialectDescriptor, DialectFactory};
use crate::strategy::LoadStrategy;
use crate::uri::ConnectionConfig;
use async_trait::async_trait;
use calamine::{Data, Reader};
use rust_xlsxwriter::Workbook;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use sync_core::{Column, LogicalSchema, Result, Row, SyncError, Value};
use tracing::{debug, warn};

static DESCRIPTOR: DialectDescriptor = DialectDescriptor {
    protocol: "excel",
    summary: "xlsx workbook with one worksheet per table",
    required_keys: &["filepath"],
    optional_keys: &[],
    load_strategies: &[LoadStrategy::Append, LoadStrategy::Truncate],
    supports_load: true,
    default_batch_size: 50_000,
};

/// Factory for `excel://`.
#[derive(Debug)]
pub struct ExcelDialect;

#[async_trait]
impl DialectFactory for ExcelDialect {
    fn descriptor(&self) -> &'static DialectDescriptor {
        &DESCRIPTOR
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Connector>> {
        let requested = PathBuf::from(config.require("filepath")?);
        let directory = requested
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        if !directory.is_dir() {
            return Err(SyncError::connection(
                "excel",
                anyhow::anyhow!("'{}' is not a directory", directory.display()),
            ));
        }
        let path = resolve_target(requested, config.load_strategy());
        Ok(Box::new(ExcelConnector {
            path,
            directory,
            sheets: BTreeMap::new(),
        }))
    }
}

/// Pick the path this session writes to.
///
/// TRUNCATE owns the named file outright; other strategies must not
/// silently overwrite an earlier sync, so they take `name_1.xlsx`,
/// `name_2.xlsx`, ... when the target already exists.
fn resolve_target(requested: PathBuf, strategy: LoadStrategy) -> PathBuf {
    if strategy == LoadStrategy::Truncate || !requested.exists() {
        return requested;
    }
    let stem = requested
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = requested.parent().map(PathBuf::from).unwrap_or_default();
    for n in 1.. {
        let candidate = parent.join(format!("{stem}_{n}.xlsx"));
        if !candidate.exists() {
            warn!(
                requested = %requested.display(),
                writing_to = %candidate.display(),
                "target workbook exists, writing to a suffixed file instead"
            );
            return candidate;
        }
    }
    unreachable!()
}

struct Sheet {
    columns: Vec<String>,
    rows: Vec<Row>,
}

/// Connector buffering worksheets in memory and persisting after each dump.
pub struct ExcelConnector {
    path: PathBuf,
    directory: PathBuf,
    sheets: BTreeMap<String, Sheet>,
}

impl ExcelConnector {
    fn sheet_mut(&mut self, table: &str, schema: &LogicalSchema) -> &mut Sheet {
        self.sheets
            .entry(table.to_string())
            .or_insert_with(|| Sheet {
                columns: schema.column_names().map(str::to_string).collect(),
                rows: vec![],
            })
    }

    fn save(&self) -> Result<()> {
        let mut workbook = Workbook::new();
        for (table, sheet) in &self.sheets {
            let worksheet = workbook
                .add_worksheet()
                .set_name(table)
                .map_err(|e| SyncError::backend("excel", format!("naming sheet '{table}'"), e))?;
            for (col, name) in sheet.columns.iter().enumerate() {
                worksheet
                    .write_string(0, col as u16, name.as_str())
                    .map_err(|e| SyncError::backend("excel", "writing header", e))?;
            }
            for (r, row) in sheet.rows.iter().enumerate() {
                for (col, name) in sheet.columns.iter().enumerate() {
                    let value = row.get(name).unwrap_or(&Value::Null);
                    write_cell(worksheet, (r + 1) as u32, col as u16, value)?;
                }
            }
        }
        let bytes = workbook
            .save_to_buffer()
            .map_err(|e| SyncError::backend("excel", "serializing workbook", e))?;
        let mut staged = tempfile::Builder::new()
            .prefix(".workbook.stage-")
            .suffix(".xlsx")
            .tempfile_in(&self.directory)?;
        staged.write_all(&bytes)?;
        staged
            .persist(&self.path)
            .map_err(|e| SyncError::Io(e.error))?;
        debug!(path = %self.path.display(), sheets = self.sheets.len(), "saved workbook");
        Ok(())
    }
}

fn write_cell(
    worksheet: &mut rust_xlsxwriter::Worksheet,
    row: u32,
    col: u16,
    value: &Value,
) -> Result<()> {
    let result = match value {
        Value::Integer(i) => worksheet.write_number(row, col, *i as f64),
        Value::Float(f) => worksheet.write_number(row, col, *f),
        Value::Boolean(b) => worksheet.write_boolean(row, col, *b),
        Value::Null => return Ok(()),
        other => worksheet.write_string(row, col, other.to_text()),
    };
    result
        .map(|_| ())
        .map_err(|e| SyncError::backend("excel", "writing cell", e))
}

#[async_trait]
impl Connector for ExcelConnector {
    async fn ensure_table(&mut self, table: &str, schema: &LogicalSchema) -> Result<()> {
        let columns: Vec<String> = schema.column_names().map(str::to_string).collect();
        match self.sheets.get(table) {
            Some(sheet) if sheet.columns != columns => Err(SyncError::SchemaMismatch {
                dialect: "excel".to_string(),
                table: table.to_string(),
                detail: format!(
                    "worksheet already holds columns [{}], schema declares [{}]",
                    sheet.columns.join(", "),
                    columns.join(", ")
                ),
            }),
            Some(_) => Ok(()),
            None => {
                self.sheets.insert(
                    table.to_string(),
                    Sheet {
                        columns,
                        rows: vec![],
                    },
                );
                Ok(())
            }
        }
    }

    async fn append_rows(
        &mut self,
        table: &str,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<()> {
        let sheet = self.sheet_mut(table, schema);
        sheet.rows.extend_from_slice(rows);
        self.save()
    }

    async fn replace_all(
        &mut self,
        table: &str,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<()> {
        let sheet = self.sheet_mut(table, schema);
        sheet.rows = rows.to_vec();
        self.save()
    }

    async fn merge_rows(
        &mut self,
        _table: &str,
        _schema: &LogicalSchema,
        _rows: &[Row],
    ) -> Result<()> {
        Err(SyncError::Unsupported {
            dialect: "excel".to_string(),
            operation: "UPSERT".to_string(),
        })
    }

    async fn read_all(&mut self, table: &str, schema: &LogicalSchema) -> Result<Vec<Row>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let mut workbook = calamine::open_workbook_auto(&self.path)
            .map_err(|e| SyncError::backend("excel", format!("opening {}", self.path.display()), e))?;
        let range = match workbook.worksheet_range(table) {
            Ok(range) => range,
            Err(_) => return Ok(vec![]),
        };
        let mut rows_iter = range.rows();
        let headers: Vec<String> = match rows_iter.next() {
            Some(header) => header.iter().map(|c| c.to_string()).collect(),
            None => return Ok(vec![]),
        };
        let columns: Vec<(usize, &Column)> = schema
            .columns()
            .iter()
            .map(|column| {
                headers
                    .iter()
                    .position(|h| *h == column.name)
                    .map(|idx| (idx, column))
                    .ok_or_else(|| SyncError::SchemaMismatch {
                        dialect: "excel".to_string(),
                        table: table.to_string(),
                        detail: format!("worksheet has no column '{}'", column.name),
                    })
            })
            .collect::<Result<_>>()?;

        let mut rows = Vec::new();
        for record in rows_iter {
            let mut row = Row::new();
            for (idx, column) in &columns {
                let cell = record.get(*idx).unwrap_or(&Data::Empty);
                row.insert(column.name.clone(), read_cell(cell, column)?);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    async fn close(&mut self) -> Result<()> {
        // Every dump already persisted; nothing buffered is unsaved.
        Ok(())
    }
}

/// Convert one calamine cell into a typed value.
fn read_cell(cell: &Data, column: &Column) -> Result<Value> {
    let type_error = |got: &str| SyncError::TypeCoercion {
        column: column.name.clone(),
        detail: format!("cell holds {got}, column is {}", column.logical_type),
    };
    match (column.logical_type, cell) {
        (_, Data::Empty) => Ok(Value::Null),
        (sync_core::LogicalType::Integer, Data::Int(i)) => Ok(Value::Integer(*i)),
        (sync_core::LogicalType::Integer, Data::Float(f)) => {
            // Excel numerics are doubles; only integral ones fit.
            if f.fract() == 0.0 && f.abs() < 9.0e15 {
                Ok(Value::Integer(*f as i64))
            } else {
                Err(type_error(&format!("non-integral number {f}")))
            }
        }
        (sync_core::LogicalType::Float, Data::Float(f)) => Ok(Value::Float(*f)),
        (sync_core::LogicalType::Float, Data::Int(i)) => Ok(Value::Float(*i as f64)),
        (sync_core::LogicalType::Boolean, Data::Bool(b)) => Ok(Value::Boolean(*b)),
        (sync_core::LogicalType::Datetime, Data::DateTime(dt)) => dt
            .as_datetime()
            .map(|naive| Value::Datetime(naive.and_utc()))
            .ok_or_else(|| type_error("an out-of-range datetime serial")),
        (sync_core::LogicalType::Date, Data::DateTime(dt)) => dt
            .as_datetime()
            .map(|naive| Value::Date(naive.date()))
            .ok_or_else(|| type_error("an out-of-range datetime serial")),
        (_, Data::String(s)) => typed_cell(column, s),
        (_, Data::DateTimeIso(s)) => typed_cell(column, s),
        (_, other) => Err(type_error(&format!("{other:?}"))),
    }
}
