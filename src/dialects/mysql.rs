//! MySQL dialect.
//!
//! MySQL's native `TRUNCATE TABLE` is DDL and implicitly commits the
//! enclosing transaction, which would break the all-or-nothing contract,
//! so `TRUNCATE` is emulated as `DELETE FROM` plus the inserts inside one
//! transaction. `UPSERT` uses `INSERT .. ON DUPLICATE KEY UPDATE` against
//! the primary key that `ensure_table` builds from the key columns.
//!
//! DATETIME columns have no timezone; values are stored as their UTC
//! components and read back as UTC. Key columns of STRING type become
//! `VARCHAR(255)` (TEXT cannot be indexed without a prefix length).

use crate::dialects::csv::typed_cell;
use crate::dialects::Connector;
use crate::registry::{DialectDescriptor, DialectFactory};
use crate::strategy::LoadStrategy;
use crate::uri::ConnectionConfig;
use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, TxOpts};
use sync_core::{Column, LogicalSchema, LogicalType, Result, Row, SyncError, ToDdl, Value};
use tracing::debug;

static DESCRIPTOR: DialectDescriptor = DialectDescriptor {
    protocol: "mysql",
    summary: "MySQL warehouse",
    required_keys: &["host", "username", "secret", "database"],
    optional_keys: &[("port", Some("3306"))],
    load_strategies: &[
        LoadStrategy::Append,
        LoadStrategy::Truncate,
        LoadStrategy::Upsert,
    ],
    supports_load: true,
    default_batch_size: 5000,
};

/// Factory for `mysql://`.
#[derive(Debug)]
pub struct MysqlDialect;

#[async_trait]
impl DialectFactory for MysqlDialect {
    fn descriptor(&self) -> &'static DialectDescriptor {
        &DESCRIPTOR
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Connector>> {
        let port: u16 = config.get_or("port", "3306").parse().map_err(|_| {
            SyncError::Configuration(format!(
                "port '{}' is not a number",
                config.get_or("port", "3306")
            ))
        })?;
        let opts = OptsBuilder::default()
            .ip_or_hostname(config.require("host")?)
            .tcp_port(port)
            .user(Some(config.require("username")?))
            .pass(Some(config.require("secret")?))
            .db_name(Some(config.require("database")?));
        let conn = Conn::new(Opts::from(opts))
            .await
            .map_err(|e| SyncError::connection("mysql", e))?;
        Ok(Box::new(MysqlConnector { conn: Some(conn) }))
    }
}

/// DDL generation for MySQL.
struct MysqlDdl;

impl ToDdl for MysqlDdl {
    fn to_ddl(&self, logical_type: &LogicalType) -> String {
        match logical_type {
            LogicalType::String => "TEXT".to_string(),
            LogicalType::Integer => "BIGINT".to_string(),
            LogicalType::Float => "DOUBLE".to_string(),
            LogicalType::Boolean => "TINYINT(1)".to_string(),
            LogicalType::Datetime => "DATETIME(6)".to_string(),
            LogicalType::Date => "DATE".to_string(),
            LogicalType::Json => "JSON".to_string(),
        }
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{ident}`")
    }

    fn to_create_table(&self, table: &str, schema: &LogicalSchema) -> String {
        let mut defs: Vec<String> = Vec::with_capacity(schema.columns().len() + 1);
        for column in schema.columns() {
            let mut def = format!(
                "{} {}",
                self.quote_ident(&column.name),
                column_ddl_type(column)
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

fn column_ddl_type(column: &Column) -> String {
    if column.key && column.logical_type == LogicalType::String {
        "VARCHAR(255)".to_string()
    } else {
        MysqlDdl.to_ddl(&column.logical_type)
    }
}

/// information_schema DATA_TYPE for each column, for drift detection.
fn info_schema_type(column: &Column) -> &'static str {
    if column.key && column.logical_type == LogicalType::String {
        return "varchar";
    }
    match column.logical_type {
        LogicalType::String => "text",
        LogicalType::Integer => "bigint",
        LogicalType::Float => "double",
        LogicalType::Boolean => "tinyint",
        LogicalType::Datetime => "datetime",
        LogicalType::Date => "date",
        LogicalType::Json => "json",
    }
}

/// Connector owning one MySQL session.
pub struct MysqlConnector {
    conn: Option<Conn>,
}

impl MysqlConnector {
    fn conn(&mut self) -> Result<&mut Conn> {
        self.conn.as_mut().ok_or_else(|| {
            SyncError::backend(
                "mysql",
                "using connector",
                anyhow::anyhow!("connection already closed"),
            )
        })
    }
}

fn bind_value(value: &Value) -> mysql_async::Value {
    match value {
        Value::String(s) => mysql_async::Value::Bytes(s.clone().into_bytes()),
        Value::Integer(i) => mysql_async::Value::Int(*i),
        Value::Float(f) => mysql_async::Value::Double(*f),
        Value::Boolean(b) => mysql_async::Value::Int(*b as i64),
        Value::Datetime(dt) => mysql_async::Value::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.timestamp_subsec_micros(),
        ),
        Value::Date(d) => mysql_async::Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        Value::Json(j) => mysql_async::Value::Bytes(j.to_string().into_bytes()),
        Value::Null => mysql_async::Value::NULL,
    }
}

fn bind_row(schema: &LogicalSchema, row: &Row) -> Vec<mysql_async::Value> {
    schema
        .columns()
        .iter()
        .map(|c| bind_value(row.get(&c.name).unwrap_or(&Value::Null)))
        .collect()
}

fn insert_sql(table: &str, schema: &LogicalSchema) -> String {
    let columns: Vec<String> = schema
        .column_names()
        .map(|c| MysqlDdl.quote_ident(c))
        .collect();
    let placeholders = vec!["?"; columns.len()];
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        MysqlDdl.quote_ident(table),
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn upsert_sql(table: &str, schema: &LogicalSchema) -> String {
    let updates: Vec<String> = schema
        .columns()
        .iter()
        .filter(|c| !c.key)
        .map(|c| {
            let ident = MysqlDdl.quote_ident(&c.name);
            format!("{ident} = VALUES({ident})")
        })
        .collect();
    if updates.is_empty() {
        // Every column is a key; a duplicate key carries no new data.
        return insert_sql(table, schema).replacen("INSERT", "INSERT IGNORE", 1);
    }
    format!(
        "{} ON DUPLICATE KEY UPDATE {}",
        insert_sql(table, schema),
        updates.join(", ")
    )
}

fn read_value(cell: &mysql_async::Value, column: &Column) -> Result<Value> {
    let type_error = |got: String| SyncError::TypeCoercion {
        column: column.name.clone(),
        detail: format!("stored {got} cannot be read as {}", column.logical_type),
    };
    match (column.logical_type, cell) {
        (_, mysql_async::Value::NULL) => Ok(Value::Null),
        (LogicalType::Integer, mysql_async::Value::Int(i)) => Ok(Value::Integer(*i)),
        (LogicalType::Integer, mysql_async::Value::UInt(u)) => Ok(Value::Integer(*u as i64)),
        (LogicalType::Boolean, mysql_async::Value::Int(i)) => Ok(Value::Boolean(*i != 0)),
        (LogicalType::Float, mysql_async::Value::Double(f)) => Ok(Value::Float(*f)),
        (LogicalType::Float, mysql_async::Value::Float(f)) => Ok(Value::Float(*f as f64)),
        (LogicalType::Float, mysql_async::Value::Int(i)) => Ok(Value::Float(*i as f64)),
        (LogicalType::Datetime, mysql_async::Value::Date(y, mo, d, h, mi, s, us)) => {
            chrono::NaiveDate::from_ymd_opt(*y as i32, *mo as u32, *d as u32)
                .and_then(|date| date.and_hms_micro_opt(*h as u32, *mi as u32, *s as u32, *us))
                .map(|naive| Value::Datetime(naive.and_utc()))
                .ok_or_else(|| type_error(format!("datetime {y}-{mo}-{d}")))
        }
        (LogicalType::Date, mysql_async::Value::Date(y, mo, d, ..)) => {
            chrono::NaiveDate::from_ymd_opt(*y as i32, *mo as u32, *d as u32)
                .map(Value::Date)
                .ok_or_else(|| type_error(format!("date {y}-{mo}-{d}")))
        }
        (_, mysql_async::Value::Bytes(bytes)) => {
            let text = std::str::from_utf8(bytes).map_err(|e| SyncError::TypeCoercion {
                column: column.name.clone(),
                detail: format!("stored bytes are not UTF-8: {e}"),
            })?;
            typed_cell(column, text)
        }
        (_, other) => Err(type_error(format!("{other:?}"))),
    }
}

#[async_trait]
impl Connector for MysqlConnector {
    async fn ensure_table(&mut self, table: &str, schema: &LogicalSchema) -> Result<()> {
        let conn = self.conn()?;
        let existing: Vec<(String, String)> = conn
            .exec(
                "SELECT COLUMN_NAME, DATA_TYPE FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? ORDER BY ordinal_position",
                (table,),
            )
            .await
            .map_err(|e| SyncError::backend("mysql", "inspecting table", e))?;

        if existing.is_empty() {
            let ddl = MysqlDdl.to_create_table(table, schema);
            debug!(table, %ddl, "creating table");
            conn.query_drop(&ddl)
                .await
                .map_err(|e| SyncError::backend("mysql", "creating table", e))?;
            return Ok(());
        }

        let mismatch = |detail: String| SyncError::SchemaMismatch {
            dialect: "mysql".to_string(),
            table: table.to_string(),
            detail,
        };
        for (name, _) in &existing {
            if schema.column(name).is_none() {
                return Err(mismatch(format!(
                    "existing column '{name}' is not declared in the schema; \
                     destructive migrations are never performed"
                )));
            }
        }
        for column in schema.columns() {
            let declared = info_schema_type(column);
            match existing.iter().find(|(name, _)| *name == column.name) {
                Some((_, existing_type)) => {
                    if !existing_type.eq_ignore_ascii_case(declared) {
                        return Err(mismatch(format!(
                            "column '{}' is {existing_type}, schema declares {declared}",
                            column.name
                        )));
                    }
                }
                None => {
                    if !column.nullable {
                        return Err(mismatch(format!(
                            "cannot add non-nullable column '{}' to an existing table",
                            column.name
                        )));
                    }
                    let ddl = format!(
                        "ALTER TABLE {} ADD COLUMN {} {}",
                        MysqlDdl.quote_ident(table),
                        MysqlDdl.quote_ident(&column.name),
                        column_ddl_type(column)
                    );
                    debug!(table, %ddl, "adding column");
                    conn.query_drop(&ddl)
                        .await
                        .map_err(|e| SyncError::backend("mysql", "adding column", e))?;
                }
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
        let sql = insert_sql(table, schema);
        let conn = self.conn()?;
        let mut tx = conn
            .start_transaction(TxOpts::default())
            .await
            .map_err(|e| SyncError::backend("mysql", "starting transaction", e))?;
        tx.exec_batch(sql.as_str(), rows.iter().map(|r| bind_row(schema, r)))
            .await
            .map_err(|e| SyncError::backend("mysql", "inserting rows", e))?;
        tx.commit()
            .await
            .map_err(|e| SyncError::backend("mysql", "committing append", e))?;
        Ok(())
    }

    async fn replace_all(
        &mut self,
        table: &str,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<()> {
        let sql = insert_sql(table, schema);
        // DELETE, not TRUNCATE: TRUNCATE is DDL and would commit early.
        let delete = format!("DELETE FROM {}", MysqlDdl.quote_ident(table));
        let conn = self.conn()?;
        let mut tx = conn
            .start_transaction(TxOpts::default())
            .await
            .map_err(|e| SyncError::backend("mysql", "starting transaction", e))?;
        tx.query_drop(&delete)
            .await
            .map_err(|e| SyncError::backend("mysql", "clearing table", e))?;
        tx.exec_batch(sql.as_str(), rows.iter().map(|r| bind_row(schema, r)))
            .await
            .map_err(|e| SyncError::backend("mysql", "inserting rows", e))?;
        tx.commit()
            .await
            .map_err(|e| SyncError::backend("mysql", "committing replace", e))?;
        Ok(())
    }

    async fn merge_rows(
        &mut self,
        table: &str,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<()> {
        let sql = upsert_sql(table, schema);
        let conn = self.conn()?;
        let mut tx = conn
            .start_transaction(TxOpts::default())
            .await
            .map_err(|e| SyncError::backend("mysql", "starting transaction", e))?;
        tx.exec_batch(sql.as_str(), rows.iter().map(|r| bind_row(schema, r)))
            .await
            .map_err(|e| SyncError::backend("mysql", "merging rows", e))?;
        tx.commit()
            .await
            .map_err(|e| SyncError::backend("mysql", "committing merge", e))?;
        Ok(())
    }

    async fn read_all(&mut self, table: &str, schema: &LogicalSchema) -> Result<Vec<Row>> {
        let conn = self.conn()?;
        let present: Option<i64> = conn
            .exec_first(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = ?",
                (table,),
            )
            .await
            .map_err(|e| SyncError::backend("mysql", "inspecting table", e))?;
        if present.unwrap_or(0) == 0 {
            return Ok(vec![]);
        }

        let columns: Vec<String> = schema
            .column_names()
            .map(|c| MysqlDdl.quote_ident(c))
            .collect();
        let sql = format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            MysqlDdl.quote_ident(table)
        );
        let mysql_rows: Vec<mysql_async::Row> = conn
            .query(&sql)
            .await
            .map_err(|e| SyncError::backend("mysql", "querying table", e))?;

        let mut rows = Vec::with_capacity(mysql_rows.len());
        for mysql_row in mysql_rows {
            let mut row = Row::new();
            for (idx, column) in schema.columns().iter().enumerate() {
                let cell = mysql_row.as_ref(idx).unwrap_or(&mysql_async::Value::NULL);
                row.insert(column.name.clone(), read_value(cell, column)?);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.disconnect()
                .await
                .map_err(|e| SyncError::backend("mysql", "closing connection", e))?;
        }
        Ok(())
    }
}
