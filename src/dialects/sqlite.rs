//! SQLite dialect: an embedded database file.
//!
//! All three strategies run inside a single transaction, so a failure
//! mid-write rolls the target back to its pre-operation state. `UPSERT`
//! uses native `INSERT .. ON CONFLICT` against the primary key that
//! `ensure_table` builds from the schema's key columns.
//!
//! SQLite has no BOOLEAN, DATETIME, or JSON column types; booleans store
//! as 0/1 INTEGER and temporals/JSON as TEXT, recovered on read through
//! the declared schema.

use crate::dialects::csv::typed_cell;
use crate::dialects::Connector;
use crate::registry::{DialectDescriptor, DialectFactory};
use crate::strategy::LoadStrategy;
use crate::uri::ConnectionConfig;
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use sync_core::{Column, LogicalSchema, LogicalType, Result, Row, SyncError, ToDdl, Value};
use tracing::debug;

static DESCRIPTOR: DialectDescriptor = DialectDescriptor {
    protocol: "sqlite",
    summary: "embedded SQLite database file",
    required_keys: &["database"],
    optional_keys: &[],
    load_strategies: &[
        LoadStrategy::Append,
        LoadStrategy::Truncate,
        LoadStrategy::Upsert,
    ],
    supports_load: true,
    default_batch_size: 10_000,
};

/// Factory for `sqlite://`.
#[derive(Debug)]
pub struct SqliteDialect;

#[async_trait]
impl DialectFactory for SqliteDialect {
    fn descriptor(&self) -> &'static DialectDescriptor {
        &DESCRIPTOR
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Connector>> {
        let database = config.require("database")?;
        let conn = Connection::open(database)
            .map_err(|e| SyncError::connection("sqlite", e))?;
        // Probe the handle so a bad path fails here, not at first write.
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| SyncError::connection("sqlite", e))?;
        Ok(Box::new(SqliteConnector { conn: Some(conn) }))
    }
}

/// DDL generation for SQLite's storage classes.
struct SqliteDdl;

impl ToDdl for SqliteDdl {
    fn to_ddl(&self, logical_type: &LogicalType) -> String {
        match logical_type {
            LogicalType::String => "TEXT".to_string(),
            LogicalType::Integer => "INTEGER".to_string(),
            LogicalType::Float => "REAL".to_string(),
            LogicalType::Boolean => "INTEGER".to_string(),
            LogicalType::Datetime => "TEXT".to_string(),
            LogicalType::Date => "TEXT".to_string(),
            LogicalType::Json => "TEXT".to_string(),
        }
    }
}

/// Connector owning one SQLite handle.
pub struct SqliteConnector {
    conn: Option<Connection>,
}

impl SqliteConnector {
    fn conn(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or_else(|| {
            SyncError::backend(
                "sqlite",
                "using connector",
                anyhow::anyhow!("connection already closed"),
            )
        })
    }
}

fn backend(context: &str) -> impl Fn(rusqlite::Error) -> SyncError + '_ {
    move |e| SyncError::backend("sqlite", context, e)
}

fn insert_sql(table: &str, schema: &LogicalSchema) -> String {
    let columns: Vec<String> = schema
        .column_names()
        .map(|c| SqliteDdl.quote_ident(c))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        SqliteDdl.quote_ident(table),
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn upsert_sql(table: &str, schema: &LogicalSchema) -> String {
    let base = insert_sql(table, schema);
    let keys: Vec<String> = schema
        .key_columns()
        .map(|c| SqliteDdl.quote_ident(&c.name))
        .collect();
    let updates: Vec<String> = schema
        .columns()
        .iter()
        .filter(|c| !c.key)
        .map(|c| {
            let ident = SqliteDdl.quote_ident(&c.name);
            format!("{ident} = excluded.{ident}")
        })
        .collect();
    if updates.is_empty() {
        format!("{base} ON CONFLICT ({}) DO NOTHING", keys.join(", "))
    } else {
        format!(
            "{base} ON CONFLICT ({}) DO UPDATE SET {}",
            keys.join(", "),
            updates.join(", ")
        )
    }
}

fn bind_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Integer(i) => rusqlite::types::Value::Integer(*i),
        Value::Float(f) => rusqlite::types::Value::Real(*f),
        Value::Boolean(b) => rusqlite::types::Value::Integer(*b as i64),
        Value::Null => rusqlite::types::Value::Null,
        other => rusqlite::types::Value::Text(other.to_text()),
    }
}

fn bind_row(schema: &LogicalSchema, row: &Row) -> Vec<rusqlite::types::Value> {
    schema
        .columns()
        .iter()
        .map(|c| bind_value(row.get(&c.name).unwrap_or(&Value::Null)))
        .collect()
}

fn read_value(cell: ValueRef<'_>, column: &Column) -> Result<Value> {
    match (column.logical_type, cell) {
        (_, ValueRef::Null) => Ok(Value::Null),
        (LogicalType::Integer, ValueRef::Integer(i)) => Ok(Value::Integer(i)),
        (LogicalType::Boolean, ValueRef::Integer(i)) => Ok(Value::Boolean(i != 0)),
        (LogicalType::Float, ValueRef::Integer(i)) => Ok(Value::Float(i as f64)),
        (LogicalType::Float, ValueRef::Real(f)) => Ok(Value::Float(f)),
        (_, ValueRef::Text(bytes)) => {
            let text = std::str::from_utf8(bytes).map_err(|e| SyncError::TypeCoercion {
                column: column.name.clone(),
                detail: format!("stored text is not UTF-8: {e}"),
            })?;
            typed_cell(column, text)
        }
        (_, other) => Err(SyncError::TypeCoercion {
            column: column.name.clone(),
            detail: format!(
                "stored {:?} cannot be read as {}",
                other.data_type(),
                column.logical_type
            ),
        }),
    }
}

fn write_batch(
    tx: &rusqlite::Transaction<'_>,
    sql: &str,
    schema: &LogicalSchema,
    rows: &[Row],
) -> Result<()> {
    let mut stmt = tx.prepare(sql).map_err(backend("preparing insert"))?;
    for row in rows {
        stmt.execute(rusqlite::params_from_iter(bind_row(schema, row)))
            .map_err(backend("inserting row"))?;
    }
    Ok(())
}

#[async_trait]
impl Connector for SqliteConnector {
    async fn ensure_table(&mut self, table: &str, schema: &LogicalSchema) -> Result<()> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT name, type FROM pragma_table_info(?1)")
            .map_err(backend("inspecting table"))?;
        let existing: Vec<(String, String)> = stmt
            .query_map([table], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(backend("inspecting table"))?
            .collect::<std::result::Result<_, _>>()
            .map_err(backend("inspecting table"))?;
        drop(stmt);

        if existing.is_empty() {
            let ddl = SqliteDdl.to_create_table(table, schema);
            debug!(table, %ddl, "creating table");
            conn.execute(&ddl, []).map_err(backend("creating table"))?;
            return Ok(());
        }

        let mismatch = |detail: String| SyncError::SchemaMismatch {
            dialect: "sqlite".to_string(),
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
            let declared = SqliteDdl.to_ddl(&column.logical_type);
            match existing.iter().find(|(name, _)| *name == column.name) {
                Some((_, existing_type)) => {
                    if !existing_type.eq_ignore_ascii_case(&declared) {
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
                        "ALTER TABLE {} ADD COLUMN {} {declared}",
                        SqliteDdl.quote_ident(table),
                        SqliteDdl.quote_ident(&column.name)
                    );
                    debug!(table, %ddl, "adding column");
                    conn.execute(&ddl, []).map_err(backend("adding column"))?;
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
        let tx = self
            .conn()?
            .transaction()
            .map_err(backend("starting transaction"))?;
        write_batch(&tx, &sql, schema, rows)?;
        tx.commit().map_err(backend("committing append"))?;
        Ok(())
    }

    async fn replace_all(
        &mut self,
        table: &str,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<()> {
        let sql = insert_sql(table, schema);
        let delete = format!("DELETE FROM {}", SqliteDdl.quote_ident(table));
        let tx = self
            .conn()?
            .transaction()
            .map_err(backend("starting transaction"))?;
        tx.execute(&delete, []).map_err(backend("clearing table"))?;
        write_batch(&tx, &sql, schema, rows)?;
        tx.commit().map_err(backend("committing replace"))?;
        Ok(())
    }

    async fn merge_rows(
        &mut self,
        table: &str,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<()> {
        let sql = upsert_sql(table, schema);
        let tx = self
            .conn()?
            .transaction()
            .map_err(backend("starting transaction"))?;
        write_batch(&tx, &sql, schema, rows)?;
        tx.commit().map_err(backend("committing merge"))?;
        Ok(())
    }

    async fn read_all(&mut self, table: &str, schema: &LogicalSchema) -> Result<Vec<Row>> {
        let conn = self.conn()?;
        let present: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .map_err(backend("inspecting table"))?;
        if !present {
            return Ok(vec![]);
        }

        let columns: Vec<String> = schema
            .column_names()
            .map(|c| SqliteDdl.quote_ident(c))
            .collect();
        let sql = format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            SqliteDdl.quote_ident(table)
        );
        let mut stmt = conn.prepare(&sql).map_err(backend("preparing select"))?;
        let mut sql_rows = stmt.query([]).map_err(backend("querying table"))?;
        let mut rows = Vec::new();
        while let Some(sql_row) = sql_rows.next().map_err(backend("reading row"))? {
            let mut row = Row::new();
            for (idx, column) in schema.columns().iter().enumerate() {
                let cell = sql_row
                    .get_ref(idx)
                    .map_err(backend("reading cell"))?;
                row.insert(column.name.clone(), read_value(cell, column)?);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .map_err(|(_, e)| SyncError::backend("sqlite", "closing connection", e))?;
        }
        Ok(())
    }
}
