//! PostgreSQL dialect.
//!
//! Strategies map onto native transactional primitives: `TRUNCATE` runs
//! `TRUNCATE TABLE` plus the inserts inside one transaction, and `UPSERT`
//! stages rows into a session-temporary table (`ON COMMIT DROP`, named
//! with a per-invocation UUID so parallel invocations cannot collide)
//! before a single `INSERT .. SELECT .. ON CONFLICT` merge. Readers never
//! observe a half-applied write.

use crate::dialects::Connector;
use crate::registry::{DialectDescriptor, DialectFactory};
use crate::strategy::LoadStrategy;
use crate::uri::ConnectionConfig;
use async_trait::async_trait;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use sync_core::{Column, LogicalSchema, LogicalType, Result, Row, SyncError, ToDdl, Value};
use tracing::{debug, warn};

static DESCRIPTOR: DialectDescriptor = DialectDescriptor {
    protocol: "postgres",
    summary: "PostgreSQL warehouse",
    required_keys: &["host", "username", "secret", "database"],
    optional_keys: &[("port", Some("5432")), ("schema", Some("public"))],
    load_strategies: &[
        LoadStrategy::Append,
        LoadStrategy::Truncate,
        LoadStrategy::Upsert,
    ],
    supports_load: true,
    default_batch_size: 5000,
};

/// Factory for `postgres://`.
#[derive(Debug)]
pub struct PostgresDialect;

#[async_trait]
impl DialectFactory for PostgresDialect {
    fn descriptor(&self) -> &'static DialectDescriptor {
        &DESCRIPTOR
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Connector>> {
        let port: u16 = config.get_or("port", "5432").parse().map_err(|_| {
            SyncError::Configuration(format!(
                "port '{}' is not a number",
                config.get_or("port", "5432")
            ))
        })?;
        let schema = config.get_or("schema", "public").to_string();

        let mut pg = tokio_postgres::Config::new();
        pg.host(config.require("host")?)
            .port(port)
            .user(config.require("username")?)
            .password(config.require("secret")?)
            .dbname(config.require("database")?);

        let (client, connection) = pg
            .connect(NoTls)
            .await
            .map_err(|e| SyncError::connection("postgres", e))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("postgres connection error: {e}");
            }
        });
        client
            .batch_execute(&format!("SET search_path = {}", PgDdl.quote_ident(&schema)))
            .await
            .map_err(|e| SyncError::connection("postgres", e))?;

        Ok(Box::new(PostgresConnector {
            client: Some(client),
            schema,
        }))
    }
}

/// DDL generation for PostgreSQL.
struct PgDdl;

impl ToDdl for PgDdl {
    fn to_ddl(&self, logical_type: &LogicalType) -> String {
        match logical_type {
            LogicalType::String => "TEXT".to_string(),
            LogicalType::Integer => "BIGINT".to_string(),
            LogicalType::Float => "DOUBLE PRECISION".to_string(),
            LogicalType::Boolean => "BOOLEAN".to_string(),
            LogicalType::Datetime => "TIMESTAMPTZ".to_string(),
            LogicalType::Date => "DATE".to_string(),
            LogicalType::Json => "JSONB".to_string(),
        }
    }
}

/// information_schema name for each logical type, for drift detection.
fn info_schema_type(logical_type: &LogicalType) -> &'static str {
    match logical_type {
        LogicalType::String => "text",
        LogicalType::Integer => "bigint",
        LogicalType::Float => "double precision",
        LogicalType::Boolean => "boolean",
        LogicalType::Datetime => "timestamp with time zone",
        LogicalType::Date => "date",
        LogicalType::Json => "jsonb",
    }
}

/// Connector owning one PostgreSQL session.
pub struct PostgresConnector {
    client: Option<Client>,
    schema: String,
}

type PgParam = Box<dyn ToSql + Sync + Send>;

fn bind_value(column: &Column, value: &Value) -> Result<PgParam> {
    // Null must carry the column's type so the prepared statement agrees.
    let param: PgParam = match (value, column.logical_type) {
        (Value::Null, LogicalType::String) => Box::new(Option::<String>::None),
        (Value::Null, LogicalType::Integer) => Box::new(Option::<i64>::None),
        (Value::Null, LogicalType::Float) => Box::new(Option::<f64>::None),
        (Value::Null, LogicalType::Boolean) => Box::new(Option::<bool>::None),
        (Value::Null, LogicalType::Datetime) => {
            Box::new(Option::<chrono::DateTime<chrono::Utc>>::None)
        }
        (Value::Null, LogicalType::Date) => Box::new(Option::<chrono::NaiveDate>::None),
        (Value::Null, LogicalType::Json) => Box::new(Option::<serde_json::Value>::None),
        (Value::String(s), _) => Box::new(s.clone()),
        (Value::Integer(i), _) => Box::new(*i),
        (Value::Float(f), _) => Box::new(*f),
        (Value::Boolean(b), _) => Box::new(*b),
        (Value::Datetime(dt), _) => Box::new(*dt),
        (Value::Date(d), _) => Box::new(*d),
        (Value::Json(j), _) => Box::new(j.clone()),
    };
    Ok(param)
}

fn insert_sql(target: &str, schema: &LogicalSchema) -> String {
    let columns: Vec<String> = schema
        .column_names()
        .map(|c| PgDdl.quote_ident(c))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
    format!(
        "INSERT INTO {target} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn merge_sql(target: &str, staging: &str, schema: &LogicalSchema) -> String {
    let columns: Vec<String> = schema
        .column_names()
        .map(|c| PgDdl.quote_ident(c))
        .collect();
    let keys: Vec<String> = schema
        .key_columns()
        .map(|c| PgDdl.quote_ident(&c.name))
        .collect();
    let updates: Vec<String> = schema
        .columns()
        .iter()
        .filter(|c| !c.key)
        .map(|c| {
            let ident = PgDdl.quote_ident(&c.name);
            format!("{ident} = EXCLUDED.{ident}")
        })
        .collect();
    let conflict = if updates.is_empty() {
        format!("ON CONFLICT ({}) DO NOTHING", keys.join(", "))
    } else {
        format!(
            "ON CONFLICT ({}) DO UPDATE SET {}",
            keys.join(", "),
            updates.join(", ")
        )
    };
    format!(
        "INSERT INTO {target} ({cols}) SELECT {cols} FROM {staging} {conflict}",
        cols = columns.join(", ")
    )
}

async fn write_batch(
    tx: &tokio_postgres::Transaction<'_>,
    sql: &str,
    schema: &LogicalSchema,
    rows: &[Row],
) -> Result<()> {
    let stmt = tx
        .prepare(sql)
        .await
        .map_err(|e| SyncError::backend("postgres", "preparing insert", e))?;
    for row in rows {
        let params: Vec<PgParam> = schema
            .columns()
            .iter()
            .map(|c| bind_value(c, row.get(&c.name).unwrap_or(&Value::Null)))
            .collect::<Result<_>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        tx.execute(&stmt, &refs)
            .await
            .map_err(|e| SyncError::backend("postgres", "inserting row", e))?;
    }
    Ok(())
}

impl PostgresConnector {
    fn client(&mut self) -> Result<&mut Client> {
        self.client.as_mut().ok_or_else(|| {
            SyncError::backend(
                "postgres",
                "using connector",
                anyhow::anyhow!("connection already closed"),
            )
        })
    }

    fn target(&self, table: &str) -> String {
        PgDdl.quote_ident(table)
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn ensure_table(&mut self, table: &str, schema: &LogicalSchema) -> Result<()> {
        let pg_schema = self.schema.clone();
        let client = self.client()?;
        let existing = client
            .query(
                "SELECT column_name, data_type FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
                &[&pg_schema, &table],
            )
            .await
            .map_err(|e| SyncError::backend("postgres", "inspecting table", e))?;

        if existing.is_empty() {
            let ddl = PgDdl.to_create_table(table, schema);
            debug!(table, %ddl, "creating table");
            client
                .batch_execute(&ddl)
                .await
                .map_err(|e| SyncError::backend("postgres", "creating table", e))?;
            return Ok(());
        }

        let mismatch = |detail: String| SyncError::SchemaMismatch {
            dialect: "postgres".to_string(),
            table: table.to_string(),
            detail,
        };
        let existing: Vec<(String, String)> = existing
            .iter()
            .map(|row| (row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect();
        for (name, _) in &existing {
            if schema.column(name).is_none() {
                return Err(mismatch(format!(
                    "existing column '{name}' is not declared in the schema; \
                     destructive migrations are never performed"
                )));
            }
        }
        for column in schema.columns() {
            let declared = info_schema_type(&column.logical_type);
            match existing.iter().find(|(name, _)| *name == column.name) {
                Some((_, existing_type)) => {
                    if existing_type != declared {
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
                        PgDdl.quote_ident(table),
                        PgDdl.quote_ident(&column.name),
                        PgDdl.to_ddl(&column.logical_type)
                    );
                    debug!(table, %ddl, "adding column");
                    client
                        .batch_execute(&ddl)
                        .await
                        .map_err(|e| SyncError::backend("postgres", "adding column", e))?;
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
        let sql = insert_sql(&self.target(table), schema);
        let client = self.client()?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| SyncError::backend("postgres", "starting transaction", e))?;
        write_batch(&tx, &sql, schema, rows).await?;
        tx.commit()
            .await
            .map_err(|e| SyncError::backend("postgres", "committing append", e))?;
        Ok(())
    }

    async fn replace_all(
        &mut self,
        table: &str,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<()> {
        let target = self.target(table);
        let sql = insert_sql(&target, schema);
        let client = self.client()?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| SyncError::backend("postgres", "starting transaction", e))?;
        tx.batch_execute(&format!("TRUNCATE TABLE {target}"))
            .await
            .map_err(|e| SyncError::backend("postgres", "truncating table", e))?;
        write_batch(&tx, &sql, schema, rows).await?;
        tx.commit()
            .await
            .map_err(|e| SyncError::backend("postgres", "committing replace", e))?;
        Ok(())
    }

    async fn merge_rows(
        &mut self,
        table: &str,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<()> {
        let target = self.target(table);
        let staging = PgDdl.quote_ident(&format!(
            "stage_{table}_{}",
            uuid::Uuid::new_v4().simple()
        ));
        let client = self.client()?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| SyncError::backend("postgres", "starting transaction", e))?;
        tx.batch_execute(&format!(
            "CREATE TEMPORARY TABLE {staging} (LIKE {target}) ON COMMIT DROP"
        ))
        .await
        .map_err(|e| SyncError::backend("postgres", "creating staging table", e))?;
        write_batch(&tx, &insert_sql(&staging, schema), schema, rows).await?;
        let merge = merge_sql(&target, &staging, schema);
        tx.execute(merge.as_str(), &[])
            .await
            .map_err(|e| SyncError::backend("postgres", "merging staged rows", e))?;
        tx.commit()
            .await
            .map_err(|e| SyncError::backend("postgres", "committing merge", e))?;
        Ok(())
    }

    async fn read_all(&mut self, table: &str, schema: &LogicalSchema) -> Result<Vec<Row>> {
        let pg_schema = self.schema.clone();
        let target = self.target(table);
        let client = self.client()?;
        let present: i64 = client
            .query_one(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2",
                &[&pg_schema, &table],
            )
            .await
            .map_err(|e| SyncError::backend("postgres", "inspecting table", e))?
            .get(0);
        if present == 0 {
            return Ok(vec![]);
        }

        let columns: Vec<String> = schema
            .column_names()
            .map(|c| PgDdl.quote_ident(c))
            .collect();
        let sql = format!("SELECT {} FROM {target}", columns.join(", "));
        let pg_rows = client
            .query(sql.as_str(), &[])
            .await
            .map_err(|e| SyncError::backend("postgres", "querying table", e))?;

        let mut rows = Vec::with_capacity(pg_rows.len());
        for pg_row in pg_rows {
            let mut row = Row::new();
            for (idx, column) in schema.columns().iter().enumerate() {
                row.insert(column.name.clone(), read_value(&pg_row, idx, column)?);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the client terminates the spawned connection task.
        self.client.take();
        Ok(())
    }
}

fn read_value(row: &tokio_postgres::Row, idx: usize, column: &Column) -> Result<Value> {
    let cell_error = |e: tokio_postgres::Error| SyncError::TypeCoercion {
        column: column.name.clone(),
        detail: format!("cannot read stored value as {}: {e}", column.logical_type),
    };
    let value = match column.logical_type {
        LogicalType::String => row
            .try_get::<_, Option<String>>(idx)
            .map_err(cell_error)?
            .map(Value::String),
        LogicalType::Integer => row
            .try_get::<_, Option<i64>>(idx)
            .map_err(cell_error)?
            .map(Value::Integer),
        LogicalType::Float => row
            .try_get::<_, Option<f64>>(idx)
            .map_err(cell_error)?
            .map(Value::Float),
        LogicalType::Boolean => row
            .try_get::<_, Option<bool>>(idx)
            .map_err(cell_error)?
            .map(Value::Boolean),
        LogicalType::Datetime => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .map_err(cell_error)?
            .map(Value::Datetime),
        LogicalType::Date => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .map_err(cell_error)?
            .map(Value::Date),
        LogicalType::Json => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .map_err(cell_error)?
            .map(Value::Json),
    };
    Ok(value.unwrap_or(Value::Null))
}
