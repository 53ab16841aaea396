//! Construction-path tests: URI validation, dialect resolution, the mock
//! sink, and the out-of-tree dialect extension point.

use async_trait::async_trait;
use metasync::dialects::Connector;
use metasync::{
    ConnectionConfig, DialectDescriptor, DialectFactory, DialectRegistry, LoadStrategy,
    LogicalSchema, LogicalType, Row, SyncError, Syncer, Value,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

fn users_schema() -> LogicalSchema {
    LogicalSchema::builder()
        .key("id", LogicalType::Integer)
        .column("name", LogicalType::String)
        .build()
        .unwrap()
}

#[tokio::test]
async fn unknown_dialect_names_the_protocol_and_lists_known_ones() {
    let err = Syncer::from_uri("snowflake://account_name=x").await.unwrap_err();
    match err {
        SyncError::UnknownDialect { protocol, known } => {
            assert_eq!(protocol, "snowflake");
            assert!(known.contains(&"sqlite".to_string()));
        }
        other => panic!("expected UnknownDialect, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_required_key_fails_before_any_open() {
    let err = Syncer::from_uri("csv://load_strategy=APPEND").await.unwrap_err();
    match err {
        SyncError::Configuration(msg) => assert!(msg.contains("directory")),
        other => panic!("expected Configuration, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_uris_fail_to_parse() {
    for uri in ["", "csv", "csv://a", "://a=b", "csv://=x"] {
        let err = Syncer::from_uri(uri).await.unwrap_err();
        assert!(
            matches!(err, SyncError::Configuration(_)),
            "expected Configuration for '{uri}', got {err:?}"
        );
    }
}

#[tokio::test]
async fn mock_dialect_accepts_dumps_and_rejects_load() {
    let mut syncer = Syncer::from_uri("mock://load_strategy=UPSERT").await.unwrap();
    assert_eq!(syncer.dialect(), "mock");
    assert_eq!(syncer.load_strategy(), LoadStrategy::Upsert);

    let written = syncer
        .dump(
            "users",
            &users_schema(),
            vec![Row::new().with("id", 1_i64).with("name", "a")],
        )
        .await
        .unwrap();
    assert_eq!(written, 1);

    let err = syncer.load("users", &users_schema()).await.unwrap_err();
    assert!(matches!(err, SyncError::Unsupported { .. }));
    syncer.close().await.unwrap();
}

// A minimal in-memory dialect, registered the way third-party dialects are.

static MEMORY_DESCRIPTOR: DialectDescriptor = DialectDescriptor {
    protocol: "memory",
    summary: "in-memory store for tests",
    required_keys: &[],
    optional_keys: &[],
    load_strategies: &[LoadStrategy::Append, LoadStrategy::Truncate],
    supports_load: true,
    default_batch_size: 100,
};

type Store = Arc<Mutex<HashMap<String, Vec<Row>>>>;

#[derive(Debug)]
struct MemoryDialect {
    store: Store,
}

#[async_trait]
impl DialectFactory for MemoryDialect {
    fn descriptor(&self) -> &'static DialectDescriptor {
        &MEMORY_DESCRIPTOR
    }

    async fn open(&self, _config: &ConnectionConfig) -> metasync::Result<Box<dyn Connector>> {
        Ok(Box::new(MemoryConnector {
            store: self.store.clone(),
        }))
    }
}

struct MemoryConnector {
    store: Store,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn ensure_table(&mut self, table: &str, _schema: &LogicalSchema) -> metasync::Result<()> {
        self.store.lock().unwrap().entry(table.to_string()).or_default();
        Ok(())
    }

    async fn append_rows(
        &mut self,
        table: &str,
        _schema: &LogicalSchema,
        rows: &[Row],
    ) -> metasync::Result<()> {
        self.store
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }

    async fn replace_all(
        &mut self,
        table: &str,
        _schema: &LogicalSchema,
        rows: &[Row],
    ) -> metasync::Result<()> {
        self.store
            .lock()
            .unwrap()
            .insert(table.to_string(), rows.to_vec());
        Ok(())
    }

    async fn merge_rows(
        &mut self,
        _table: &str,
        _schema: &LogicalSchema,
        _rows: &[Row],
    ) -> metasync::Result<()> {
        Err(SyncError::Unsupported {
            dialect: "memory".to_string(),
            operation: "UPSERT".to_string(),
        })
    }

    async fn read_all(&mut self, table: &str, _schema: &LogicalSchema) -> metasync::Result<Vec<Row>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default())
    }

    async fn close(&mut self) -> metasync::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn out_of_tree_dialects_register_on_an_isolated_registry() {
    let store: Store = Arc::default();
    let mut registry = DialectRegistry::empty();
    registry.register(Arc::new(MemoryDialect {
        store: store.clone(),
    }));

    let mut syncer = Syncer::from_uri_in(&registry, "memory://load_strategy=TRUNCATE")
        .await
        .unwrap();
    let schema = users_schema();
    let rows = vec![
        Row::new().with("id", 1_i64).with("name", "a"),
        Row::new().with("id", 2_i64).with("name", "b"),
    ];
    syncer.dump("users", &schema, rows.clone()).await.unwrap();
    syncer.dump("users", &schema, rows.clone()).await.unwrap();
    let loaded = syncer.load("users", &schema).await.unwrap();
    syncer.close().await.unwrap();
    assert_eq!(loaded.len(), 2);

    // Built-ins are not visible through the isolated registry.
    assert!(Syncer::from_uri_in(&registry, "mock://").await.is_err());
}

#[tokio::test]
async fn unrecognized_keys_warn_but_do_not_fail() {
    let mut syncer = Syncer::from_uri("mock://totally_unknown=1").await.unwrap();
    syncer
        .dump(
            "users",
            &users_schema(),
            vec![Row::new().with("id", 1_i64).with("name", "a")],
        )
        .await
        .unwrap();
    syncer.close().await.unwrap();
}

#[tokio::test]
async fn rows_with_undeclared_columns_fail_as_configuration_errors() {
    let mut syncer = Syncer::from_uri("mock://").await.unwrap();
    let err = syncer
        .dump(
            "users",
            &users_schema(),
            vec![Row::new()
                .with("id", 1_i64)
                .with("name", "a")
                .with("stray", Value::Integer(9))],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Configuration(_)));
    syncer.close().await.unwrap();
}
