//! End-to-end tests for the warehouse dialects.
//!
//! These need live servers (the same docker-compose services used in CI)
//! and are ignored by default:
//!
//! ```bash
//! docker run -d -p 5432:5432 -e POSTGRES_PASSWORD=postgres postgres:16
//! docker run -d -p 3306:3306 -e MYSQL_ROOT_PASSWORD=root -e MYSQL_DATABASE=testdb mysql:8
//! cargo test --test e2e_warehouses -- --ignored
//! ```

use metasync::{LogicalSchema, LogicalType, Row, Syncer, Value};

const POSTGRES_URI: &str =
    "postgres://host=localhost&username=postgres&secret=postgres&database=postgres";
const MYSQL_URI: &str = "mysql://host=localhost&username=root&secret=root&database=testdb";

fn kv_schema() -> LogicalSchema {
    LogicalSchema::builder()
        .key("id", LogicalType::Integer)
        .column("v", LogicalType::String)
        .build()
        .unwrap()
}

fn sorted_by_id(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort_by_key(|r| r.get("id").and_then(Value::as_i64));
    rows
}

async fn upsert_overwrites_overlapping_keys(uri: &str, table: &str) {
    let schema = kv_schema();

    // Start from a clean slate.
    let mut cleaner = Syncer::from_uri(&format!("{uri}&load_strategy=TRUNCATE"))
        .await
        .unwrap();
    cleaner.dump(table, &schema, vec![]).await.unwrap();
    cleaner.close().await.unwrap();

    let mut syncer = Syncer::from_uri(&format!("{uri}&load_strategy=UPSERT"))
        .await
        .unwrap();
    syncer
        .dump(
            table,
            &schema,
            vec![Row::new().with("id", 1_i64).with("v", "x")],
        )
        .await
        .unwrap();
    syncer
        .dump(
            table,
            &schema,
            vec![
                Row::new().with("id", 1_i64).with("v", "y"),
                Row::new().with("id", 2_i64).with("v", "z"),
            ],
        )
        .await
        .unwrap();

    let rows = sorted_by_id(syncer.load(table, &schema).await.unwrap());
    syncer.close().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("v"), Some(&Value::String("y".into())));
    assert_eq!(rows[1].get("v"), Some(&Value::String("z".into())));
}

async fn truncate_is_idempotent(uri: &str, table: &str) {
    let schema = kv_schema();
    let rows = vec![
        Row::new().with("id", 1_i64).with("v", "x"),
        Row::new().with("id", 2_i64).with("v", "y"),
    ];
    let mut syncer = Syncer::from_uri(&format!("{uri}&load_strategy=TRUNCATE"))
        .await
        .unwrap();
    syncer.dump(table, &schema, rows.clone()).await.unwrap();
    syncer.dump(table, &schema, rows.clone()).await.unwrap();
    let loaded = sorted_by_id(syncer.load(table, &schema).await.unwrap());
    syncer.close().await.unwrap();
    assert_eq!(loaded, rows);
}

async fn typed_round_trip(uri: &str, table: &str) {
    let schema = LogicalSchema::builder()
        .key("id", LogicalType::Integer)
        .column("score", LogicalType::Float)
        .column("active", LogicalType::Boolean)
        .column("modified", LogicalType::Datetime)
        .column("joined", LogicalType::Date)
        .nullable("meta", LogicalType::Json)
        .build()
        .unwrap();
    let rows = vec![Row::new()
        .with("id", 1_i64)
        .with("score", 2.25)
        .with("active", true)
        .with(
            "modified",
            "2024-06-01T12:00:00+05:00"
                .parse::<chrono::DateTime<chrono::FixedOffset>>()
                .unwrap(),
        )
        .with("joined", chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
        .with("meta", serde_json::json!({"k": [1, 2]}))];

    let mut syncer = Syncer::from_uri(&format!("{uri}&load_strategy=TRUNCATE"))
        .await
        .unwrap();
    syncer.dump(table, &schema, rows.clone()).await.unwrap();
    let loaded = syncer.load(table, &schema).await.unwrap();
    syncer.close().await.unwrap();
    assert_eq!(loaded, vec![schema.coerce_row(rows[0].clone()).unwrap()]);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL at localhost:5432"]
async fn postgres_upsert_overwrites_overlapping_keys() {
    upsert_overwrites_overlapping_keys(POSTGRES_URI, "metasync_kv_upsert").await;
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL at localhost:5432"]
async fn postgres_truncate_is_idempotent() {
    truncate_is_idempotent(POSTGRES_URI, "metasync_kv_truncate").await;
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL at localhost:5432"]
async fn postgres_typed_round_trip() {
    typed_round_trip(POSTGRES_URI, "metasync_typed").await;
}

#[tokio::test]
#[ignore = "requires a running MySQL at localhost:3306"]
async fn mysql_upsert_overwrites_overlapping_keys() {
    upsert_overwrites_overlapping_keys(MYSQL_URI, "metasync_kv_upsert").await;
}

#[tokio::test]
#[ignore = "requires a running MySQL at localhost:3306"]
async fn mysql_truncate_is_idempotent() {
    truncate_is_idempotent(MYSQL_URI, "metasync_kv_truncate").await;
}

#[tokio::test]
#[ignore = "requires a running MySQL at localhost:3306"]
async fn mysql_typed_round_trip() {
    typed_round_trip(MYSQL_URI, "metasync_typed").await;
}
