//! End-to-end tests for the CSV dialect.

use metasync::{LogicalSchema, LogicalType, Row, SyncError, Syncer};
use tempfile::TempDir;

fn users_schema() -> LogicalSchema {
    LogicalSchema::builder()
        .column("id", LogicalType::Integer)
        .column("name", LogicalType::String)
        .build()
        .unwrap()
}

fn users_rows() -> Vec<Row> {
    vec![
        Row::new().with("id", 1_i64).with("name", "a"),
        Row::new().with("id", 2_i64).with("name", "b"),
    ]
}

fn csv_uri(dir: &TempDir, strategy: &str) -> String {
    format!(
        "csv://directory={}&load_strategy={strategy}",
        dir.path().display()
    )
}

#[tokio::test]
async fn append_writes_header_and_rows_in_order() {
    let dir = TempDir::new().unwrap();
    let mut syncer = Syncer::from_uri(&csv_uri(&dir, "APPEND")).await.unwrap();
    let written = syncer.dump("users", &users_schema(), users_rows()).await.unwrap();
    assert_eq!(written, 2);
    syncer.close().await.unwrap();

    let contents = std::fs::read_to_string(dir.path().join("users.csv")).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines, vec!["id,name", "1,a", "2,b"]);
}

#[tokio::test]
async fn append_round_trips_through_load() {
    let dir = TempDir::new().unwrap();
    let schema = users_schema();
    let mut syncer = Syncer::from_uri(&csv_uri(&dir, "APPEND")).await.unwrap();
    syncer.dump("users", &schema, users_rows()).await.unwrap();
    let loaded = syncer.load("users", &schema).await.unwrap();
    assert_eq!(loaded, users_rows());
    syncer.close().await.unwrap();
}

#[tokio::test]
async fn append_twice_accumulates_without_repeating_header() {
    let dir = TempDir::new().unwrap();
    let schema = users_schema();
    let mut syncer = Syncer::from_uri(&csv_uri(&dir, "APPEND")).await.unwrap();
    syncer.dump("users", &schema, users_rows()).await.unwrap();
    syncer
        .dump(
            "users",
            &schema,
            vec![Row::new().with("id", 3_i64).with("name", "c")],
        )
        .await
        .unwrap();
    let loaded = syncer.load("users", &schema).await.unwrap();
    assert_eq!(loaded.len(), 3);
    syncer.close().await.unwrap();

    let contents = std::fs::read_to_string(dir.path().join("users.csv")).unwrap();
    assert_eq!(contents.matches("id,name").count(), 1);
}

#[tokio::test]
async fn truncate_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let schema = users_schema();
    let mut syncer = Syncer::from_uri(&csv_uri(&dir, "TRUNCATE")).await.unwrap();
    syncer.dump("users", &schema, users_rows()).await.unwrap();
    syncer.dump("users", &schema, users_rows()).await.unwrap();
    let loaded = syncer.load("users", &schema).await.unwrap();
    assert_eq!(loaded, users_rows());
    syncer.close().await.unwrap();
}

#[tokio::test]
async fn empty_truncate_dump_leaves_an_empty_target() {
    let dir = TempDir::new().unwrap();
    let schema = users_schema();
    let mut syncer = Syncer::from_uri(&csv_uri(&dir, "TRUNCATE")).await.unwrap();
    syncer.dump("users", &schema, users_rows()).await.unwrap();
    syncer.dump("users", &schema, vec![]).await.unwrap();
    let loaded = syncer.load("users", &schema).await.unwrap();
    assert!(loaded.is_empty());
    syncer.close().await.unwrap();
}

#[tokio::test]
async fn empty_append_dump_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let schema = users_schema();
    let mut syncer = Syncer::from_uri(&csv_uri(&dir, "APPEND")).await.unwrap();
    syncer.dump("users", &schema, users_rows()).await.unwrap();
    syncer.dump("users", &schema, vec![]).await.unwrap();
    let loaded = syncer.load("users", &schema).await.unwrap();
    assert_eq!(loaded, users_rows());
    syncer.close().await.unwrap();
}

#[tokio::test]
async fn load_of_a_never_synced_table_is_empty() {
    let dir = TempDir::new().unwrap();
    let schema = users_schema();
    let mut syncer = Syncer::from_uri(&csv_uri(&dir, "APPEND")).await.unwrap();
    let loaded = syncer.load("users", &schema).await.unwrap();
    assert!(loaded.is_empty());
    syncer.close().await.unwrap();
}

#[tokio::test]
async fn header_drift_fails_with_schema_mismatch() {
    let dir = TempDir::new().unwrap();
    let mut syncer = Syncer::from_uri(&csv_uri(&dir, "APPEND")).await.unwrap();
    syncer
        .dump("users", &users_schema(), users_rows())
        .await
        .unwrap();

    let renamed = LogicalSchema::builder()
        .column("id", LogicalType::Integer)
        .column("full_name", LogicalType::String)
        .build()
        .unwrap();
    let err = syncer
        .dump(
            "users",
            &renamed,
            vec![Row::new().with("id", 3_i64).with("full_name", "c")],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::SchemaMismatch { .. }));
    syncer.close().await.unwrap();
}

#[tokio::test]
async fn upsert_is_rejected_at_construction() {
    let dir = TempDir::new().unwrap();
    let err = Syncer::from_uri(&csv_uri(&dir, "UPSERT")).await.unwrap_err();
    assert!(matches!(err, SyncError::Configuration(_)));
}

#[tokio::test]
async fn missing_directory_fails_as_connection_error() {
    let err = Syncer::from_uri("csv://directory=/definitely/not/here&load_strategy=APPEND")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Connection { .. }));
}

#[tokio::test]
async fn typed_values_survive_a_round_trip() {
    let dir = TempDir::new().unwrap();
    let schema = LogicalSchema::builder()
        .column("id", LogicalType::Integer)
        .column("score", LogicalType::Float)
        .column("active", LogicalType::Boolean)
        .column("modified", LogicalType::Datetime)
        .column("joined", LogicalType::Date)
        .nullable("tags", LogicalType::Json)
        .build()
        .unwrap();
    let rows = vec![
        Row::new()
            .with("id", 1_i64)
            .with("score", 9.25)
            .with("active", true)
            .with("modified", "2024-06-01T12:30:00Z".parse::<chrono::DateTime<chrono::Utc>>().unwrap())
            .with("joined", chrono::NaiveDate::from_ymd_opt(2023, 2, 28).unwrap())
            .with("tags", serde_json::json!(["admin", "beta"])),
        Row::new()
            .with("id", 2_i64)
            .with("score", 0.5)
            .with("active", false)
            .with("modified", "2024-06-01T15:00:00+02:00".parse::<chrono::DateTime<chrono::FixedOffset>>().unwrap())
            .with("joined", chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .with("tags", metasync::Value::Null),
    ];
    let mut syncer = Syncer::from_uri(&csv_uri(&dir, "APPEND")).await.unwrap();
    syncer.dump("events", &schema, rows.clone()).await.unwrap();
    let loaded = syncer.load("events", &schema).await.unwrap();
    syncer.close().await.unwrap();

    // The offset-bearing datetime comes back normalized to UTC.
    assert_eq!(
        loaded[1].get("modified").unwrap().as_datetime().unwrap(),
        &"2024-06-01T13:00:00Z".parse::<chrono::DateTime<chrono::Utc>>().unwrap()
    );
    assert_eq!(loaded[0], schema.coerce_row(rows[0].clone()).unwrap());
}
