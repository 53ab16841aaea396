//! End-to-end tests for the Excel dialect.

use metasync::{LogicalSchema, LogicalType, Row, SyncError, Syncer, Value};
use tempfile::TempDir;

fn users_schema() -> LogicalSchema {
    LogicalSchema::builder()
        .column("id", LogicalType::Integer)
        .column("name", LogicalType::String)
        .nullable("score", LogicalType::Float)
        .build()
        .unwrap()
}

fn excel_uri(dir: &TempDir, strategy: &str) -> String {
    format!(
        "excel://filepath={}&load_strategy={strategy}",
        dir.path().join("report.xlsx").display()
    )
}

#[tokio::test]
async fn dump_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let schema = users_schema();
    let rows = vec![
        Row::new().with("id", 1_i64).with("name", "a").with("score", 1.5),
        Row::new()
            .with("id", 2_i64)
            .with("name", "b")
            .with("score", Value::Null),
    ];
    let mut syncer = Syncer::from_uri(&excel_uri(&dir, "APPEND")).await.unwrap();
    syncer.dump("users", &schema, rows.clone()).await.unwrap();
    let loaded = syncer.load("users", &schema).await.unwrap();
    syncer.close().await.unwrap();
    assert_eq!(loaded, rows);
}

#[tokio::test]
async fn each_table_becomes_its_own_worksheet() {
    let dir = TempDir::new().unwrap();
    let schema = users_schema();
    let mut syncer = Syncer::from_uri(&excel_uri(&dir, "APPEND")).await.unwrap();
    syncer
        .dump(
            "users",
            &schema,
            vec![Row::new().with("id", 1_i64).with("name", "a")],
        )
        .await
        .unwrap();
    syncer
        .dump(
            "groups",
            &schema,
            vec![Row::new().with("id", 9_i64).with("name", "admins")],
        )
        .await
        .unwrap();
    assert_eq!(syncer.load("users", &schema).await.unwrap().len(), 1);
    assert_eq!(syncer.load("groups", &schema).await.unwrap().len(), 1);
    syncer.close().await.unwrap();
}

#[tokio::test]
async fn append_to_an_existing_workbook_takes_a_suffixed_path() {
    let dir = TempDir::new().unwrap();
    let schema = users_schema();

    let mut first = Syncer::from_uri(&excel_uri(&dir, "APPEND")).await.unwrap();
    first
        .dump(
            "users",
            &schema,
            vec![Row::new().with("id", 1_i64).with("name", "a")],
        )
        .await
        .unwrap();
    first.close().await.unwrap();
    assert!(dir.path().join("report.xlsx").exists());

    // A second APPEND sync must not overwrite the earlier workbook.
    let mut second = Syncer::from_uri(&excel_uri(&dir, "APPEND")).await.unwrap();
    second
        .dump(
            "users",
            &schema,
            vec![Row::new().with("id", 2_i64).with("name", "b")],
        )
        .await
        .unwrap();
    second.close().await.unwrap();
    assert!(dir.path().join("report_1.xlsx").exists());
}

#[tokio::test]
async fn truncate_replaces_the_workbook_in_place() {
    let dir = TempDir::new().unwrap();
    let schema = users_schema();

    let mut first = Syncer::from_uri(&excel_uri(&dir, "TRUNCATE")).await.unwrap();
    first
        .dump(
            "users",
            &schema,
            vec![
                Row::new().with("id", 1_i64).with("name", "a"),
                Row::new().with("id", 2_i64).with("name", "b"),
            ],
        )
        .await
        .unwrap();
    first.close().await.unwrap();

    let mut second = Syncer::from_uri(&excel_uri(&dir, "TRUNCATE")).await.unwrap();
    second
        .dump(
            "users",
            &schema,
            vec![Row::new().with("id", 3_i64).with("name", "c")],
        )
        .await
        .unwrap();
    let loaded = second.load("users", &schema).await.unwrap();
    second.close().await.unwrap();

    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].get("id"), Some(&Value::Integer(3)));
    assert!(!dir.path().join("report_1.xlsx").exists());
}

#[tokio::test]
async fn upsert_is_rejected_at_construction() {
    let dir = TempDir::new().unwrap();
    let err = Syncer::from_uri(&excel_uri(&dir, "UPSERT")).await.unwrap_err();
    assert!(matches!(err, SyncError::Configuration(_)));
}

#[tokio::test]
async fn missing_filepath_key_fails_before_io() {
    let err = Syncer::from_uri("excel://load_strategy=APPEND").await.unwrap_err();
    match err {
        SyncError::Configuration(msg) => assert!(msg.contains("filepath")),
        other => panic!("expected Configuration, got {other:?}"),
    }
}
