//! External database bridge against real SQLite files:
//! driver validation, parameter binding, declared-type coercion and
//! the guaranteed-terminal transaction protocol.

use assert_matches::assert_matches;

use plinth_core::error::CoreError;
use plinth_core::value::ScriptValue;
use plinth_runtime::bridge::DbBridge;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn temp_dsn(tag: &str) -> String {
    let path = std::env::temp_dir().join(format!("plinth-bridge-{tag}-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    path.to_string_lossy().into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unsupported_drivers_are_rejected() {
    let bridge = DbBridge::new();
    let err = bridge.open("postgres", "postgres://nope").await.unwrap_err();
    assert_matches!(err, CoreError::Validation(msg) if msg.contains("postgres"));
}

#[tokio::test]
async fn exec_reports_affected_rows() {
    let bridge = DbBridge::new();
    let dsn = temp_dsn("exec");

    bridge
        .exec("sqlite", &dsn, "create table t (v INTEGER)", &[])
        .await
        .unwrap();
    let affected = bridge
        .exec(
            "sqlite",
            &dsn,
            "insert into t (v) values (?), (?), (?)",
            &[
                ScriptValue::Int(1),
                ScriptValue::Int(2),
                ScriptValue::Int(3),
            ],
        )
        .await
        .unwrap();
    assert_eq!(affected, 3);

    let affected = bridge
        .exec(
            "sqlite",
            &dsn,
            "delete from t where v > ?",
            &[ScriptValue::Int(1)],
        )
        .await
        .unwrap();
    assert_eq!(affected, 2);
}

#[tokio::test]
async fn rows_coerce_by_declared_column_type() {
    let bridge = DbBridge::new();
    let dsn = temp_dsn("coerce");

    bridge
        .exec(
            "sqlite",
            &dsn,
            "create table snapshot (\
                n INTEGER, flag BOOLEAN, ratio REAL, label TEXT, \
                payload BLOB, taken_at DATETIME, missing TEXT)",
            &[],
        )
        .await
        .unwrap();
    bridge
        .exec(
            "sqlite",
            &dsn,
            "insert into snapshot values (?, ?, ?, ?, ?, '2024-05-06 07:08:09', ?)",
            &[
                ScriptValue::Int(42),
                ScriptValue::Bool(true),
                ScriptValue::Float(2.5),
                ScriptValue::String("hello".to_string()),
                ScriptValue::Bytes(vec![0xde, 0xad]),
                ScriptValue::Null,
            ],
        )
        .await
        .unwrap();

    let rows = bridge
        .query("sqlite", &dsn, "select * from snapshot", &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row["n"], ScriptValue::Int(42));
    assert_eq!(row["flag"], ScriptValue::Bool(true));
    assert_eq!(row["ratio"], ScriptValue::Float(2.5));
    assert_eq!(row["label"], ScriptValue::String("hello".to_string()));
    assert_eq!(row["payload"], ScriptValue::Bytes(vec![0xde, 0xad]));
    assert_eq!(
        row["taken_at"],
        ScriptValue::String("2024-05-06 07:08:09".to_string())
    );
    assert_eq!(row["missing"], ScriptValue::Null);

    // Column order in the row mirrors the select list.
    let names: Vec<_> = row.keys().cloned().collect();
    assert_eq!(
        names,
        vec!["n", "flag", "ratio", "label", "payload", "taken_at", "missing"]
    );
}

#[tokio::test]
async fn composite_parameters_bind_as_json_text() {
    let bridge = DbBridge::new();
    let dsn = temp_dsn("json");

    bridge
        .exec("sqlite", &dsn, "create table docs (body TEXT)", &[])
        .await
        .unwrap();
    let mut doc = indexmap::IndexMap::new();
    doc.insert("k".to_string(), ScriptValue::String("v".to_string()));
    bridge
        .exec(
            "sqlite",
            &dsn,
            "insert into docs (body) values (?)",
            &[ScriptValue::Object(doc)],
        )
        .await
        .unwrap();

    let rows = bridge
        .query("sqlite", &dsn, "select body from docs", &[])
        .await
        .unwrap();
    assert_eq!(
        rows[0]["body"],
        ScriptValue::String(r#"{"k":"v"}"#.to_string())
    );
}

#[tokio::test]
async fn committed_transactions_persist() {
    let bridge = DbBridge::new();
    let dsn = temp_dsn("commit");
    bridge
        .exec("sqlite", &dsn, "create table t (v INTEGER)", &[])
        .await
        .unwrap();

    let mut tx = bridge.begin("sqlite", &dsn, 0).await.unwrap();
    tx.exec("insert into t (v) values (?)", &[ScriptValue::Int(1)])
        .await
        .unwrap();

    // Statements inside the transaction see their own writes.
    let rows = tx.query("select count(*) as n from t", &[]).await.unwrap();
    assert_eq!(rows[0]["n"], ScriptValue::Int(1));
    tx.commit().await.unwrap();

    let rows = bridge
        .query("sqlite", &dsn, "select count(*) as n from t", &[])
        .await
        .unwrap();
    assert_eq!(rows[0]["n"], ScriptValue::Int(1));
}

#[tokio::test]
async fn rolled_back_transactions_leave_no_trace() {
    let bridge = DbBridge::new();
    let dsn = temp_dsn("rollback");
    bridge
        .exec("sqlite", &dsn, "create table t (v INTEGER)", &[])
        .await
        .unwrap();

    let mut tx = bridge.begin("sqlite", &dsn, 0).await.unwrap();
    tx.exec("insert into t (v) values (?)", &[ScriptValue::Int(1)])
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    let rows = bridge
        .query("sqlite", &dsn, "select count(*) as n from t", &[])
        .await
        .unwrap();
    assert_eq!(rows[0]["n"], ScriptValue::Int(0));
}

#[tokio::test]
async fn dropped_transactions_never_publish_writes() {
    let bridge = DbBridge::new();
    let dsn = temp_dsn("dropped");
    bridge
        .exec("sqlite", &dsn, "create table t (v INTEGER)", &[])
        .await
        .unwrap();

    {
        let mut tx = bridge.begin("sqlite", &dsn, 0).await.unwrap();
        tx.exec("insert into t (v) values (?)", &[ScriptValue::Int(1)])
            .await
            .unwrap();
        // Dropped without commit or rollback. The connection is discarded
        // and the write dies with it.
    }
    // Give the discarded connection a moment to close and release its lock.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let rows = bridge
        .query("sqlite", &dsn, "select count(*) as n from t", &[])
        .await
        .unwrap();
    assert_eq!(rows[0]["n"], ScriptValue::Int(0));

    // The pool stays usable for later transactions.
    let mut tx = bridge.begin("sqlite", &dsn, 0).await.unwrap();
    tx.exec("insert into t (v) values (?)", &[ScriptValue::Int(2)])
        .await
        .unwrap();
    tx.commit().await.unwrap();
    let rows = bridge
        .query("sqlite", &dsn, "select count(*) as n from t", &[])
        .await
        .unwrap();
    assert_eq!(rows[0]["n"], ScriptValue::Int(1));
}
