//! Bridge from scripts to external databases.
//!
//! Connections are pooled per `(driver, DSN)` pair and shared across
//! workers. Every checkout is preceded by a liveness probe; a pool that
//! fails its probe is dropped and reopened within the same call, so one
//! dead cached connection never wedges later runs.
//!
//! Query results reach scripts as ordered column-name to value maps.
//! Cell values are coerced by the column's declared type instead of the
//! driver's raw representation, so a `BOOLEAN` is a bool and a
//! `DATETIME` is a formatted string on every backend.

use std::collections::HashMap;
use std::str::FromStr;

use indexmap::IndexMap;
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, MySql, MySqlPool, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};

use plinth_core::error::CoreError;
use plinth_core::value::ScriptValue;

/// One decoded result row: column name to value, in select order.
pub type BridgeRow = IndexMap<String, ScriptValue>;

const BRIDGE_POOL_SIZE: u32 = 5;

#[derive(Clone)]
enum BridgePool {
    Sqlite(SqlitePool),
    MySql(MySqlPool),
}

impl BridgePool {
    async fn ping(&self) -> Result<(), sqlx::Error> {
        match self {
            BridgePool::Sqlite(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
            BridgePool::MySql(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
        }
    }
}

/// Shared pool cache for script-opened databases.
#[derive(Default)]
pub struct DbBridge {
    pools: tokio::sync::Mutex<HashMap<(String, String), BridgePool>>,
}

impl DbBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or revive) the pool for a driver/DSN pair. Called eagerly by
    /// `db_open` so connection failures surface where the script names
    /// the database, not at first query.
    pub async fn open(&self, driver: &str, dsn: &str) -> Result<(), CoreError> {
        self.pool(driver, dsn).await.map(|_| ())
    }

    /// Run a result-producing statement.
    pub async fn query(
        &self,
        driver: &str,
        dsn: &str,
        sql: &str,
        params: &[ScriptValue],
    ) -> Result<Vec<BridgeRow>, CoreError> {
        match self.pool(driver, dsn).await? {
            BridgePool::Sqlite(pool) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite(query, param);
                }
                let rows = query.fetch_all(&pool).await.map_err(db_err)?;
                Ok(rows.iter().map(decode_sqlite_row).collect())
            }
            BridgePool::MySql(pool) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql(query, param);
                }
                let rows = query.fetch_all(&pool).await.map_err(db_err)?;
                Ok(rows.iter().map(decode_mysql_row).collect())
            }
        }
    }

    /// Run a modifying statement, returning the affected row count.
    pub async fn exec(
        &self,
        driver: &str,
        dsn: &str,
        sql: &str,
        params: &[ScriptValue],
    ) -> Result<u64, CoreError> {
        match self.pool(driver, dsn).await? {
            BridgePool::Sqlite(pool) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite(query, param);
                }
                let done = query.execute(&pool).await.map_err(db_err)?;
                Ok(done.rows_affected())
            }
            BridgePool::MySql(pool) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql(query, param);
                }
                let done = query.execute(&pool).await.map_err(db_err)?;
                Ok(done.rows_affected())
            }
        }
    }

    /// Start a transaction on a dedicated connection.
    ///
    /// SQLite runs every transaction serialized and ignores the level
    /// (logged at debug). MySQL issues `SET TRANSACTION` before `BEGIN`
    /// for the levels it can express; the rest run at the session
    /// default. Levels outside the script numbering (0 through 7) are
    /// rejected.
    pub async fn begin(
        &self,
        driver: &str,
        dsn: &str,
        isolation: i64,
    ) -> Result<BridgeTransaction, CoreError> {
        let isolation_stmt = isolation_sql(isolation)?;
        match self.pool(driver, dsn).await? {
            BridgePool::Sqlite(pool) => {
                if isolation != 0 {
                    tracing::debug!(isolation, "sqlite ignores transaction isolation levels");
                }
                let mut conn = pool.acquire().await.map_err(db_err)?;
                sqlx::query("BEGIN")
                    .execute(&mut *conn)
                    .await
                    .map_err(db_err)?;
                Ok(BridgeTransaction {
                    conn: Some(BridgeConn::Sqlite(conn)),
                    open: true,
                })
            }
            BridgePool::MySql(pool) => {
                let mut conn = pool.acquire().await.map_err(db_err)?;
                match isolation_stmt {
                    Some(stmt) => {
                        sqlx::query(stmt)
                            .execute(&mut *conn)
                            .await
                            .map_err(db_err)?;
                    }
                    None if isolation != 0 => {
                        tracing::debug!(
                            isolation,
                            "isolation level has no mysql form, using the session default"
                        );
                    }
                    None => {}
                }
                sqlx::query("BEGIN")
                    .execute(&mut *conn)
                    .await
                    .map_err(db_err)?;
                Ok(BridgeTransaction {
                    conn: Some(BridgeConn::MySql(conn)),
                    open: true,
                })
            }
        }
    }

    async fn pool(&self, driver: &str, dsn: &str) -> Result<BridgePool, CoreError> {
        let key = (driver.to_string(), dsn.to_string());
        let mut pools = self.pools.lock().await;
        if let Some(existing) = pools.get(&key) {
            if existing.ping().await.is_ok() {
                return Ok(existing.clone());
            }
            tracing::warn!(driver, "cached database pool failed its probe, reopening");
            pools.remove(&key);
        }
        let fresh = connect(driver, dsn).await?;
        pools.insert(key, fresh.clone());
        Ok(fresh)
    }
}

async fn connect(driver: &str, dsn: &str) -> Result<BridgePool, CoreError> {
    match driver {
        "sqlite" | "sqlite3" => {
            let options = SqliteConnectOptions::from_str(dsn)
                .map_err(db_err)?
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(BRIDGE_POOL_SIZE)
                .connect_with(options)
                .await
                .map_err(db_err)?;
            Ok(BridgePool::Sqlite(pool))
        }
        "mysql" => {
            let pool = MySqlPoolOptions::new()
                .max_connections(BRIDGE_POOL_SIZE)
                .connect(dsn)
                .await
                .map_err(db_err)?;
            Ok(BridgePool::MySql(pool))
        }
        other => Err(CoreError::Validation(format!(
            "unsupported database driver: {other}"
        ))),
    }
}

fn db_err(err: sqlx::Error) -> CoreError {
    CoreError::Database(err.to_string())
}

/// `SET TRANSACTION` form for a script isolation level, `None` for the
/// levels (default, write-committed, snapshot, linearizable) that fall
/// back to the driver default.
fn isolation_sql(level: i64) -> Result<Option<&'static str>, CoreError> {
    match level {
        0 | 3 | 5 | 7 => Ok(None),
        1 => Ok(Some("SET TRANSACTION ISOLATION LEVEL READ UNCOMMITTED")),
        2 => Ok(Some("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")),
        4 => Ok(Some("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")),
        6 => Ok(Some("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")),
        other => Err(CoreError::Validation(format!(
            "unsupported transaction isolation level: {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

enum BridgeConn {
    Sqlite(PoolConnection<Sqlite>),
    MySql(PoolConnection<MySql>),
}

/// A script transaction pinned to one connection.
///
/// `commit` and `rollback` consume the transaction. If neither ran by
/// drop time the connection is detached from its pool and closed, which
/// rolls the transaction back server-side; a half-open transaction can
/// never ride a pooled connection into an unrelated run.
pub struct BridgeTransaction {
    conn: Option<BridgeConn>,
    open: bool,
}

impl BridgeTransaction {
    pub async fn query(
        &mut self,
        sql: &str,
        params: &[ScriptValue],
    ) -> Result<Vec<BridgeRow>, CoreError> {
        match self.conn_mut()? {
            BridgeConn::Sqlite(conn) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite(query, param);
                }
                let rows = query.fetch_all(&mut **conn).await.map_err(db_err)?;
                Ok(rows.iter().map(decode_sqlite_row).collect())
            }
            BridgeConn::MySql(conn) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql(query, param);
                }
                let rows = query.fetch_all(&mut **conn).await.map_err(db_err)?;
                Ok(rows.iter().map(decode_mysql_row).collect())
            }
        }
    }

    pub async fn exec(&mut self, sql: &str, params: &[ScriptValue]) -> Result<u64, CoreError> {
        match self.conn_mut()? {
            BridgeConn::Sqlite(conn) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite(query, param);
                }
                let done = query.execute(&mut **conn).await.map_err(db_err)?;
                Ok(done.rows_affected())
            }
            BridgeConn::MySql(conn) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql(query, param);
                }
                let done = query.execute(&mut **conn).await.map_err(db_err)?;
                Ok(done.rows_affected())
            }
        }
    }

    pub async fn commit(mut self) -> Result<(), CoreError> {
        self.terminate("COMMIT").await
    }

    pub async fn rollback(mut self) -> Result<(), CoreError> {
        self.terminate("ROLLBACK").await
    }

    async fn terminate(&mut self, stmt: &str) -> Result<(), CoreError> {
        match self.conn_mut()? {
            BridgeConn::Sqlite(conn) => {
                sqlx::query(stmt)
                    .execute(&mut **conn)
                    .await
                    .map_err(db_err)?;
            }
            BridgeConn::MySql(conn) => {
                sqlx::query(stmt)
                    .execute(&mut **conn)
                    .await
                    .map_err(db_err)?;
            }
        }
        self.open = false;
        Ok(())
    }

    fn conn_mut(&mut self) -> Result<&mut BridgeConn, CoreError> {
        self.conn
            .as_mut()
            .ok_or_else(|| CoreError::Internal("transaction connection is gone".to_string()))
    }
}

impl Drop for BridgeTransaction {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if let Some(conn) = self.conn.take() {
            tracing::warn!("transaction dropped while open, discarding its connection");
            match conn {
                BridgeConn::Sqlite(conn) => drop(conn.detach()),
                BridgeConn::MySql(conn) => drop(conn.detach()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Binding and decoding
// ---------------------------------------------------------------------------

fn bind_sqlite<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &ScriptValue,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        ScriptValue::Null => query.bind(Option::<String>::None),
        ScriptValue::Bool(b) => query.bind(*b),
        ScriptValue::Int(i) => query.bind(*i),
        ScriptValue::Float(f) => query.bind(*f),
        ScriptValue::String(s) => query.bind(s.clone()),
        ScriptValue::Bytes(b) => query.bind(b.clone()),
        other => query.bind(other.to_json().to_string()),
    }
}

fn bind_mysql<'q>(
    query: sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments>,
    value: &ScriptValue,
) -> sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments> {
    match value {
        ScriptValue::Null => query.bind(Option::<String>::None),
        ScriptValue::Bool(b) => query.bind(*b),
        ScriptValue::Int(i) => query.bind(*i),
        ScriptValue::Float(f) => query.bind(*f),
        ScriptValue::String(s) => query.bind(s.clone()),
        ScriptValue::Bytes(b) => query.bind(b.clone()),
        other => query.bind(other.to_json().to_string()),
    }
}

/// Target representation for a declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coerce {
    Int,
    Bool,
    Float,
    DateTime,
    Date,
    Time,
    Bytes,
    Text,
}

/// Map a declared type name onto its script-facing representation.
/// Unrecognized declarations pass through as text.
fn coercion_target(declared: &str) -> Coerce {
    let normalized = declared
        .split(['(', ' '])
        .next()
        .unwrap_or(declared)
        .to_uppercase();
    match normalized.as_str() {
        "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" | "YEAR" => Coerce::Int,
        "TINYINT" | "BOOL" | "BOOLEAN" | "BIT" => Coerce::Bool,
        "FLOAT" | "DOUBLE" | "DECIMAL" | "REAL" | "NUMERIC" => Coerce::Float,
        "DATETIME" | "TIMESTAMP" => Coerce::DateTime,
        "DATE" => Coerce::Date,
        "TIME" => Coerce::Time,
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => Coerce::Bytes,
        _ => Coerce::Text,
    }
}

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

fn decode_sqlite_row(row: &SqliteRow) -> BridgeRow {
    let mut out = IndexMap::with_capacity(row.columns().len());
    for (i, column) in row.columns().iter().enumerate() {
        out.insert(
            column.name().to_string(),
            decode_sqlite_value(row, i, column.type_info().name()),
        );
    }
    out
}

fn decode_sqlite_value(row: &SqliteRow, i: usize, declared: &str) -> ScriptValue {
    if row.try_get_raw(i).map(|v| v.is_null()).unwrap_or(true) {
        return ScriptValue::Null;
    }
    match coercion_target(declared) {
        Coerce::Int => row
            .try_get::<i64, _>(i)
            .map(ScriptValue::Int)
            .unwrap_or_else(|_| sqlite_fallback(row, i)),
        Coerce::Bool => row
            .try_get::<bool, _>(i)
            .map(ScriptValue::Bool)
            .or_else(|_| row.try_get::<i64, _>(i).map(|v| ScriptValue::Bool(v != 0)))
            .unwrap_or_else(|_| sqlite_fallback(row, i)),
        Coerce::Float => row
            .try_get::<f64, _>(i)
            .map(ScriptValue::Float)
            .or_else(|_| row.try_get::<i64, _>(i).map(|v| ScriptValue::Float(v as f64)))
            .unwrap_or_else(|_| sqlite_fallback(row, i)),
        Coerce::DateTime => row
            .try_get::<chrono::NaiveDateTime, _>(i)
            .map(|v| ScriptValue::String(v.format(DATETIME_FORMAT).to_string()))
            .unwrap_or_else(|_| sqlite_fallback(row, i)),
        Coerce::Date => row
            .try_get::<chrono::NaiveDate, _>(i)
            .map(|v| ScriptValue::String(v.format(DATE_FORMAT).to_string()))
            .unwrap_or_else(|_| sqlite_fallback(row, i)),
        Coerce::Time => row
            .try_get::<chrono::NaiveTime, _>(i)
            .map(|v| ScriptValue::String(v.format(TIME_FORMAT).to_string()))
            .unwrap_or_else(|_| sqlite_fallback(row, i)),
        Coerce::Bytes => row
            .try_get::<Vec<u8>, _>(i)
            .map(ScriptValue::Bytes)
            .unwrap_or_else(|_| sqlite_fallback(row, i)),
        Coerce::Text => row
            .try_get::<String, _>(i)
            .map(ScriptValue::String)
            .unwrap_or_else(|_| sqlite_fallback(row, i)),
    }
}

/// Last-resort decode for a cell whose declared type lied about its
/// storage class. SQLite columns hold whatever was inserted.
fn sqlite_fallback(row: &SqliteRow, i: usize) -> ScriptValue {
    if let Ok(v) = row.try_get::<String, _>(i) {
        return ScriptValue::String(v);
    }
    if let Ok(v) = row.try_get::<i64, _>(i) {
        return ScriptValue::Int(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(i) {
        return ScriptValue::Float(v);
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(i) {
        return ScriptValue::Bytes(v);
    }
    ScriptValue::Null
}

fn decode_mysql_row(row: &MySqlRow) -> BridgeRow {
    let mut out = IndexMap::with_capacity(row.columns().len());
    for (i, column) in row.columns().iter().enumerate() {
        out.insert(
            column.name().to_string(),
            decode_mysql_value(row, i, column.type_info().name()),
        );
    }
    out
}

fn decode_mysql_value(row: &MySqlRow, i: usize, declared: &str) -> ScriptValue {
    if row.try_get_raw(i).map(|v| v.is_null()).unwrap_or(true) {
        return ScriptValue::Null;
    }
    match coercion_target(declared) {
        Coerce::Int => row
            .try_get::<i64, _>(i)
            .map(ScriptValue::Int)
            .or_else(|_| row.try_get::<u64, _>(i).map(|v| ScriptValue::Int(v as i64)))
            .unwrap_or_else(|_| mysql_fallback(row, i)),
        Coerce::Bool => row
            .try_get::<bool, _>(i)
            .map(ScriptValue::Bool)
            .or_else(|_| row.try_get::<i64, _>(i).map(|v| ScriptValue::Bool(v != 0)))
            .unwrap_or_else(|_| mysql_fallback(row, i)),
        // DECIMAL arrives as text on the wire; parse it into a float.
        Coerce::Float => row
            .try_get::<f64, _>(i)
            .map(ScriptValue::Float)
            .or_else(|_| {
                row.try_get::<String, _>(i).map(|v| {
                    v.parse::<f64>()
                        .map(ScriptValue::Float)
                        .unwrap_or(ScriptValue::String(v))
                })
            })
            .unwrap_or_else(|_| mysql_fallback(row, i)),
        Coerce::DateTime => row
            .try_get::<chrono::NaiveDateTime, _>(i)
            .map(|v| ScriptValue::String(v.format(DATETIME_FORMAT).to_string()))
            .or_else(|_| {
                row.try_get::<chrono::DateTime<chrono::Utc>, _>(i).map(|v| {
                    ScriptValue::String(v.naive_utc().format(DATETIME_FORMAT).to_string())
                })
            })
            .unwrap_or_else(|_| mysql_fallback(row, i)),
        Coerce::Date => row
            .try_get::<chrono::NaiveDate, _>(i)
            .map(|v| ScriptValue::String(v.format(DATE_FORMAT).to_string()))
            .unwrap_or_else(|_| mysql_fallback(row, i)),
        Coerce::Time => row
            .try_get::<chrono::NaiveTime, _>(i)
            .map(|v| ScriptValue::String(v.format(TIME_FORMAT).to_string()))
            .unwrap_or_else(|_| mysql_fallback(row, i)),
        Coerce::Bytes => row
            .try_get::<Vec<u8>, _>(i)
            .map(ScriptValue::Bytes)
            .unwrap_or_else(|_| mysql_fallback(row, i)),
        Coerce::Text => row
            .try_get::<String, _>(i)
            .map(ScriptValue::String)
            .unwrap_or_else(|_| mysql_fallback(row, i)),
    }
}

fn mysql_fallback(row: &MySqlRow, i: usize) -> ScriptValue {
    if let Ok(v) = row.try_get::<String, _>(i) {
        return ScriptValue::String(v);
    }
    if let Ok(v) = row.try_get::<i64, _>(i) {
        return ScriptValue::Int(v);
    }
    if let Ok(v) = row.try_get::<u64, _>(i) {
        return ScriptValue::Int(v as i64);
    }
    if let Ok(v) = row.try_get::<f64, _>(i) {
        return ScriptValue::Float(v);
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(i) {
        return ScriptValue::Bytes(v);
    }
    ScriptValue::Null
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
