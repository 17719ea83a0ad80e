//! Pool admission and run supervision:
//! - Fail-fast vs blocking admission
//! - Lease release on drop, including panic unwinds
//! - Deadline and client-cancel interruption through the completion gate
//! - Worker state isolation between leases

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use plinth_core::error::CoreError;
use plinth_core::value::ScriptValue;
use plinth_db::models::source::Source;
use plinth_db::repositories::SourceRepo;
use plinth_runtime::cache::ProcessCache;
use plinth_runtime::dispatch::{self, CANCEL_REASON, TIMEOUT_REASON};
use plinth_runtime::engine::EngineServices;
use plinth_runtime::pipe::PipeRegistry;
use plinth_runtime::pool::WorkerPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn workers(pool: &SqlitePool, size: usize) -> WorkerPool {
    let services = EngineServices {
        db: pool.clone(),
        cache: Arc::new(ProcessCache::new()),
        pipes: Arc::new(PipeRegistry::new()),
        rt: tokio::runtime::Handle::current(),
    };
    WorkerPool::new(size, services)
}

async fn seed(pool: &SqlitePool, name: &str, content: &str) {
    let source = Source {
        id: 0,
        name: name.to_string(),
        kind: "controller".to_string(),
        lang: String::new(),
        content: content.to_string(),
        compiled: String::new(),
        active: true,
        method: String::new(),
        url: String::new(),
        cron: String::new(),
        tag: String::new(),
        last_modified_date: chrono::Utc::now(),
        status: String::new(),
    };
    SourceRepo::create(pool, &source).await.unwrap();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn try_acquire_fails_fast_when_exhausted(pool: SqlitePool) {
    let workers = workers(&pool, 1);
    assert_eq!(workers.available(), 1);

    let lease = workers.try_acquire().unwrap();
    assert_eq!(workers.available(), 0);
    assert_matches!(workers.try_acquire(), Err(CoreError::PoolExhausted));

    drop(lease);
    assert_eq!(workers.available(), 1);
    workers.try_acquire().unwrap();
}

#[sqlx::test(migrations = "../db/migrations")]
async fn acquire_waits_for_a_free_worker(pool: SqlitePool) {
    let workers = workers(&pool, 1);
    let lease = workers.acquire().await;

    let waiter = tokio::spawn({
        let workers = workers.clone();
        async move {
            let _lease = workers.acquire().await;
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    drop(lease);
    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter should get the released worker")
        .unwrap();
}

#[sqlx::test(migrations = "../db/migrations")]
async fn leases_release_when_a_task_panics(pool: SqlitePool) {
    let workers = workers(&pool, 1);

    let task = tokio::spawn({
        let workers = workers.clone();
        async move {
            let _lease = workers.acquire().await;
            panic!("holder went down");
        }
    });
    assert!(task.await.is_err());

    // The unwind dropped the lease, so the worker is back.
    assert_eq!(workers.available(), 1);
    workers.try_acquire().unwrap();
}

#[sqlx::test(migrations = "../db/migrations")]
async fn deadline_interrupts_a_stuck_run(pool: SqlitePool) {
    let workers = workers(&pool, 1);
    seed(&pool, "stall", "loop\n  spin 500\nend").await;

    let lease = workers.acquire().await;
    let outcome = dispatch::execute(
        lease,
        "./controller/stall",
        ScriptValue::Null,
        Duration::from_millis(100),
        CancellationToken::new(),
    )
    .await;
    assert_matches!(
        outcome.result,
        Err(CoreError::Execution { message, .. }) if message == TIMEOUT_REASON
    );
    assert_eq!(workers.available(), 1);

    // The interrupt was consumed by the aborted run; the recycled worker
    // starts clean.
    seed(&pool, "quick", "return 7").await;
    let lease = workers.acquire().await;
    let outcome = lease.run("./controller/quick", ScriptValue::Null).await;
    assert_eq!(outcome.result.unwrap(), ScriptValue::Int(7));
}

#[sqlx::test(migrations = "../db/migrations")]
async fn client_cancel_interrupts_a_stuck_run(pool: SqlitePool) {
    let workers = workers(&pool, 1);
    seed(&pool, "nap", "sleep 30000").await;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        }
    });

    let lease = workers.acquire().await;
    let outcome = dispatch::execute(
        lease,
        "./controller/nap",
        ScriptValue::Null,
        Duration::from_secs(60),
        cancel,
    )
    .await;
    assert_matches!(
        outcome.result,
        Err(CoreError::Execution { message, .. }) if message == CANCEL_REASON
    );
    assert_eq!(workers.available(), 1);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn completed_runs_ignore_late_cancellation(pool: SqlitePool) {
    let workers = workers(&pool, 1);
    seed(&pool, "quick", "return 7").await;

    let cancel = CancellationToken::new();
    let lease = workers.acquire().await;
    let outcome = dispatch::execute(
        lease,
        "./controller/quick",
        ScriptValue::Null,
        Duration::from_secs(5),
        cancel.clone(),
    )
    .await;
    assert_eq!(outcome.result.unwrap(), ScriptValue::Int(7));

    // Cancelling after completion must not poison the worker.
    cancel.cancel();
    let lease = workers.acquire().await;
    let outcome = lease.run("./controller/quick", ScriptValue::Null).await;
    assert_eq!(outcome.result.unwrap(), ScriptValue::Int(7));
}

#[sqlx::test(migrations = "../db/migrations")]
async fn worker_state_resets_between_leases(pool: SqlitePool) {
    let workers = workers(&pool, 1);
    let source = Source {
        id: 0,
        name: "util".to_string(),
        kind: "module".to_string(),
        lang: String::new(),
        content: "fn shout x\n  let out = concat x \"!\"\n  return out\nend".to_string(),
        compiled: String::new(),
        active: true,
        method: String::new(),
        url: String::new(),
        cron: String::new(),
        tag: String::new(),
        last_modified_date: chrono::Utc::now(),
        status: String::new(),
    };
    SourceRepo::create(&pool, &source).await.unwrap();
    seed(
        &pool,
        "uses",
        "require ./util\nlet x = call util.shout \"hey\"\nreturn x",
    )
    .await;

    let lease = workers.acquire().await;
    let outcome = lease.run("./controller/uses", ScriptValue::Null).await;
    assert_eq!(
        outcome.result.unwrap(),
        ScriptValue::String("hey!".to_string())
    );
    drop(lease);

    // The next lease gets a worker with no modules loaded.
    let lease = workers.acquire().await;
    let outcome = lease
        .eval("let x = call util.shout \"hi\"\nreturn x")
        .await;
    assert_matches!(
        outcome.result,
        Err(CoreError::Execution { message, .. }) if message == "module not required: util"
    );
}
