//! Shared helpers for API integration tests.
//!
//! State construction goes through [`build_app_router`] so these tests
//! exercise the same middleware stack as the production binary. Every
//! request is driven with `tower::ServiceExt::oneshot` against an
//! in-memory router; no sockets are opened.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use sqlx::SqlitePool;
use tower::ServiceExt;

use plinth_api::config::{AdminCredentials, ServerConfig};
use plinth_api::router::build_app_router;
use plinth_api::state::AppState;
use plinth_db::models::source::Source;
use plinth_db::repositories::SourceRepo;
use plinth_runtime::cache::ProcessCache;
use plinth_runtime::engine::EngineServices;
use plinth_runtime::pipe::PipeRegistry;
use plinth_runtime::pool::WorkerPool;
use plinth_runtime::scheduler::Scheduler;

pub fn test_config(admin: Option<AdminCredentials>) -> ServerConfig {
    ServerConfig {
        bind: "127.0.0.1:0".to_string(),
        database_url: String::new(),
        pool_size: 2,
        run_timeout_secs: 5,
        request_timeout_secs: 30,
        admin,
    }
}

/// Full application state over the given pool: two workers, a fresh
/// process cache, and an idle scheduler.
pub fn build_state(pool: &SqlitePool, config: ServerConfig) -> AppState {
    let cache = Arc::new(ProcessCache::new());
    let pipes = Arc::new(PipeRegistry::new());
    let services = EngineServices {
        db: pool.clone(),
        cache: cache.clone(),
        pipes,
        rt: tokio::runtime::Handle::current(),
    };
    let workers = WorkerPool::new(config.pool_size, services);
    let scheduler = Arc::new(Scheduler::new(
        workers.clone(),
        cache.clone(),
        pool.clone(),
        config.run_timeout(),
    ));
    AppState {
        db: pool.clone(),
        config: Arc::new(config),
        workers,
        cache,
        scheduler,
    }
}

pub fn build_app(state: &AppState) -> Router {
    build_app_router(state.clone(), &state.config)
}

/// State plus router in one step, without admin auth.
pub fn test_app(pool: &SqlitePool) -> (AppState, Router) {
    let state = build_state(pool, test_config(None));
    let app = build_app(&state);
    (state, app)
}

// ---------------------------------------------------------------------------
// Seeding
// ---------------------------------------------------------------------------

/// A source row with only the common columns filled in; tests set the
/// kind-specific ones (`url`, `method`, `cron`, `lang`) before insert.
pub fn source_record(name: &str, kind: &str, content: &str) -> Source {
    Source {
        id: 0,
        name: name.to_string(),
        kind: kind.to_string(),
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
    }
}

pub async fn seed(pool: &SqlitePool, source: &Source) {
    SourceRepo::create(pool, source).await.unwrap();
}

/// Seed an active controller and make it routable.
pub async fn seed_controller(state: &AppState, name: &str, url: &str, content: &str) {
    let mut source = source_record(name, "controller", content);
    source.url = url.to_string();
    seed(&state.db, &source).await;
    state.cache.rebuild_routes(&state.db).await.unwrap();
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn request_json(
    app: &Router,
    method: Method,
    uri: &str,
    body: serde_json::Value,
) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

/// Send a raw-body request with an arbitrary verb (`EVAL` included).
pub async fn request_raw(app: &Router, method: &str, uri: &str, body: &str) -> Response {
    let request = Request::builder()
        .method(Method::from_bytes(method.as_bytes()).unwrap())
        .uri(uri)
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
