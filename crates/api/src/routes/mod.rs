pub mod health;
pub mod resource;
pub mod service;
pub mod source;

use axum::Router;

use crate::state::AppState;

/// Build the public route tree.
///
/// Route hierarchy:
///
/// ```text
/// /health                    service + database health
/// /service/{*path}           controller dispatch (any method)
/// /source                    admin CRUD + EVAL (digest-guarded)
/// /resource/{*path}          stored static content
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(service::router())
        .merge(source::router())
        .merge(resource::router())
}
