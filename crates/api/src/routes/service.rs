use axum::routing::any;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Mount the controller dispatch surface.
///
/// Controllers declare their own accepted method, so the route takes
/// any method and the handler enforces the declaration.
pub fn router() -> Router<AppState> {
    Router::new().route("/service/{*path}", any(handlers::service::dispatch))
}
