use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Mount the static content surface.
pub fn router() -> Router<AppState> {
    Router::new().route("/resource/{*path}", get(handlers::resource::serve))
}
