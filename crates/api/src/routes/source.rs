use axum::routing::any;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Mount the admin surface.
///
/// A single `any` route: the handler switches on the method itself so
/// the non-standard `EVAL` verb can share the path with the CRUD verbs.
pub fn router() -> Router<AppState> {
    Router::new().route("/source", any(handlers::source::dispatch))
}
