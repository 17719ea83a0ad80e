//! Stored static content for the `/resource/{*path}` surface.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use plinth_core::error::CoreError;
use plinth_db::repositories::SourceRepo;

use crate::error::AppResult;
use crate::state::AppState;

/// GET /resource/{*path}
///
/// Serve the active resource whose URL matches the path. The stored
/// `lang` tag picks the content type.
pub async fn serve(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> AppResult<Response> {
    let url = format!("/{path}");
    let source = SourceRepo::find_active_resource_by_url(&state.db, &url)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "resource",
            name: url.clone(),
        })?;

    Ok((
        [(header::CONTENT_TYPE, content_type(&source.lang))],
        source.content,
    )
        .into_response())
}

/// Map a stored language tag to the served content type.
fn content_type(lang: &str) -> &'static str {
    match lang {
        "javascript" => "text/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "html" => "text/html; charset=utf-8",
        "json" => "application/json",
        _ => "text/plain; charset=utf-8",
    }
}
