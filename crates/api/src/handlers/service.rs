//! Controller dispatch for the `/service/{*path}` surface.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use plinth_core::error::CoreError;
use plinth_core::value::ScriptValue;
use plinth_db::repositories::SourceRepo;
use plinth_runtime::cache::{module_key, ControllerMeta};
use plinth_runtime::dispatch::execute;

use crate::error::{AppError, AppResult};
use crate::response::script_output;
use crate::state::AppState;

/// ANY /service/{*path}
///
/// Resolves the path against the route table (404 on no match), checks
/// the controller's declared method (405 on mismatch), then runs the
/// controller on a pooled worker with the request context as its
/// argument. The spawned run keeps the worker until the script stops;
/// a client disconnect only delivers a cancellation interrupt.
pub async fn dispatch(
    State(state): State<AppState>,
    Path(path): Path<String>,
    method: Method,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let lookup = format!("/{path}");
    let route = state
        .cache
        .route_snapshot()
        .match_path(&lookup)
        .ok_or(CoreError::NotFound {
            entity: "route",
            name: lookup.clone(),
        })?;

    let meta = controller_meta(&state, &route.name).await?;
    if !meta.method.is_empty() && meta.method != method.as_str() {
        return Err(AppError::Core(CoreError::MethodNotAllowed));
    }

    let args = request_context(&method, &lookup, query, &route.bindings, &headers, &body);

    let worker = state.workers.acquire().await;
    let timeout = state.config.run_timeout();
    let cancel = CancellationToken::new();
    // Dropping the handler (client gone) fires the token; the spawned
    // run itself is never aborted mid-script.
    let _disconnect = cancel.clone().drop_guard();

    let entry = module_key("controller", &route.name);
    let task = tokio::spawn(async move { execute(worker, &entry, args, timeout, cancel).await });

    let outcome = task.await.map_err(|err| {
        AppError::Core(CoreError::Internal(format!("controller run panicked: {err}")))
    })?;
    let value = outcome.result?;
    Ok(script_output(value))
}

/// Dispatch metadata for a controller, loaded through the process cache.
async fn controller_meta(state: &AppState, name: &str) -> AppResult<ControllerMeta> {
    if let Some(meta) = state.cache.controller_meta(name) {
        return Ok(meta);
    }
    let source = SourceRepo::find_active_by_name_and_kind(&state.db, name, "controller")
        .await?
        .ok_or(CoreError::NotFound {
            entity: "controller",
            name: name.to_string(),
        })?;
    let meta = ControllerMeta {
        name: source.name,
        method: source.method,
    };
    state.cache.store_controller_meta(meta.clone());
    Ok(meta)
}

/// Assemble the `args` object a controller's `main` receives: request
/// method, path, query params (name to value list), captured path
/// variables, headers, and the body (parsed as JSON when it is JSON,
/// kept as text otherwise).
fn request_context(
    method: &Method,
    path: &str,
    query: Vec<(String, String)>,
    vars: &IndexMap<String, String>,
    headers: &HeaderMap,
    body: &[u8],
) -> ScriptValue {
    let mut grouped: IndexMap<String, Vec<ScriptValue>> = IndexMap::new();
    for (key, value) in query {
        grouped
            .entry(key)
            .or_default()
            .push(ScriptValue::String(value));
    }
    let params = ScriptValue::Object(
        grouped
            .into_iter()
            .map(|(key, values)| (key, ScriptValue::Array(values)))
            .collect(),
    );

    let vars_value = ScriptValue::Object(
        vars.iter()
            .map(|(key, value)| (key.clone(), ScriptValue::String(value.clone())))
            .collect(),
    );

    let mut header_map: IndexMap<String, ScriptValue> = IndexMap::new();
    for (name, value) in headers {
        if let Ok(text) = value.to_str() {
            header_map
                .entry(name.as_str().to_string())
                .or_insert_with(|| ScriptValue::String(text.to_string()));
        }
    }

    let body_value = if body.is_empty() {
        ScriptValue::Null
    } else {
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(json) => ScriptValue::from_json(json),
            Err(_) => ScriptValue::String(String::from_utf8_lossy(body).into_owned()),
        }
    };

    let mut ctx = IndexMap::new();
    ctx.insert(
        "method".to_string(),
        ScriptValue::String(method.to_string()),
    );
    ctx.insert("path".to_string(), ScriptValue::String(path.to_string()));
    ctx.insert("params".to_string(), params);
    ctx.insert("vars".to_string(), vars_value);
    ctx.insert("headers".to_string(), ScriptValue::Object(header_map));
    ctx.insert("body".to_string(), body_value);
    ScriptValue::Object(ctx)
}
