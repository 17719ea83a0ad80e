//! Admin CRUD + EVAL for the `/source` surface.
//!
//! One entry point switches on the request method, since `EVAL` is not
//! a method axum's routing macros know about. Every branch returns the
//! standard envelope; mutation branches additionally apply the process
//! cache invalidation the edited kind requires.

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use plinth_core::cron::CronSchedule;
use plinth_core::error::CoreError;
use plinth_core::source::{validate_name, SourceKind};
use plinth_core::value::ScriptValue;
use plinth_db::models::source::{Source, UpdateSource};
use plinth_db::repositories::SourceRepo;
use plinth_runtime::cache::module_key;
use plinth_runtime::dispatch::evaluate;
use plinth_runtime::engine::LogEntry;

use crate::error::{AppError, AppResult};
use crate::middleware::digest::AdminGuard;
use crate::query::{SourceCreateParams, SourceDeleteParams, SourceListParams};
use crate::response::success;
use crate::state::AppState;

/// ANY /source
///
/// | Method   | Action                                    |
/// |----------|-------------------------------------------|
/// | `GET`    | paginated listing / bulk export           |
/// | `POST`   | create, or bulk import with `?bulk`       |
/// | `PUT`    | partial update + cache invalidation       |
/// | `DELETE` | remove by `?name=&type=`                  |
/// | `EVAL`   | run the body as an ad-hoc script          |
pub async fn dispatch(
    _guard: AdminGuard,
    State(state): State<AppState>,
    req: Request,
) -> AppResult<Response> {
    match req.method().as_str() {
        "GET" => {
            let params = query_params::<SourceListParams>(&req)?;
            list(&state, params).await
        }
        "POST" => {
            let bulk = query_params::<SourceCreateParams>(&req)?.bulk.is_some();
            let body = read_body(req).await?;
            if bulk {
                bulk_import(&state, &body).await
            } else {
                create(&state, &body).await
            }
        }
        "PUT" => {
            let body = read_body(req).await?;
            update(&state, &body).await
        }
        "DELETE" => {
            let params = query_params::<SourceDeleteParams>(&req)?;
            remove(&state, params).await
        }
        "EVAL" => {
            let body = read_body(req).await?;
            eval(&state, body).await
        }
        _ => Err(AppError::Core(CoreError::MethodNotAllowed)),
    }
}

fn query_params<T: serde::de::DeserializeOwned>(req: &Request) -> AppResult<T> {
    let Query(params) =
        Query::try_from_uri(req.uri()).map_err(|err| AppError::BadRequest(err.to_string()))?;
    Ok(params)
}

async fn read_body(req: Request) -> AppResult<Bytes> {
    axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|err| AppError::BadRequest(format!("failed to read body: {err}")))
}

fn validation(message: &str) -> AppError {
    AppError::Core(CoreError::Validation(message.to_string()))
}

// ---------------------------------------------------------------------------
// Listing and export
// ---------------------------------------------------------------------------

/// Listing page. Daemon rows carry the derived `status` field.
#[derive(Serialize)]
struct SourcePage {
    total: i64,
    sources: Vec<Source>,
}

async fn list(state: &AppState, params: SourceListParams) -> AppResult<Response> {
    let bulk = params.is_bulk();
    let filter = params.into_filter();

    let total = SourceRepo::count(&state.db, &filter).await?;
    let mut sources = SourceRepo::list(&state.db, &filter).await?;
    for source in &mut sources {
        if source.kind == "daemon" {
            source.status = state.cache.daemon_running(&source.name).to_string();
        }
    }

    if bulk {
        let payload = serde_json::to_vec(&sources)
            .map_err(|err| AppError::Core(CoreError::Internal(err.to_string())))?;
        let filename = format!("sources-{}.json", chrono::Utc::now().timestamp_millis());
        let headers = [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ];
        return Ok((headers, payload).into_response());
    }

    Ok(success(SourcePage { total, sources }))
}

// ---------------------------------------------------------------------------
// Create / bulk import
// ---------------------------------------------------------------------------

async fn create(state: &AppState, body: &[u8]) -> AppResult<Response> {
    let source: Source =
        serde_json::from_slice(body).map_err(|err| AppError::BadRequest(err.to_string()))?;

    let kind: SourceKind = source.kind.parse()?;
    validate_name(kind, &source.name)?;
    if source.active {
        return Err(validation("active must be false"));
    }
    // Creation probes all rows of the type, so even a parked duplicate
    // URL is rejected.
    if kind.is_routable()
        && SourceRepo::url_taken(&state.db, &source.kind, &source.url, &source.name, false).await?
    {
        return Err(validation("url already existed"));
    }
    if kind == SourceKind::Crontab {
        CronSchedule::parse(&source.cron)?;
    }
    if SourceRepo::exists(&state.db, &source.name, &source.kind).await? {
        return Err(validation("source already existed"));
    }

    SourceRepo::create(&state.db, &source).await?;
    Ok(success(Value::Null))
}

async fn bulk_import(state: &AppState, body: &[u8]) -> AppResult<Response> {
    let sources: Vec<Source> =
        serde_json::from_slice(body).map_err(|err| AppError::BadRequest(err.to_string()))?;
    if sources.is_empty() {
        return Err(validation("nothing added or modified"));
    }

    let written = SourceRepo::bulk_upsert(&state.db, &sources).await?;

    // Imported rows may invalidate anything, so rebuild wholesale and
    // re-evaluate every daemon and crontab.
    let routes = state.cache.rebuild_routes(&state.db).await?;
    state.cache.clear_controllers();
    state.cache.clear_modules();
    let daemons = state.scheduler.start_daemons(None).await?;
    let crontabs = state.scheduler.start_crontabs(None).await?;
    tracing::info!(written, routes, daemons, crontabs, "bulk import applied");

    Ok(success(Value::Null))
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

async fn update(state: &AppState, body: &[u8]) -> AppResult<Response> {
    let record: serde_json::Map<String, Value> =
        serde_json::from_slice(body).map_err(|err| AppError::BadRequest(err.to_string()))?;

    let name = record
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| validation("name is required"))?
        .to_string();
    let kind = record
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| validation("type is required"))?
        .to_string();

    // Updates tolerate an inactive duplicate URL; only active rows count.
    if let Some(url) = record.get("url").and_then(Value::as_str) {
        if (kind == "controller" || kind == "resource")
            && SourceRepo::url_taken(&state.db, &kind, url, &name, true).await?
        {
            return Err(validation("url already existed"));
        }
    }
    if let Some(cron) = record.get("cron").and_then(Value::as_str) {
        if kind == "crontab" {
            CronSchedule::parse(cron)?;
        }
    }

    let changes = UpdateSource {
        content: string_field(&record, "content"),
        compiled: string_field(&record, "compiled"),
        active: record.get("active").and_then(Value::as_bool),
        method: string_field(&record, "method"),
        url: string_field(&record, "url"),
        cron: string_field(&record, "cron"),
        tag: string_field(&record, "tag"),
    };
    let updated = SourceRepo::update(&state.db, &name, &kind, &changes).await?;
    if updated == 0 {
        return Err(validation("source does not existed"));
    }

    let source = SourceRepo::find_by_name_and_kind(&state.db, &name, &kind)
        .await?
        .ok_or_else(|| validation("source does not existed"))?;
    let desired = record.get("status").and_then(Value::as_str);
    apply_invalidation(state, &source, desired).await?;

    Ok(success(Value::Null))
}

fn string_field(record: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    record.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Apply the per-kind cache invalidation after a successful edit, using
/// the source's new state. `desired` is the `status` field of a daemon
/// edit: `"true"` asks for a start, `"false"` for a stop.
async fn apply_invalidation(
    state: &AppState,
    source: &Source,
    desired: Option<&str>,
) -> AppResult<()> {
    state
        .cache
        .remove_module(&module_key(&source.kind, &source.name));

    match source.kind.as_str() {
        "controller" => {
            if source.active {
                state.cache.set_route(&source.name, &source.url)?;
            } else {
                state.cache.remove_route(&source.name);
            }
            state.cache.remove_controller_meta(&source.name);
        }
        "crontab" => {
            let scheduled = state.cache.crontab_scheduled(&source.name);
            if source.active && !scheduled {
                state.scheduler.start_crontabs(Some(&source.name)).await?;
            } else if !source.active && scheduled {
                state.scheduler.unschedule_crontab(&source.name);
            }
        }
        "daemon" => {
            // Stop/start requests are only honored for active daemons.
            if source.active {
                let running = state.cache.daemon_running(&source.name);
                match desired {
                    Some("true") if !running => {
                        state.scheduler.start_daemons(Some(&source.name)).await?;
                    }
                    Some("false") if running => {
                        state.scheduler.stop_daemon(&source.name);
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

async fn remove(state: &AppState, params: SourceDeleteParams) -> AppResult<Response> {
    let name = params
        .name
        .filter(|s| !s.is_empty())
        .ok_or_else(|| validation("name is required"))?;
    let kind = params
        .kind
        .filter(|s| !s.is_empty())
        .ok_or_else(|| validation("type is required"))?;

    let deleted = SourceRepo::delete(&state.db, &name, &kind).await?;
    if deleted == 0 {
        return Err(validation("source does not existed"));
    }

    if kind == "controller" {
        state.cache.remove_route(&name);
        state.cache.remove_controller_meta(&name);
    }
    state.cache.remove_module(&module_key(&kind, &name));

    Ok(success(Value::Null))
}

// ---------------------------------------------------------------------------
// EVAL
// ---------------------------------------------------------------------------

async fn eval(state: &AppState, body: Bytes) -> AppResult<Response> {
    let script = String::from_utf8(body.to_vec())
        .map_err(|_| AppError::BadRequest("script body must be valid UTF-8".into()))?;

    // Ad-hoc runs never queue behind requests; no free worker is a 503.
    let worker = state.workers.try_acquire()?;
    let timeout = state.config.run_timeout();
    let cancel = CancellationToken::new();
    let _disconnect = cancel.clone().drop_guard();

    let task = tokio::spawn(async move { evaluate(worker, &script, timeout, cancel).await });
    let outcome = task.await.map_err(|err| {
        AppError::Core(CoreError::Internal(format!("eval run panicked: {err}")))
    })?;

    outcome.result?;
    let logs: Vec<ScriptValue> = outcome.logs.iter().map(LogEntry::to_value).collect();
    Ok(success(serde_json::json!({ "logs": logs })))
}
