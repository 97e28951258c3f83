//! HTTP Surface (§4.11, §6): a thin façade translating the task engine's
//! verbs into the fixed REST dialect. Handlers are free functions that
//! consult the engine as a value — no Controller base class to inherit
//! from (§9).

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use dispatch_core::error::{DispatchError, ErrorFormat};
use dispatch_core::revision::Revision;
use dispatch_core::wiki::WikiDescriptor;
use dispatch_expander::RevisionExpander;
use dispatch_registry::LookupKind;
use dispatch_replica::ReplicaKind;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::state::AppState;

const GET_REVISION_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct ErrorFormatQuery {
    errorformat: Option<String>,
}

fn error_format(q: &ErrorFormatQuery) -> ErrorFormat {
    q.errorformat
        .as_deref()
        .and_then(|s| ErrorFormat::from_str(s).ok())
        .unwrap_or_default()
}

fn error_format_opt(errorformat: &Option<String>) -> ErrorFormat {
    errorformat
        .as_deref()
        .and_then(|s| ErrorFormat::from_str(s).ok())
        .unwrap_or_default()
}

pub struct ApiError {
    status: StatusCode,
    body: serde_json::Value,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn api_error(err: DispatchError, format: ErrorFormat) -> ApiError {
    ApiError {
        status: StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        body: err.to_envelope(format),
    }
}

async fn resolve_wiki_or_error(
    state: &AppState,
    wiki: &str,
    format: ErrorFormat,
    status_override: Option<StatusCode>,
) -> Result<Arc<dispatch_core::wiki::WikiDescriptor>, ApiError> {
    match state.registry.get(wiki, LookupKind::DbName).await {
        Some(desc) if !desc.flags.nonglobal => Ok(desc),
        _ => {
            let err = DispatchError::UnsupportedWiki(wiki.to_string());
            let mut api_err = api_error(err, format);
            if let Some(status) = status_override {
                api_err.status = status;
            }
            Err(api_err)
        }
    }
}

/// Resolves ids against the Revision Store first; anything not cached goes
/// to the Revision Expander, with results written back into the store so
/// later requests for the same id are served from the cache (§4.7).
async fn expand_revisions(
    state: &AppState,
    desc: &WikiDescriptor,
    ids: &[u64],
    format: ErrorFormat,
) -> Result<HashMap<u64, Revision>, ApiError> {
    let mut resolved = HashMap::with_capacity(ids.len());
    let mut misses = Vec::new();
    for &id in ids {
        match state.revstore.get(id) {
            Some(cached) => {
                resolved.insert(id, (*cached).clone());
            }
            None => misses.push(id),
        }
    }

    if !misses.is_empty() {
        let client = state
            .wiki_clients
            .get_or_connect(&desc.dbname, &desc.base_url, &state.oauth_token)
            .await
            .map_err(|_| api_error(DispatchError::UnsupportedWiki(desc.dbname.clone()), format))?;
        let expander = RevisionExpander::new(client);
        let fetched = dispatch_expander::with_timeout(expander.request(&misses))
            .await
            .map_err(|_| api_error(DispatchError::ExpanderTimeout { pending: misses.clone() }, format))?;
        for (id, revision) in fetched {
            state.revstore.set(id, revision.clone());
            resolved.insert(id, revision);
        }
    }
    Ok(resolved)
}

// --- GET/POST /v1/revisions/{wiki} --------------------------------------

#[derive(Debug, Deserialize)]
pub struct GetRevisionsQuery {
    errorformat: Option<String>,
    revisions: Option<String>,
}

fn parse_pipe_separated(raw: &str, format: ErrorFormat) -> Result<Vec<u64>, ApiError> {
    if raw.trim().is_empty() {
        return Err(api_error(DispatchError::RevisionsMissing, format));
    }
    raw.split('|')
        .map(|s| {
            s.trim()
                .parse::<u64>()
                .map_err(|_| api_error(DispatchError::BadInteger(s.to_string()), format))
        })
        .collect()
}

pub async fn get_revisions(
    State(state): State<AppState>,
    Path(wiki): Path<String>,
    Query(query): Query<GetRevisionsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let format = error_format_opt(&query.errorformat);
    let desc = resolve_wiki_or_error(&state, &wiki, format, None).await?;

    let raw = query.revisions.unwrap_or_default();
    let ids = parse_pipe_separated(&raw, format)?;
    if ids.len() > GET_REVISION_LIMIT {
        return Err(api_error(
            DispatchError::MethodLimited {
                limit: GET_REVISION_LIMIT,
                got: ids.len(),
            },
            format,
        ));
    }

    let resolved = expand_revisions(&state, &desc, &ids, format).await?;

    Ok(Json(serde_json::json!({
        "version": 1,
        "revisions": resolved,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RevisionsBody {
    Single(u64),
    Many(Vec<u64>),
    PipeDelimited(String),
}

#[derive(Debug, Deserialize)]
pub struct PostRevisionsBody {
    revisions: RevisionsBody,
}

pub async fn post_revisions(
    State(state): State<AppState>,
    Path(wiki): Path<String>,
    Query(errorformat): Query<ErrorFormatQuery>,
    Json(body): Json<PostRevisionsBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let format = error_format(&errorformat);
    let desc = resolve_wiki_or_error(&state, &wiki, format, None).await?;

    let ids = match body.revisions {
        RevisionsBody::Single(id) => vec![id],
        RevisionsBody::Many(ids) => ids,
        RevisionsBody::PipeDelimited(raw) => parse_pipe_separated(&raw, format)?,
    };
    if ids.is_empty() {
        return Err(api_error(DispatchError::RevisionsMissing, format));
    }

    let resolved = expand_revisions(&state, &desc, &ids, format).await?;

    Ok(Json(serde_json::json!({
        "version": 1,
        "revisions": resolved,
    })))
}

// --- Task-backed endpoints (deleted-revisions, largest-edits, search-talk)

#[derive(Debug, serde::Serialize)]
struct TaskAccepted {
    id: String,
    progress: f64,
    finished: bool,
}

fn task_accepted_response(id: dispatch_core::task::TaskId, location_root: &str) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!("{location_root}/{id}/progress")) {
        headers.insert(axum::http::header::LOCATION, value);
    }
    (
        StatusCode::ACCEPTED,
        headers,
        Json(TaskAccepted {
            id: id.to_string(),
            progress: 0.0,
            finished: false,
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct DeletedRevisionsBody {
    user: String,
    wiki: String,
}

pub async fn post_deleted_revisions(
    State(state): State<AppState>,
    Query(errorformat): Query<ErrorFormatQuery>,
    Json(body): Json<DeletedRevisionsBody>,
) -> Result<Response, ApiError> {
    let format = error_format(&errorformat);
    let desc = resolve_wiki_or_error(&state, &body.wiki, format, Some(StatusCode::BAD_REQUEST)).await?;

    let id = state.deleted_revisions_tasks.run_task(None, move |handle| async move {
        let dbname = desc.dbname.clone();
        let outcome = async {
            let pool = dispatch_replica::connect(&dbname, ReplicaKind::Analytics)
                .await
                .map_err(|e| e.to_string())?;
            handle.set_progress(0.25);

            let actor_id = dispatch_reconstruct::lookup_actor_id(&pool, &body.user)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("no actor named `{}` could be found on this wiki", body.user))?;
            handle.set_progress(0.5);

            let revisions = dispatch_reconstruct::reconstruct_deleted_revisions_for_actor(&pool, actor_id)
                .await
                .map_err(|e| e.to_string())?;
            handle.set_progress(0.9);
            Ok::<_, String>(revisions)
        }
        .await;

        match outcome {
            Ok(revisions) => handle.finish_success(serde_json::json!({ "revisions": revisions })),
            Err(message) => handle.finish_error(message),
        }
    });

    Ok(task_accepted_response(id, "/v1/user/deleted-revisions"))
}

pub async fn get_task_progress(
    engine: &dispatch_tasks::TaskEngine,
    id_str: &str,
    location_root: &str,
    format: ErrorFormat,
) -> Result<Response, ApiError> {
    let id = dispatch_core::task::TaskId::from_str(id_str)
        .map_err(|_| api_error(DispatchError::TaskMissing(id_str.to_string()), format))?;
    let view = engine
        .handle_progress_request(id)
        .map_err(|_| api_error(DispatchError::TaskMissing(id_str.to_string()), format))?;

    let mut headers = HeaderMap::new();
    if view.finished {
        if let Ok(value) = HeaderValue::from_str(&format!("{location_root}/{id}")) {
            headers.insert(axum::http::header::LOCATION, value);
        }
    }
    Ok((
        StatusCode::OK,
        headers,
        Json(serde_json::json!({
            "id": id.to_string(),
            "progress": view.progress,
            "finished": view.finished,
        })),
    )
        .into_response())
}

pub async fn get_task_result(
    engine: &dispatch_tasks::TaskEngine,
    id_str: &str,
    format: ErrorFormat,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = dispatch_core::task::TaskId::from_str(id_str)
        .map_err(|_| api_error(DispatchError::TaskMissing(id_str.to_string()), format))?;
    match engine.handle_result_request(id) {
        Ok(value) => Ok(Json(value)),
        Err(dispatch_tasks::ResultRequestError::NotFound) => {
            Err(api_error(DispatchError::TaskMissing(id_str.to_string()), format))
        }
        Err(dispatch_tasks::ResultRequestError::NotYetFinished) => {
            Err(api_error(DispatchError::TaskUnfinished(id_str.to_string()), format))
        }
        Err(dispatch_tasks::ResultRequestError::UncaughtError) => Err(api_error(
            DispatchError::TaskUncaughtGeneric("task worker raised".to_string()),
            format,
        )),
    }
}

pub async fn deleted_revisions_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(errorformat): Query<ErrorFormatQuery>,
) -> Result<Response, ApiError> {
    let format = error_format(&errorformat);
    get_task_progress(
        &state.deleted_revisions_tasks,
        &id,
        "/v1/user/deleted-revisions",
        format,
    )
    .await
}

pub async fn deleted_revisions_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(errorformat): Query<ErrorFormatQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let format = error_format(&errorformat);
    get_task_result(&state.deleted_revisions_tasks, &id, format).await
}

#[derive(Debug, Deserialize)]
pub struct LargestEditsBody {
    wiki: String,
    user: String,
    #[serde(default)]
    offset: Option<u64>,
    #[serde(default)]
    namespaces: Option<Vec<i32>>,
    #[serde(default, rename = "withReverts")]
    with_reverts: bool,
    #[serde(default, rename = "withoutTags")]
    without_tags: Option<Vec<String>>,
}

pub async fn post_largest_edits(
    State(state): State<AppState>,
    Query(errorformat): Query<ErrorFormatQuery>,
    Json(body): Json<LargestEditsBody>,
) -> Result<Response, ApiError> {
    let format = error_format(&errorformat);
    let desc = resolve_wiki_or_error(&state, &body.wiki, format, Some(StatusCode::BAD_REQUEST)).await?;

    let id = state.largest_edits_tasks.run_task(None, move |handle| async move {
        let dbname = desc.dbname.clone();
        let outcome = async {
            let pool = dispatch_replica::connect(&dbname, ReplicaKind::Analytics)
                .await
                .map_err(|e| e.to_string())?;
            handle.set_progress(0.25);

            let actor_id = dispatch_reconstruct::lookup_actor_id(&pool, &body.user)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("no actor named `{}` could be found on this wiki", body.user))?;
            handle.set_progress(0.5);

            let revisions = dispatch_reconstruct::rank_largest_edits_for_actor(
                &pool,
                actor_id,
                body.namespaces.as_deref(),
                body.with_reverts,
                body.without_tags.as_deref(),
                body.offset.unwrap_or(0),
            )
            .await
            .map_err(|e| e.to_string())?;
            handle.set_progress(0.9);
            Ok::<_, String>(revisions)
        }
        .await;

        match outcome {
            Ok(revisions) => handle.finish_success(serde_json::json!({ "revisions": revisions })),
            Err(message) => handle.finish_error(message),
        }
    });
    Ok(task_accepted_response(id, "/v1/user/largest-edits"))
}

pub async fn largest_edits_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(errorformat): Query<ErrorFormatQuery>,
) -> Result<Response, ApiError> {
    let format = error_format(&errorformat);
    get_task_progress(&state.largest_edits_tasks, &id, "/v1/user/largest-edits", format).await
}

pub async fn largest_edits_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(errorformat): Query<ErrorFormatQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let format = error_format(&errorformat);
    get_task_result(&state.largest_edits_tasks, &id, format).await
}

#[derive(Debug, Deserialize)]
pub struct SearchTalkFilter {
    #[serde(default)]
    exact: Option<String>,
    #[serde(default)]
    set: Option<Vec<String>>,
    #[serde(default)]
    regex: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchTalkBody {
    wiki: String,
    user: String,
    filter: SearchTalkFilter,
}

fn compile_filter(
    filter: &SearchTalkFilter,
    format: ErrorFormat,
) -> Result<dispatch_talkscan::FilterDescriptor, ApiError> {
    if let Some(exact) = &filter.exact {
        return Ok(dispatch_talkscan::FilterDescriptor::Exact(exact.clone()));
    }
    if let Some(set) = &filter.set {
        if set.is_empty() {
            return Err(api_error(
                DispatchError::InvalidFilter("filter set is empty".to_string()),
                format,
            ));
        }
        return Ok(dispatch_talkscan::FilterDescriptor::Set(set.clone()));
    }
    if let Some(pattern) = &filter.regex {
        let re = regex::Regex::new(pattern)
            .map_err(|e| api_error(DispatchError::InvalidFilter(e.to_string()), format))?;
        return Ok(dispatch_talkscan::FilterDescriptor::Regex(re));
    }
    Err(api_error(
        DispatchError::InvalidFilter("filter must be one of exact/set/regex".to_string()),
        format,
    ))
}

pub async fn post_search_talk(
    State(state): State<AppState>,
    Query(errorformat): Query<ErrorFormatQuery>,
    Json(body): Json<SearchTalkBody>,
) -> Result<Response, ApiError> {
    let format = error_format(&errorformat);
    let desc = resolve_wiki_or_error(&state, &body.wiki, format, Some(StatusCode::BAD_REQUEST)).await?;
    let filters = compile_filter(&body.filter, format)?.into_labeled();

    let job_state = state.clone();
    let id = state.search_talk_tasks.run_task(None, move |handle| async move {
        let outcome = run_search_talk_job(&job_state, &desc, &body.user, &filters, &handle).await;
        match outcome {
            Ok(events) => handle.finish_success(serde_json::json!({ "events": events })),
            Err(message) => handle.finish_error(message),
        }
    });
    Ok(task_accepted_response(id, "/v1/user/search-talk"))
}

async fn run_search_talk_job(
    state: &AppState,
    desc: &WikiDescriptor,
    user: &str,
    filters: &[dispatch_talkscan::LabeledFilter],
    handle: &dispatch_tasks::TaskHandle,
) -> Result<Vec<serde_json::Value>, String> {
    let client = state
        .wiki_clients
        .get_or_connect(&desc.dbname, &desc.base_url, &state.oauth_token)
        .await
        .map_err(|e| e.to_string())?;

    let dbname = desc.dbname.clone();
    let fetch_client = client.clone();
    let titler = state
        .titler
        .for_wiki(&dbname, move || async move {
            let params = [
                ("action".to_string(), "query".to_string()),
                ("meta".to_string(), "siteinfo".to_string()),
                (
                    "siprop".to_string(),
                    "general|namespaces|namespacealiases|interwikimap".to_string(),
                ),
            ];
            fetch_client
                .get::<_, mwtitle::SiteInfoResponse>(params)
                .await
                .map(|resp| resp.query)
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| e.to_string())?;

    let title = titler
        .make_title(3, &format!("User talk:{user}"))
        .map_err(|e| e.to_string())?;

    let scanner = dispatch_talkscan::TalkPageScanner::new(&client);
    let mut events = Vec::new();
    scanner
        .scan(
            &title.prefixed_text,
            filters,
            None,
            |event| {
                events.push(serde_json::json!({
                    "revid": event.revid,
                    "timestamp": event.timestamp,
                    "filter": event.filter,
                    "action": match event.action {
                        dispatch_talkscan::MatchAction::Add => "add",
                        dispatch_talkscan::MatchAction::Remove => "remove",
                    },
                    "matches": event.matches,
                }));
            },
            |progress| handle.set_progress(progress),
        )
        .await
        .map_err(|e| e.to_string())?;

    Ok(events)
}

pub async fn search_talk_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(errorformat): Query<ErrorFormatQuery>,
) -> Result<Response, ApiError> {
    let format = error_format(&errorformat);
    get_task_progress(&state.search_talk_tasks, &id, "/v1/user/search-talk", format).await
}

pub async fn search_talk_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(errorformat): Query<ErrorFormatQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let format = error_format(&errorformat);
    get_task_result(&state.search_talk_tasks, &id, format).await
}
