//! HTTP Surface (§4.11): router assembly split out from the process entry
//! point so integration tests can drive it with `tower::ServiceExt::oneshot`
//! instead of binding a real listener.

pub mod config;
pub mod handlers;
pub mod logging;
pub mod openapi;
pub mod state;

use axum::extract::State;
use axum::http::{HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use dispatch_registry::{LookupKind, WikiRegistry};
use dispatch_revstore::RevisionStore;
use dispatch_tasks::TaskEngine;
use dispatch_titler::TitlerRegistry;
use dispatch_wikiclient::WikiClientPool;
use state::{AppState, DispatchState};
use std::sync::Arc;
use std::time::Duration;

pub const CATALOGUE_ENDPOINT: &str = "https://meta.wikimedia.org/w/api.php?action=sitematrix&format=json";
pub const CHANGE_STREAM_ENDPOINT: &str = "https://stream.wikimedia.org/v2/stream/revision-visibility-change";
pub const TASK_SWEEP_PERIOD: Duration = Duration::from_secs(300);

/// Builds process-scoped state against the given catalogue endpoint; tests
/// point this at a `wiremock` server instead of the real one. The
/// `RevisionStore` is constructed here but not started — `start_stream` is
/// an async call the process entry point makes once its runtime is up.
pub fn build_state(catalogue_endpoint: impl Into<String>, oauth_token: String) -> AppState {
    let http = reqwest::Client::new();
    Arc::new(DispatchState {
        registry: Arc::new(WikiRegistry::new(catalogue_endpoint, http.clone())),
        titler: Arc::new(TitlerRegistry::new()),
        wiki_clients: Arc::new(WikiClientPool::new()),
        revstore: Arc::new(RevisionStore::new(CHANGE_STREAM_ENDPOINT, http.clone())),
        oauth_token,
        deleted_revisions_tasks: TaskEngine::new(),
        largest_edits_tasks: TaskEngine::new(),
        search_talk_tasks: TaskEngine::new(),
        http,
    })
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/revisions/:wiki",
            get(handlers::get_revisions).post(handlers::post_revisions),
        )
        .route("/v1/user/deleted-revisions", post(handlers::post_deleted_revisions))
        .route(
            "/v1/user/deleted-revisions/:id/progress",
            get(handlers::deleted_revisions_progress),
        )
        .route(
            "/v1/user/deleted-revisions/:id",
            get(handlers::deleted_revisions_result),
        )
        .route("/v1/user/largest-edits", post(handlers::post_largest_edits))
        .route(
            "/v1/user/largest-edits/:id/progress",
            get(handlers::largest_edits_progress),
        )
        .route("/v1/user/largest-edits/:id", get(handlers::largest_edits_result))
        .route("/v1/user/search-talk", post(handlers::post_search_talk))
        .route(
            "/v1/user/search-talk/:id/progress",
            get(handlers::search_talk_progress),
        )
        .route("/v1/user/search-talk/:id", get(handlers::search_talk_result))
        .merge(utoipa_swagger_ui::SwaggerUi::new("/swagger-ui").url(
            "/api-docs/openapi.json",
            <openapi::ApiDoc as utoipa::OpenApi>::openapi(),
        ))
        .layer(middleware::from_fn_with_state(state.clone(), cors_layer))
        .with_state(state)
}

/// Sets `Access-Control-Allow-Origin: *` with `Vary: Origin` only when the
/// request's `Origin` header matches a known wiki hostname per the Site
/// Registry (§6); otherwise passes the response through unmodified.
async fn cors_layer(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let origin_host = request
        .headers()
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.split("://").nth(1))
        .map(|rest| rest.split('/').next().unwrap_or(rest).to_string());

    let mut response = next.run(request).await;

    if let Some(host) = origin_host {
        if state.registry.get(&host, LookupKind::Hostname).await.is_some() {
            response.headers_mut().insert(
                axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            );
            response
                .headers_mut()
                .insert(axum::http::header::VARY, HeaderValue::from_static("Origin"));
        }
    }

    response
}
