//! Boundary-behavior integration tests (§8): the request-validation paths
//! that fail before any upstream wiki call, so a mocked Site Registry
//! catalogue is the only double needed.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn test_app() -> (MockServer, axum::Router) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "wikis": [
                {"dbname": "enwiki", "url": "https://en.example.org/w", "lang": "en"},
                {"dbname": "privatewiki", "url": "https://private.example.org/w", "lang": "en", "nonglobal": true},
            ]
        })))
        .mount(&server)
        .await;

    let state = dispatch_server::build_state(server.uri(), "test-token".to_string());
    let app = dispatch_server::build_router(state);
    (server, app)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn fifty_one_ids_over_get_is_method_limited() {
    let (_server, app) = test_app().await;
    let ids = (1..=51).map(|i| i.to_string()).collect::<Vec<_>>().join("|");
    let response = app
        .oneshot(
            Request::get(format!("/v1/revisions/enwiki?revisions={ids}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "method-limited");
}

#[tokio::test]
async fn empty_revisions_param_is_rejected() {
    let (_server, app) = test_app().await;
    let response = app
        .oneshot(
            Request::get("/v1/revisions/enwiki?revisions=")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "revisions-missing");
}

#[tokio::test]
async fn non_numeric_revision_id_is_bad_integer() {
    let (_server, app) = test_app().await;
    let response = app
        .oneshot(
            Request::get("/v1/revisions/enwiki?revisions=abc|123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "badinteger");
}

#[tokio::test]
async fn nonglobal_wiki_is_unsupported_on_get_revisions() {
    let (_server, app) = test_app().await;
    let response = app
        .oneshot(
            Request::get("/v1/revisions/privatewiki?revisions=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "unsupportedwiki");
}

#[tokio::test]
async fn nonglobal_wiki_is_a_bad_request_on_deleted_revisions() {
    let (_server, app) = test_app().await;
    let response = app
        .oneshot(
            Request::post("/v1/user/deleted-revisions")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({"user": "Example", "wiki": "privatewiki"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "unsupportedwiki");
}

#[tokio::test]
async fn noncompiling_regex_filter_is_rejected() {
    let (_server, app) = test_app().await;
    let response = app
        .oneshot(
            Request::post("/v1/user/search-talk")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "user": "Example",
                        "wiki": "enwiki",
                        "filter": {"regex": "("},
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "invalidfilter");
}

#[tokio::test]
async fn polling_an_unknown_task_id_is_task_missing() {
    let (_server, app) = test_app().await;
    let unknown_id = uuid::Uuid::new_v4();
    let response = app
        .oneshot(
            Request::get(format!("/v1/user/deleted-revisions/{unknown_id}/progress"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "task-missing");
}

#[tokio::test]
async fn deleted_revisions_submission_is_accepted_with_a_progress_location() {
    let (_server, app) = test_app().await;
    let response = app
        .oneshot(
            Request::post("/v1/user/deleted-revisions")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({"user": "Example", "wiki": "enwiki"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let location = response
        .headers()
        .get(axum::http::header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(location.starts_with("/v1/user/deleted-revisions/"));
    assert!(location.ends_with("/progress"));
}
