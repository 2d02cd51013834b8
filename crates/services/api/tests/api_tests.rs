//! Integration tests for the API service.
//!
//! These run against in-memory stores and never launch a sandbox: they
//! exercise validation, file transport, health, and the pool-busy path.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use crucible_api::api::create_router;
use crucible_api::{AppState, Config};

/// A router over in-memory backends with an empty, never-replenished pool.
fn create_test_app() -> axum::Router {
    let config = Config {
        sandbox_base_dir: tempfile::tempdir().unwrap().keep(),
        pool_target: 0,
        pool_acquire_timeout: Duration::from_millis(200),
        health_check_on_acquire: false,
        ..Config::default()
    };
    create_router(AppState::new(config))
}

/// Helper to read a response body as JSON.
async fn body_to_json(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_to_json(response.into_body()).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "crucible-api");
}

#[tokio::test]
async fn test_detailed_health_reports_components() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health/detailed")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_to_json(response.into_body()).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["hot_store"], true);
    assert_eq!(body["cold_store"], true);
    assert_eq!(body["pool"]["target"], 0);
    assert_eq!(body["pool"]["interpreter_ready"], false);
}

#[tokio::test]
async fn test_exec_unknown_language_is_bad_request() {
    let app = create_test_app();

    let response = app
        .oneshot(post_json(
            "/exec",
            &json!({"language": "cobol", "code": "DISPLAY 'HI'"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_to_json(response.into_body()).await;
    assert!(body["error"].as_str().unwrap().contains("cobol"));
}

#[tokio::test]
async fn test_exec_oversized_code_is_bad_request() {
    let app = create_test_app();

    let response = app
        .oneshot(post_json(
            "/exec",
            &json!({"language": "py", "code": "x".repeat(2 * 1024 * 1024)}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_exec_unsafe_file_name_is_bad_request() {
    let app = create_test_app();

    let response = app
        .oneshot(post_json(
            "/exec",
            &json!({
                "language": "py",
                "code": "print(1)",
                "files": [{"name": "../escape.txt", "content_b64": "aGk="}],
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_exec_file_needs_exactly_one_source() {
    let app = create_test_app();

    let response = app
        .oneshot(post_json(
            "/exec",
            &json!({
                "language": "py",
                "code": "print(1)",
                "files": [{"name": "data.txt"}],
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_to_json(response.into_body()).await;
    assert!(body["error"].as_str().unwrap().contains("exactly one"));
}

#[tokio::test]
async fn test_exec_empty_pool_is_service_busy() {
    let app = create_test_app();

    // The pool target is zero and the replenisher is not running, so the
    // interactive language can never get a sandbox.
    let response = app
        .oneshot(post_json("/exec", &json!({"language": "py", "code": "x = 1"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_upload_download_round_trip() {
    let app = create_test_app();

    let upload = app
        .clone()
        .oneshot(post_json(
            "/upload",
            &json!({"session_id": "sess-1", "name": "data.csv", "content_b64": "MSwyLDM="}),
        ))
        .await
        .unwrap();

    assert_eq!(upload.status(), StatusCode::OK);
    let body = body_to_json(upload.into_body()).await;
    assert_eq!(body["session_id"], "sess-1");
    assert_eq!(body["name"], "data.csv");
    assert_eq!(body["size"], 5);
    let reference = body["reference"].as_str().unwrap().to_string();
    assert!(reference.starts_with("sess-1/"));

    let download = app
        .oneshot(
            Request::builder()
                .uri(format!("/download/{reference}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(download.status(), StatusCode::OK);
    let bytes = download.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"1,2,3");
}

#[tokio::test]
async fn test_upload_rejects_bad_base64() {
    let app = create_test_app();

    let response = app
        .oneshot(post_json(
            "/upload",
            &json!({"name": "x.bin", "content_b64": "!!! not base64 !!!"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_unknown_reference_is_not_found() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/download/sess-1/deadbeef")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_download_traversal_reference_is_bad_request() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/download/sess-1/..%2Fother")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
