//! HTTP surface tests: request validation, error mapping, and the full
//! happy path through the router

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use sqlx::SqlitePool;
use tower::ServiceExt;

use undrm_inspect::audit::DatabaseAuditSink;
use undrm_inspect::pipeline::InspectPipeline;
use undrm_inspect::services::{
    DatabaseLicenseResolver, InferenceClient, InferenceSettings, LocalObjectStore,
};
use undrm_inspect::{build_router, AppState};

use helpers::*;

async fn test_app(object_root: &std::path::Path, answers: Vec<String>) -> axum::Router {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    undrm_inspect::db::init_tables(&pool).await.unwrap();
    sqlx::query("INSERT INTO license_keys (item_id, gkey, grant_id) VALUES (?, ?, ?)")
        .bind("100123")
        .bind(base64_key(&TEST_AES_KEY))
        .bind("grant-42")
        .execute(&pool)
        .await
        .unwrap();

    let (base_url, _) = spawn_inference_mock(answers).await;
    let inference = InferenceClient::new(InferenceSettings {
        base_url,
        model: "test-model".to_string(),
        api_key: None,
        timeout: Duration::from_secs(5),
    })
    .unwrap();

    let pipeline = Arc::new(InspectPipeline::new(
        Arc::new(DatabaseLicenseResolver::new(pool.clone())),
        Arc::new(DatabaseAuditSink::new(pool.clone())),
        Arc::new(inference),
        4,
    ));

    let state = AppState::new(pool, Arc::new(LocalObjectStore::new(object_root)), pipeline);
    build_router(state)
}

fn inspect_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/epub/inspect")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_endpoint_responds_ok() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), vec![]).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn inspect_happy_path_returns_ok() {
    let dir = tempfile::tempdir().unwrap();
    let bucket = dir.path().join("ebooks").join("enc");
    std::fs::create_dir_all(&bucket).unwrap();
    std::fs::write(
        bucket.join("100123.epub"),
        build_encrypted_epub(3, &TEST_AES_KEY),
    )
    .unwrap();

    let app = test_app(
        dir.path(),
        vec![answer_json("OEBPS/text/ch2.xhtml", 0.9)],
    )
    .await;

    let response = app
        .oneshot(inspect_request(serde_json::json!({
            "s3_bucket": "ebooks",
            "s3_key": "enc/100123.epub",
            "itemId": "100123",
            "purpose": "find_start_point"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unsupported_purpose_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), vec![]).await;

    let response = app
        .oneshot(inspect_request(serde_json::json!({
            "s3_bucket": "ebooks",
            "s3_key": "enc/100123.epub",
            "itemId": "100123",
            "purpose": "extract_everything"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_numeric_item_id_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), vec![]).await;

    let response = app
        .oneshot(inspect_request(serde_json::json!({
            "s3_bucket": "ebooks",
            "s3_key": "enc/x.epub",
            "itemId": "abc-123",
            "purpose": "find_start_point"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_source_object_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), vec![]).await;

    let response = app
        .oneshot(inspect_request(serde_json::json!({
            "s3_bucket": "ebooks",
            "s3_key": "enc/does-not-exist.epub",
            "itemId": "100123",
            "purpose": "find_start_point"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn fetch_failures_surface_in_health_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), vec![]).await;

    let response = app
        .clone()
        .oneshot(inspect_request(serde_json::json!({
            "s3_bucket": "ebooks",
            "s3_key": "enc/does-not-exist.epub",
            "itemId": "100123",
            "purpose": "find_start_point"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["requests_total"], 1);
    assert_eq!(health["failures_total"], 1);
    assert!(health["last_error"]
        .as_str()
        .unwrap()
        .contains("Source object not found"));
}

#[tokio::test]
async fn successful_run_clears_health_degradation() {
    let dir = tempfile::tempdir().unwrap();
    let bucket = dir.path().join("ebooks").join("enc");
    std::fs::create_dir_all(&bucket).unwrap();
    std::fs::write(
        bucket.join("100123.epub"),
        build_encrypted_epub(3, &TEST_AES_KEY),
    )
    .unwrap();

    let app = test_app(
        dir.path(),
        vec![answer_json("OEBPS/text/ch1.xhtml", 0.9)],
    )
    .await;

    // A miss degrades the service, a subsequent success clears it
    let miss = app
        .clone()
        .oneshot(inspect_request(serde_json::json!({
            "s3_bucket": "ebooks",
            "s3_key": "enc/missing.epub",
            "itemId": "100123",
            "purpose": "find_start_point"
        })))
        .await
        .unwrap();
    assert_eq!(miss.status(), StatusCode::NOT_FOUND);

    let hit = app
        .clone()
        .oneshot(inspect_request(serde_json::json!({
            "s3_bucket": "ebooks",
            "s3_key": "enc/100123.epub",
            "itemId": "100123",
            "purpose": "find_start_point"
        })))
        .await
        .unwrap();
    assert_eq!(hit.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["requests_total"], 2);
    assert_eq!(health["failures_total"], 1);
    assert!(health.get("last_error").is_none());
}

#[tokio::test]
async fn structurally_invalid_container_is_unprocessable() {
    let dir = tempfile::tempdir().unwrap();
    let bucket = dir.path().join("ebooks").join("enc");
    std::fs::create_dir_all(&bucket).unwrap();
    std::fs::write(
        bucket.join("100123.epub"),
        build_encrypted_epub_with_broken_opf(&TEST_AES_KEY),
    )
    .unwrap();

    let app = test_app(dir.path(), vec![]).await;

    let response = app
        .oneshot(inspect_request(serde_json::json!({
            "s3_bucket": "ebooks",
            "s3_key": "enc/100123.epub",
            "itemId": "100123",
            "purpose": "find_start_point"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
