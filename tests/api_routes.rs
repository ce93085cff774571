//! HTTP adapter routes

#![cfg(feature = "server")]

use std::fs;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use dpp_mapper::api::{create_router, AppState};
use dpp_mapper::{DppConfig, Pipeline};

fn app() -> (TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let uploads = dir.path().join("uploads");
    fs::create_dir_all(&uploads).unwrap();
    fs::write(
        uploads.join("parts.csv"),
        "Part Name,Weight\nMirror left,4.2\nMirror right,4.3\n",
    )
    .unwrap();

    let config = DppConfig::default()
        .with_content_dir(dir.path().join("passports"))
        .with_source_dir(&uploads);
    let pipeline = Pipeline::from_config(&config).unwrap();
    (dir, create_router(AppState::new(pipeline)))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn parts_mapping() -> Value {
    json!({
        "source": "parts.csv",
        "mapping": {
            "identification": "Part Name",
            "characteristics.physicalDimension.weight.value": "Weight",
            "circularity": null
        }
    })
}

#[tokio::test]
async fn test_health_and_schema() {
    let (_dir, app) = app();

    let (status, body) = send(&app, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "OK");

    let (status, body) = send(&app, get("/api/schema")).await;
    assert_eq!(status, StatusCode::OK);
    let groups: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["name"].as_str().unwrap())
        .collect();
    assert!(groups.contains(&"identification"));
    assert!(groups.contains(&"metadata"));
}

#[tokio::test]
async fn test_columns() {
    let (_dir, app) = app();

    let (status, body) = send(&app, post("/api/columns", json!({ "source": "parts.csv" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["columns"], json!(["Part Name", "Weight"]));
    assert_eq!(body["data"]["rows"], 2);

    let (status, _) = send(&app, post("/api/columns", json!({ "source": "absent.csv" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, post("/api/columns", json!({ "source": "../parts.csv" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_resolve_reports_every_error() {
    let (_dir, app) = app();

    let (status, body) = send(
        &app,
        post(
            "/api/mappings/resolve",
            json!({
                "source": "parts.csv",
                "mapping": { "identification": "Nmae", "nonsense": "Weight" }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let mut kinds: Vec<&str> = body["data"]["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["kind"].as_str().unwrap())
        .collect();
    kinds.sort();
    assert_eq!(kinds, vec!["unknown_column", "unknown_target"]);

    let (status, body) = send(&app, post("/api/mappings/resolve", parts_mapping())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["targets"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_generate_then_retrieve() {
    let (_dir, app) = app();

    let (status, body) = send(&app, post("/api/generate", parts_mapping())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["summary"]["published"], 2);
    assert_eq!(body["data"]["summary"]["fully_built"], 2);

    let rows = body["data"]["rows"].as_array().unwrap();
    assert_eq!(rows[0]["row"], 1);
    assert_eq!(rows[1]["row"], 2);

    let id = rows[1]["document_id"].as_str().unwrap();
    let (status, doc) = send(&app, get(&format!("/product/{id}/json"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["identification"], "Mirror right");
    assert_eq!(
        doc["characteristics"]["physicalDimension"]["weight"]["value"],
        4.3
    );
}

#[tokio::test]
async fn test_product_not_found_and_invalid_id() {
    let (_dir, app) = app();

    let missing = dpp_mapper::DocumentId::new_random();
    let (status, body) = send(&app, get(&format!("/product/{missing}/json"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "message": "Product not found" }));

    let (status, _) = send(&app, get("/product/not-an-id/json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
