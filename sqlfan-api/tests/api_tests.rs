//! HTTP surface tests against an in-memory store
//!
//! Every non-streaming endpoint answers HTTP 200 with the semantic code in
//! the envelope; these tests assert that contract along with the handler
//! behavior.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlfan_api::app::{build_router, AppState};
use sqlfan_runner::LogOnlyDocJob;
use sqlfan_shared::config_cache::ConfigCache;
use sqlfan_shared::db::store::open_memory_store;
use std::sync::Arc;
use tower::ServiceExt;

async fn test_app() -> Router {
    let pool = open_memory_store().await.unwrap();
    let configs = Arc::new(ConfigCache::new(pool.clone()));
    configs.init_defaults().await.unwrap();
    build_router(AppState::new(pool, configs, Arc::new(LogOnlyDocJob)))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(json_body) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json_body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health_check() {
    let app = test_app().await;
    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 200);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["store"], "connected");
}

#[tokio::test]
async fn test_sql_validate_splits_statements() {
    let app = test_app().await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/sql/validate",
        Some(json!({
            "sql_content": "SELECT 1; INSERT INTO t VALUES ('a;b'); -- c;\nSELECT 2;"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 200);
    assert_eq!(body["data"]["statement_count"], 3);
    assert_eq!(body["data"]["statements"][1]["sql"], "INSERT INTO t VALUES ('a;b')");
}

#[tokio::test]
async fn test_sql_validate_rejects_comment_only_batch() {
    let app = test_app().await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/sql/validate",
        Some(json!({"sql_content": "-- nothing here\n"})),
    )
    .await;

    // transport stays 200, the envelope carries the semantic code
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn test_create_task_requires_fields() {
    let app = test_app().await;
    let (_, body) = send(
        &app,
        "POST",
        "/api/query-tasks",
        Some(json!({
            "task_name": "",
            "database_mode": "include",
            "selected_dbs": [],
            "sql_content": "SELECT 1;"
        })),
    )
    .await;
    assert_eq!(body["code"], 400);

    let (_, body) = send(
        &app,
        "POST",
        "/api/query-tasks",
        Some(json!({
            "task_name": "x",
            "database_mode": "sideways",
            "selected_dbs": [{"instance_id": 1, "database_name": "a"}],
            "sql_content": "SELECT 1;"
        })),
    )
    .await;
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn test_task_lifecycle_over_http() {
    let app = test_app().await;

    let (_, created) = send(
        &app,
        "POST",
        "/api/instances",
        Some(json!({
            "name": "alpha",
            "host": "127.0.0.1",
            "port": 3306,
            "username": "root",
            "password": "root"
        })),
    )
    .await;
    assert_eq!(created["code"], 200);
    let instance_id = created["data"]["id"].as_i64().unwrap();

    let (_, task) = send(
        &app,
        "POST",
        "/api/query-tasks",
        Some(json!({
            "task_name": "http flow",
            "database_mode": "include",
            "selected_dbs": [
                {"instance_id": instance_id, "database_name": "a"},
                {"instance_id": instance_id, "database_name": "b"}
            ],
            "sql_content": "SELECT 1 AS one; SELECT 2 AS two;"
        })),
    )
    .await;
    assert_eq!(task["code"], 200);
    let task_id = task["data"]["id"].as_i64().unwrap();
    assert_eq!(task["data"]["total_dbs"], 2);
    assert_eq!(task["data"]["total_sqls"], 2);

    // duplicate name → conflict
    let (_, dup) = send(
        &app,
        "POST",
        "/api/query-tasks",
        Some(json!({
            "task_name": "http flow",
            "database_mode": "include",
            "selected_dbs": [{"instance_id": instance_id, "database_name": "a"}],
            "sql_content": "SELECT 1;"
        })),
    )
    .await;
    assert_eq!(dup["code"], 409);

    let (_, listed) = send(&app, "GET", "/api/query-tasks?task_name=http", None).await;
    assert_eq!(listed["data"]["total"], 1);

    let (_, fetched) = send(&app, "GET", &format!("/api/query-tasks/{}", task_id), None).await;
    assert_eq!(fetched["data"]["task_name"], "http flow");

    let (_, favored) = send(
        &app,
        "POST",
        &format!("/api/query-tasks/{}/toggle-favorite", task_id),
        None,
    )
    .await;
    assert_eq!(favored["data"]["is_favorite"], true);

    let (_, sqls) = send(&app, "GET", &format!("/api/query-tasks/{}/sqls", task_id), None).await;
    assert_eq!(sqls["data"]["total"], 2);

    let (_, stats) = send(
        &app,
        "GET",
        &format!("/api/query-tasks/{}/execution-stats", task_id),
        None,
    )
    .await;
    assert_eq!(stats["data"]["db"]["total"], 4);
    assert_eq!(stats["data"]["db"]["pending"], 4);

    let (_, detail) = send(
        &app,
        "GET",
        &format!("/api/query-tasks/{}/sqls/executions", task_id),
        None,
    )
    .await;
    assert_eq!(detail["data"][0]["executions"][0]["instance_name"], "alpha");

    let (_, deleted) = send(
        &app,
        "DELETE",
        "/api/query-tasks",
        Some(json!({"task_ids": [task_id]})),
    )
    .await;
    assert_eq!(deleted["code"], 200);

    let (_, gone) = send(&app, "GET", &format!("/api/query-tasks/{}", task_id), None).await;
    assert_eq!(gone["code"], 404);
}

#[tokio::test]
async fn test_missing_task_is_semantic_404() {
    let app = test_app().await;
    let (status, body) = send(&app, "GET", "/api/query-tasks/999", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 404);
}

#[tokio::test]
async fn test_configs_round_trip() {
    let app = test_app().await;

    let (_, got) = send(&app, "GET", "/api/configs/concurrency", None).await;
    assert_eq!(got["data"]["c_value"], "50");

    let (_, set) = send(
        &app,
        "POST",
        "/api/configs",
        Some(json!({"c_key": "concurrency", "c_value": "16"})),
    )
    .await;
    assert_eq!(set["code"], 200);

    let (_, got) = send(&app, "GET", "/api/configs/concurrency", None).await;
    assert_eq!(got["data"]["c_value"], "16");

    let (_, batch) = send(
        &app,
        "POST",
        "/api/configs/batch-get",
        Some(json!({"keys": ["concurrency", "max_conn"]})),
    )
    .await;
    let entries = batch["data"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn test_dashboard_stats_counts() {
    let app = test_app().await;

    send(
        &app,
        "POST",
        "/api/instances",
        Some(json!({
            "name": "counted",
            "host": "127.0.0.1",
            "port": 3306,
            "username": "root",
            "password": "root"
        })),
    )
    .await;

    let (_, stats) = send(&app, "GET", "/api/dashboard/stats", None).await;
    assert_eq!(stats["data"]["instances"], 1);
    assert_eq!(stats["data"]["tasks"], 0);
}

#[tokio::test]
async fn test_doc_task_crud_and_manual_run() {
    let app = test_app().await;

    let (_, instance) = send(
        &app,
        "POST",
        "/api/instances",
        Some(json!({
            "name": "documented",
            "host": "127.0.0.1",
            "port": 3306,
            "username": "root",
            "password": "root"
        })),
    )
    .await;
    let instance_id = instance["data"]["id"].as_i64().unwrap();

    // an unknown instance is rejected up front
    let (_, bad) = send(
        &app,
        "POST",
        "/api/doc-tasks",
        Some(json!({
            "task_name": "orphan",
            "instance_id": 9999,
            "database_name": "orders"
        })),
    )
    .await;
    assert_eq!(bad["code"], 400);

    let (_, created) = send(
        &app,
        "POST",
        "/api/doc-tasks",
        Some(json!({
            "task_name": "orders docs",
            "instance_id": instance_id,
            "database_name": "orders",
            "is_enable": true,
            "sync_interval": 30
        })),
    )
    .await;
    assert_eq!(created["code"], 200);
    let doc_id = created["data"]["id"].as_i64().unwrap();
    assert_eq!(created["data"]["last_doc_at"], Value::Null);

    let (_, listed) = send(&app, "GET", "/api/doc-tasks?task_name=orders", None).await;
    assert_eq!(listed["data"]["total"], 1);

    let (_, updated) = send(
        &app,
        "PUT",
        &format!("/api/doc-tasks/{}", doc_id),
        Some(json!({
            "task_name": "orders docs",
            "instance_id": instance_id,
            "database_name": "orders",
            "is_enable": false,
            "sync_interval": 0
        })),
    )
    .await;
    assert_eq!(updated["data"]["is_enable"], false);

    // manual run fires the handler and stamps the last-run marker
    let (_, ran) = send(
        &app,
        "POST",
        &format!("/api/doc-tasks/{}/run", doc_id),
        None,
    )
    .await;
    assert_eq!(ran["code"], 200);

    let (_, fetched) = send(&app, "GET", &format!("/api/doc-tasks/{}", doc_id), None).await;
    assert!(fetched["data"]["last_doc_at"].is_string());

    let (_, deleted) = send(&app, "DELETE", &format!("/api/doc-tasks/{}", doc_id), None).await;
    assert_eq!(deleted["code"], 200);

    let (_, gone) = send(&app, "GET", &format!("/api/doc-tasks/{}", doc_id), None).await;
    assert_eq!(gone["code"], 404);
}

#[tokio::test]
async fn test_instance_crud_over_http() {
    let app = test_app().await;

    let (_, created) = send(
        &app,
        "POST",
        "/api/instances",
        Some(json!({
            "name": "crud",
            "host": "db.internal",
            "port": 3306,
            "username": "root",
            "password": "root"
        })),
    )
    .await;
    let id = created["data"]["id"].as_i64().unwrap();

    // duplicate instance name → conflict
    let (_, dup) = send(
        &app,
        "POST",
        "/api/instances",
        Some(json!({
            "name": "crud",
            "host": "other",
            "port": 3306,
            "username": "root",
            "password": "root"
        })),
    )
    .await;
    assert_eq!(dup["code"], 409);

    let (_, updated) = send(
        &app,
        "PUT",
        &format!("/api/instances/{}", id),
        Some(json!({
            "name": "crud",
            "host": "db.internal",
            "port": 3307,
            "username": "root",
            "password": "root",
            "remark": "renumbered"
        })),
    )
    .await;
    assert_eq!(updated["data"]["port"], 3307);

    let (_, opts) = send(&app, "GET", "/api/instances/options", None).await;
    assert_eq!(opts["data"][0]["name"], "crud");

    let (_, exported) = send(
        &app,
        "POST",
        "/api/instances/export",
        Some(json!({"instance_ids": []})),
    )
    .await;
    assert_eq!(exported["data"][0]["host"], "db.internal");

    let (_, deleted) = send(&app, "DELETE", &format!("/api/instances/{}", id), None).await;
    assert_eq!(deleted["code"], 200);

    let (_, gone) = send(&app, "GET", &format!("/api/instances/{}", id), None).await;
    assert_eq!(gone["code"], 404);
}
