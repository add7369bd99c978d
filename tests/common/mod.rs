#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use machinewatch::chat::{ChatAssistant, LanguageModel};
use machinewatch::realtime::{BridgeState, Hub};
use machinewatch::store::{MemoryStore, Store};
use machinewatch::{router, AppState};
use serde_json::Value;
use tokio::sync::watch;
use tower::util::ServiceExt;

pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub hub: Hub,
    pub app: axum::Router,
}

/// Router over a fresh in-process store, with the bridge reported disabled.
pub fn build_test_context(model: Option<Arc<dyn LanguageModel>>) -> TestContext {
    let store = Arc::new(MemoryStore::new());
    let hub = Hub::new(16);
    let (_, realtime) = watch::channel(BridgeState::Disabled);

    let dyn_store: Arc<dyn Store> = store.clone();
    let chat = model.map(|m| Arc::new(ChatAssistant::new(m, dyn_store.clone())));
    let state = AppState::new(dyn_store, hub.clone(), realtime, chat);

    TestContext {
        store,
        hub,
        app: router(state, Duration::from_secs(5)),
    }
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.unwrap_or(Value::Null).to_string()))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_raw(app: &axum::Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_no_body(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

/// Register a machine and return its id.
pub async fn create_machine(app: &axum::Router, product_id: &str, machine_type: &str) -> String {
    let (status, body) = request_json(
        app,
        "POST",
        "/machines",
        Some(serde_json::json!({ "productId": product_id, "type": machine_type })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
    body["id"].as_str().expect("machine id").to_string()
}

pub fn reading_body(product_id: &str, air_temp: f64) -> Value {
    serde_json::json!({
        "productId": product_id,
        "airTemp": air_temp,
        "processTemp": 308.6,
        "rotationalSpeed": 1551,
        "torque": 42.8,
        "toolWear": 0
    })
}
