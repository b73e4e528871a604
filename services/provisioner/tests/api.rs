//! Operational HTTP API driven through the router.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use brokerd_bus::LocalBus;
use brokerd_provisioner::api::create_router;
use brokerd_provisioner::handles::MemoryHandleSource;
use common::{eventually, instance_handle, node, test_config, Harness};
use serde_json::Value;
use tower::ServiceExt;

async fn send(app: &Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test(start_paused = true)]
async fn test_healthz_and_varz() {
    let bus = LocalBus::new();
    let _a = node(&bus, "a", "free", 3).await;
    let source = Arc::new(MemoryHandleSource::with_handles([instance_handle("i1", "a")]));
    let h = Harness::start(bus, source, test_config()).await;
    eventually(|| h.provisioner.node("a").is_some()).await;
    let app = create_router(h.provisioner.clone());

    let (status, body) = send(&app, "GET", "/healthz", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "mysql");
    assert_eq!(body["nodes"], 1);

    let (status, body) = send(&app, "GET", "/varz", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["instances"], 1);
    assert_eq!(body["nodes"][0]["id"], "a");
    assert_eq!(body["nodes"][0]["available_capacity"], 3);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_orphan_check_then_confirm() {
    let bus = LocalBus::new();
    let a = node(&bus, "a", "free", 3).await;
    a.add_stray_instance("ghost");
    let h = Harness::start(bus, Arc::new(MemoryHandleSource::new()), test_config()).await;
    let app = create_router(h.provisioner.clone());

    let (status, body) = send(&app, "POST", "/orphans/check", "").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["confirm_after_secs"], 300);
    let sweep_id = body["sweep_id"].as_str().unwrap().to_string();
    assert!(sweep_id.starts_with("swp_"));

    let (_, body) = send(&app, "GET", "/orphans", "").await;
    assert_eq!(body["in_progress"], sweep_id.as_str());
    assert_eq!(body["instance_count"], 0);

    tokio::time::sleep(Duration::from_secs(301)).await;

    let (_, body) = send(&app, "GET", "/orphans", "").await;
    assert!(body["in_progress"].is_null());
    assert_eq!(body["last_sweep"]["id"], sweep_id.as_str());
    assert_eq!(body["orphans"]["instances"]["a"][0], "ghost");
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_purge_bodies() {
    let bus = LocalBus::new();
    let a = node(&bus, "a", "free", 3).await;
    a.add_stray_instance("ghost");
    let h = Harness::start(bus, Arc::new(MemoryHandleSource::new()), test_config()).await;
    h.provisioner.sweep_orphans().await.unwrap();
    let app = create_router(h.provisioner.clone());

    let (status, body) = send(&app, "POST", "/orphans/purge", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"]["code"], 30001);
    assert_eq!(h.provisioner.orphans().instance_count, 1);

    let (status, body) = send(&app, "POST", "/orphans/purge", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["instances"], 1);
    assert_eq!(body["batches"], 1);
    eventually(|| a.purges().len() == 1).await;
    assert_eq!(h.provisioner.orphans().instance_count, 0);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_check_with_store_down_is_internal_error() {
    let bus = LocalBus::new();
    let source = Arc::new(MemoryHandleSource::new());
    let h = Harness::start(bus, source.clone(), test_config()).await;
    let app = create_router(h.provisioner.clone());
    source.set_offline(true);

    let (status, body) = send(&app, "POST", "/orphans/check", "").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["msg"]["code"], 30500);
    h.stop().await;
}
