//! The standalone service: env config, canonical store over HTTP, workers and
//! the operational API wired together.

mod common;

use std::sync::Arc;
use std::time::Duration;

use brokerd_bus::LocalBus;
use brokerd_provisioner::handles::MemoryHandleSource;
use brokerd_provisioner::{service, workers, Config, Provisioner};
use common::{init_tracing, node, SERVICE};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn varz(client: &reqwest::Client, base: &str) -> Value {
    client
        .get(format!("{base}/varz"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_serve_wires_env_config_store_and_api() {
    init_tracing();
    let store = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/services/v1/offerings/mysql-8/handles"))
        .and(header("x-service-token", "t0ken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "handles": [{
                "service_id": "i1",
                "configuration": {"plan": "free", "version": "8.0"},
                "credentials": {"name": "i1", "node_id": "a"}
            }]
        })))
        .mount(&store)
        .await;

    // Only this test reads the environment in this binary.
    std::env::set_var("BROKER_SERVICE_NAME", SERVICE);
    std::env::set_var("BROKER_HANDLES_URL", store.uri());
    std::env::set_var("BROKER_SERVICE_LABEL", "mysql-8");
    std::env::set_var("BROKER_SERVICE_TOKEN", "t0ken");
    std::env::set_var("BROKER_NODE_TIMEOUT_SECS", "2");
    let config = Config::from_env().unwrap();
    assert_eq!(config.node_timeout, Duration::from_secs(2));

    let bus = LocalBus::new();
    let _a = node(&bus, "a", "free", 3).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(service::serve(
        config,
        Arc::new(bus.clone()),
        listener,
        shutdown_rx,
    ));

    let client = reqwest::Client::new();
    let mut stats = Value::Null;
    for _ in 0..100 {
        stats = varz(&client, &base).await;
        if stats["nodes"].as_array().is_some_and(|n| !n.is_empty()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(stats["service"], SERVICE);
    assert_eq!(stats["nodes"][0]["id"], "a");
    assert_eq!(stats["instances"], 1);
    drop(client);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(bus.subscriber_count(&format!("{SERVICE}.announce")), 0);
}

#[tokio::test]
async fn test_zero_prune_interval_refused_before_spawning() {
    let config = Config {
        prune_interval: Duration::ZERO,
        ..Config::default()
    };
    let bus = LocalBus::new();
    let provisioner = Provisioner::new(
        config.clone(),
        Arc::new(bus.clone()),
        Arc::new(MemoryHandleSource::new()),
    );
    let (_tx, rx) = watch::channel(false);

    let err = workers::spawn_workers(&provisioner, rx.clone())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("prune_interval"));
    assert_eq!(bus.subscriber_count("svc.announce"), 0);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let err = service::serve(config, Arc::new(bus), listener, rx)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("prune_interval"));
}
