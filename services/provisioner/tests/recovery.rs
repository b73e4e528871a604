//! Instance recovery onto a surviving node.

mod common;

use std::sync::Arc;
use std::time::Duration;

use brokerd_bus::LocalBus;
use brokerd_messages::ErrorCode;
use brokerd_provisioner::handles::MemoryHandleSource;
use common::{binding_handle, eventually, instance_handle, node, test_config, Harness};

/// Instance `i1` lived on node `dead` with three bindings.
fn lost_instance() -> Arc<MemoryHandleSource> {
    Arc::new(MemoryHandleSource::with_handles([
        instance_handle("i1", "dead"),
        binding_handle("bind_1", "i1", "dead", "alice"),
        binding_handle("bind_2", "i1", "dead", "bob"),
        binding_handle("bind_3", "i1", "dead", "carol"),
    ]))
}

#[tokio::test(start_paused = true)]
async fn test_recover_rebuilds_instance_and_bindings() {
    let bus = LocalBus::new();
    let b = node(&bus, "b", "free", 3).await;
    let source = lost_instance();
    let h = Harness::start(bus, source.clone(), test_config()).await;
    eventually(|| h.provisioner.node("b").is_some()).await;

    let recovered = h.provisioner.recover("i1", "/backups/i1.tgz").await.unwrap();

    assert_eq!(recovered.instance.service_id, "i1");
    assert_eq!(recovered.instance.node_id(), Some("b"));
    assert_eq!(source.get("i1"), Some(recovered.instance.clone()));

    let mut ids: Vec<_> = recovered
        .bindings
        .iter()
        .map(|b| b.service_id.clone())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["bind_1", "bind_2", "bind_3"]);
    for binding in &recovered.bindings {
        assert_eq!(binding.node_id(), Some("b"));
        assert_eq!(source.get(&binding.service_id), Some(binding.clone()));
        assert_eq!(
            binding.binding_options(),
            Some(&serde_json::json!({"privileges": "ro"}))
        );
    }

    let mut users: Vec<_> = b
        .bindings()
        .iter()
        .filter_map(|c| c.username().map(str::to_owned))
        .collect();
    users.sort();
    assert_eq!(users, vec!["alice", "bob", "carol"]);
    assert_eq!(b.received_on(".restore.").len(), 1);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_one_failed_rebind_fails_recovery() {
    let bus = LocalBus::new();
    let b = node(&bus, "b", "free", 3).await;
    b.fail_bind_for_user("bob");
    let h = Harness::start(bus, lost_instance(), test_config()).await;
    eventually(|| h.provisioner.node("b").is_some()).await;

    let err = h.provisioner.recover("i1", "/backups/i1.tgz").await.unwrap_err();

    assert_eq!(err.to_response().msg.code, 30500);
    assert!(err.to_string().contains("rebind"));
    // Nothing is rolled back.
    assert_eq!(b.instances(), vec!["i1".to_string()]);
    assert_eq!(b.bindings().len(), 2);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_restore_stops_before_rebinding() {
    let bus = LocalBus::new();
    let b = node(&bus, "b", "free", 3).await;
    b.fail_restore(Some(ErrorCode::InternalError.response(Some("corrupt backup"))));
    let h = Harness::start(bus, lost_instance(), test_config()).await;
    eventually(|| h.provisioner.node("b").is_some()).await;

    let err = h.provisioner.recover("i1", "/backups/i1.tgz").await.unwrap_err();

    assert!(err.to_string().contains("restore"));
    assert!(b.received_on(".bind.").is_empty());
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_rebinds_hit_barrier_timeout() {
    let bus = LocalBus::new();
    let b = node(&bus, "b", "free", 3).await;
    let mut config = test_config();
    config.recovery_bind_timeout = Duration::from_secs(1);
    let h = Harness::start(bus, lost_instance(), config).await;
    eventually(|| h.provisioner.node("b").is_some()).await;
    b.set_delay(Some(Duration::from_secs(2)));

    let err = h.provisioner.recover("i1", "/backups/i1.tgz").await.unwrap_err();

    assert_eq!(err.to_response().msg.code, 30500);
    assert!(err.to_string().contains("rebind"));
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_recover_unknown_instance() {
    let bus = LocalBus::new();
    let _b = node(&bus, "b", "free", 3).await;
    let h = Harness::start(bus, lost_instance(), test_config()).await;

    let err = h.provisioner.recover("missing", "/b").await.unwrap_err();
    assert_eq!(err.status(), 404);
    h.stop().await;
}
