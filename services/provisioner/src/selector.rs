//! Node selection with optimistic capacity reservation.

use tracing::debug;

use crate::error::{BrokerError, BrokerResult};
use crate::registry::{NodeRegistry, PendingGuard, SharedRegistry};

/// Pick a node for `plan` without touching the registry.
///
/// Nodes are filtered by plan, then by version when one is requested. The
/// node with the most available capacity wins; ties go to the smallest id.
/// A pick with no capacity left is only accepted when `over_provision` is
/// set.
pub fn select_node<'a>(
    registry: &'a NodeRegistry,
    plan: &str,
    version: Option<&str>,
    over_provision: bool,
) -> BrokerResult<&'a str> {
    let on_plan: Vec<_> = registry.nodes().filter(|n| n.plan == plan).collect();
    if on_plan.is_empty() {
        return Err(BrokerError::UnknownPlan(plan.to_string()));
    }

    let candidates: Vec<_> = match version {
        Some(v) => on_plan.into_iter().filter(|n| n.supports(v)).collect(),
        None => on_plan,
    };

    // Registry iterates in id order, so the first maximum is the smallest id.
    let best = candidates
        .into_iter()
        .reduce(|best, n| {
            if n.available_capacity > best.available_capacity {
                n
            } else {
                best
            }
        })
        .ok_or_else(|| BrokerError::UnsupportedVersion {
            plan: plan.to_string(),
            version: version.unwrap_or_default().to_string(),
        })?;

    if best.available_capacity > 0 || over_provision {
        Ok(best.id.as_str())
    } else {
        Err(BrokerError::NoAvailableNode(plan.to_string()))
    }
}

/// Select a node and reserve one capacity unit on it.
///
/// The pending counter is incremented and the node's capacity decremented by
/// its unit under one lock. The returned guard releases the pending count;
/// capacity is corrected by the node's next trusted announcement.
pub fn reserve(
    registry: &SharedRegistry,
    plan: &str,
    version: Option<&str>,
    over_provision: bool,
) -> BrokerResult<PendingGuard> {
    let mut locked = registry.lock();
    let node_id = select_node(&locked, plan, version, over_provision)?.to_string();

    let guard = PendingGuard::begin(registry, &mut locked, &node_id);
    let pending = locked.pending(&node_id);
    if let Some(node) = locked.get_mut(&node_id) {
        node.available_capacity -= node.capacity_unit;
        debug!(
            node_id = %node_id,
            remaining = node.available_capacity,
            pending,
            "Reserved capacity"
        );
    }
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use brokerd_messages::types::Announcement;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn registry_with(nodes: &[(&str, &str, i64, &[&str])]) -> NodeRegistry {
        let mut reg = NodeRegistry::new();
        for (id, plan, cap, versions) in nodes {
            reg.announce(
                Announcement {
                    id: id.to_string(),
                    plan: plan.to_string(),
                    available_capacity: *cap,
                    capacity_unit: 1,
                    supported_versions: versions.iter().map(|v| v.to_string()).collect(),
                },
                Instant::now(),
            );
        }
        reg
    }

    #[test]
    fn test_picks_highest_capacity() {
        let reg = registry_with(&[("a", "free", 1, &["1.0"]), ("b", "free", 2, &["1.0"])]);
        assert_eq!(select_node(&reg, "free", Some("1.0"), false).unwrap(), "b");
    }

    #[test]
    fn test_tie_goes_to_smallest_id() {
        let reg = registry_with(&[("n2", "free", 3, &["1.0"]), ("n1", "free", 3, &["1.0"])]);
        assert_eq!(select_node(&reg, "free", None, false).unwrap(), "n1");
    }

    #[test]
    fn test_exhausted_requires_over_provisioning() {
        let reg = registry_with(&[("a", "free", -1, &["1.0"])]);
        assert!(matches!(
            select_node(&reg, "free", Some("1.0"), false),
            Err(BrokerError::NoAvailableNode(_))
        ));
        assert_eq!(select_node(&reg, "free", Some("1.0"), true).unwrap(), "a");
    }

    #[test]
    fn test_unknown_plan_and_unsupported_version() {
        let reg = registry_with(&[("a", "free", 3, &["1.0"])]);
        assert!(matches!(
            select_node(&reg, "large", None, false),
            Err(BrokerError::UnknownPlan(p)) if p == "large"
        ));
        assert!(matches!(
            select_node(&reg, "free", Some("2.0"), false),
            Err(BrokerError::UnsupportedVersion { version, .. }) if version == "2.0"
        ));
    }

    #[test]
    fn test_reserve_decrements_by_unit() {
        let mut reg = registry_with(&[("a", "free", 5, &["1.0"])]);
        reg.get_mut("a").unwrap().capacity_unit = 2;
        let shared: SharedRegistry = Arc::new(Mutex::new(reg));

        let guard = reserve(&shared, "free", None, false).unwrap();
        assert_eq!(guard.node_id(), "a");
        assert_eq!(shared.lock().get("a").unwrap().available_capacity, 3);
        assert_eq!(shared.lock().pending("a"), 1);
        drop(guard);
        assert_eq!(shared.lock().pending("a"), 0);
    }

    #[derive(Debug, Clone)]
    enum Event {
        Provision,
        Announce(i64),
        Complete,
    }

    fn event() -> impl Strategy<Value = Event> {
        prop_oneof![
            Just(Event::Provision),
            (-5i64..20).prop_map(Event::Announce),
            Just(Event::Complete),
        ]
    }

    proptest! {
        /// While any request is outstanding, announcements never raise or
        /// lower capacity below what the last reservation left.
        #[test]
        fn prop_outstanding_requests_pin_capacity(events in proptest::collection::vec(event(), 1..60)) {
            let shared: SharedRegistry =
                Arc::new(Mutex::new(registry_with(&[("n", "free", 10, &["1.0"])])));
            let mut guards = Vec::new();
            let mut reserved_at: Option<i64> = None;

            for ev in events {
                match ev {
                    Event::Provision => {
                        if let Ok(guard) = reserve(&shared, "free", None, true) {
                            reserved_at = Some(shared.lock().get("n").unwrap().available_capacity);
                            guards.push(guard);
                        }
                    }
                    Event::Announce(cap) => {
                        shared.lock().announce(
                            Announcement {
                                id: "n".to_string(),
                                plan: "free".to_string(),
                                available_capacity: cap,
                                capacity_unit: 1,
                                supported_versions: vec!["1.0".to_string()],
                            },
                            Instant::now(),
                        );
                    }
                    Event::Complete => {
                        if !guards.is_empty() {
                            guards.remove(0);
                        }
                    }
                }

                let reg = shared.lock();
                prop_assert_eq!(reg.pending("n") as usize, guards.len());
                if !guards.is_empty() {
                    let at = reserved_at.unwrap();
                    prop_assert_eq!(reg.get("n").unwrap().available_capacity, at);
                }
            }
        }
    }
}
