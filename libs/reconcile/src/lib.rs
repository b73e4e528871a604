//! Orphan reconciliation primitives.
//!
//! An orphan is an instance or binding a node still hosts although the
//! canonical store no longer knows it. Finding them is a two-snapshot
//! comparison:
//!
//! 1. **Stage**: each node's report is diffed against an [`ExpectedIndex`]
//!    built from the canonical handles; the difference is staged per node.
//! 2. **Confirm**: later, a freshly built index is applied to the staged
//!    candidates; only those still unknown become an [`OrphanSet`].
//!
//! Anything created between a node's report and the first snapshot shows up
//! in the second one and drops out.
//!
//! # Invariants
//!
//! - Staging a node's report replaces that node's previous candidates, so
//!   repeated reports within one sweep are idempotent and an entry that
//!   vanished from the node's own report is never confirmed.
//! - Confirmation only ever shrinks the staged set.
//! - Everything here is pure; no I/O, no clocks.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use brokerd_messages::types::{NodeHandlesReport, PurgeOrphanRequest};
use brokerd_messages::{Credentials, HandleKind, ServiceHandle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// An entry could not be sized for batching.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Reconciliation key of a binding: instance name immediately followed by the
/// binding user, no separator.
pub fn binding_key(instance_name: &str, username: &str) -> String {
    format!("{instance_name}{username}")
}

/// Reconciliation key from binding credentials, if they carry both parts.
pub fn binding_key_of(credentials: &Credentials) -> Option<String> {
    let name = credentials.name()?;
    let user = credentials.username()?;
    Some(binding_key(name, user))
}

/// The set of identities the canonical store knows about.
#[derive(Debug, Clone, Default)]
pub struct ExpectedIndex {
    instances: HashSet<String>,
    bindings: HashSet<String>,
}

impl ExpectedIndex {
    pub fn from_handles<'a, I>(handles: I) -> Self
    where
        I: IntoIterator<Item = &'a ServiceHandle>,
    {
        let mut index = Self::default();
        for handle in handles {
            match handle.kind() {
                HandleKind::Instance => {
                    index.instances.insert(handle.service_id.clone());
                }
                HandleKind::Binding => {
                    if let Some(key) = binding_key_of(&handle.credentials) {
                        index.bindings.insert(key);
                    }
                }
            }
        }
        index
    }

    pub fn has_instance(&self, instance_id: &str) -> bool {
        self.instances.contains(instance_id)
    }

    pub fn has_binding_key(&self, key: &str) -> bool {
        self.bindings.contains(key)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}

/// Per-node orphans, keyed by node id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrphanSet {
    #[serde(default)]
    pub instances: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub bindings: BTreeMap<String, Vec<Credentials>>,
}

impl OrphanSet {
    pub fn instance_count(&self) -> usize {
        self.instances.values().map(Vec::len).sum()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.instance_count() == 0 && self.binding_count() == 0
    }

    /// Nodes with at least one orphan.
    pub fn nodes(&self) -> BTreeSet<String> {
        self.instances
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(node, _)| node.clone())
            .chain(
                self.bindings
                    .iter()
                    .filter(|(_, list)| !list.is_empty())
                    .map(|(node, _)| node.clone()),
            )
            .collect()
    }

    /// Drop entries that went out in a purge batch for `node_id`.
    pub fn remove_purged(&mut self, node_id: &str, purged: &PurgeOrphanRequest) {
        if let Some(list) = self.instances.get_mut(node_id) {
            list.retain(|id| !purged.orphan_ins_list.contains(id));
            if list.is_empty() {
                self.instances.remove(node_id);
            }
        }
        if let Some(list) = self.bindings.get_mut(node_id) {
            list.retain(|creds| !purged.orphan_binding_list.contains(creds));
            if list.is_empty() {
                self.bindings.remove(node_id);
            }
        }
    }
}

/// Candidates counted when a report is staged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagedCounts {
    pub instances: usize,
    pub bindings: usize,
}

/// Candidates gathered during phase one of a sweep.
#[derive(Debug, Clone, Default)]
pub struct OrphanStaging {
    candidates: OrphanSet,
    reported: BTreeSet<String>,
}

impl OrphanStaging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `reported - expected` for the reporting node.
    pub fn stage(&mut self, report: &NodeHandlesReport, expected: &ExpectedIndex) -> StagedCounts {
        let mut seen = HashSet::new();
        let instances: Vec<String> = report
            .instances_list
            .iter()
            .filter(|id| !expected.has_instance(id) && seen.insert(id.as_str()))
            .cloned()
            .collect();

        // Bindings are identified by their reconciliation key.
        let mut seen = HashSet::new();
        let bindings: Vec<Credentials> = report
            .bindings_list
            .iter()
            .filter(|creds| match binding_key_of(creds) {
                Some(key) => !expected.has_binding_key(&key) && seen.insert(key),
                None => false,
            })
            .cloned()
            .collect();

        let counts = StagedCounts {
            instances: instances.len(),
            bindings: bindings.len(),
        };

        self.reported.insert(report.node_id.clone());
        self.candidates
            .instances
            .insert(report.node_id.clone(), instances);
        self.candidates
            .bindings
            .insert(report.node_id.clone(), bindings);
        counts
    }

    /// Phase two: keep only candidates still absent from `expected`.
    pub fn confirm(&self, expected: &ExpectedIndex) -> OrphanSet {
        let mut confirmed = OrphanSet::default();

        for (node, list) in &self.candidates.instances {
            let still: Vec<String> = list
                .iter()
                .filter(|id| !expected.has_instance(id))
                .cloned()
                .collect();
            if !still.is_empty() {
                confirmed.instances.insert(node.clone(), still);
            }
        }

        for (node, list) in &self.candidates.bindings {
            let still: Vec<Credentials> = list
                .iter()
                .filter(|creds| {
                    binding_key_of(creds).is_some_and(|key| !expected.has_binding_key(&key))
                })
                .cloned()
                .collect();
            if !still.is_empty() {
                confirmed.bindings.insert(node.clone(), still);
            }
        }

        confirmed
    }

    pub fn candidates(&self) -> &OrphanSet {
        &self.candidates
    }

    /// Nodes whose report arrived during this sweep.
    pub fn reported_nodes(&self) -> usize {
        self.reported.len()
    }
}

/// Split a node's orphans into purge requests whose encoded size stays within
/// `max_payload_bytes`.
///
/// Sizes are estimated as the encoded empty request plus each entry's encoded
/// length and one separator byte, which never underestimates. An entry too big
/// to fit even alone is sent in a batch of its own.
pub fn purge_batches(
    instances: &[String],
    bindings: &[Credentials],
    max_payload_bytes: usize,
) -> Result<Vec<PurgeOrphanRequest>, ReconcileError> {
    let base = serde_json::to_vec(&PurgeOrphanRequest::default())?.len();

    let mut batches = Vec::new();
    let mut current = PurgeOrphanRequest::default();
    let mut size = base;

    for id in instances {
        let cost = serde_json::to_vec(id)?.len() + 1;
        if size + cost > max_payload_bytes && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            size = base;
        }
        current.orphan_ins_list.push(id.clone());
        size += cost;
    }

    for creds in bindings {
        let cost = serde_json::to_vec(creds)?.len() + 1;
        if size + cost > max_payload_bytes && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            size = base;
        }
        current.orphan_binding_list.push(creds.clone());
        size += cost;
    }

    if !current.is_empty() {
        batches.push(current);
    }
    Ok(batches)
}

/// Default delay between staging and confirmation.
pub const DEFAULT_CONFIRM_DELAY: std::time::Duration = std::time::Duration::from_secs(300);

/// Default bound on a single purge message.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn instance(id: &str) -> ServiceHandle {
        ServiceHandle {
            service_id: id.to_string(),
            configuration: json!({"plan": "free"}),
            credentials: Credentials::new().with("name", id).with("node_id", "n1"),
        }
    }

    fn binding(id: &str, instance: &str, user: &str) -> ServiceHandle {
        ServiceHandle {
            service_id: id.to_string(),
            configuration: json!({}),
            credentials: binding_creds(instance, user),
        }
    }

    fn binding_creds(instance: &str, user: &str) -> Credentials {
        Credentials::new()
            .with("name", instance)
            .with("username", user)
            .with("node_id", "n1")
    }

    fn report(node: &str, instances: &[&str], bindings: Vec<Credentials>) -> NodeHandlesReport {
        NodeHandlesReport {
            node_id: node.to_string(),
            instances_list: instances.iter().map(|s| s.to_string()).collect(),
            bindings_list: bindings,
        }
    }

    #[test]
    fn test_expected_index_keys() {
        let handles = vec![instance("i1"), binding("b1", "i1", "alice")];
        let index = ExpectedIndex::from_handles(&handles);

        assert!(index.has_instance("i1"));
        assert!(!index.has_instance("b1"));
        assert!(index.has_binding_key("i1alice"));
        assert_eq!(index.instance_count(), 1);
        assert_eq!(index.binding_count(), 1);
    }

    #[rstest]
    #[case("ab", "c", "abc")]
    #[case("a", "bc", "abc")]
    #[case("", "u", "u")]
    fn test_binding_key_is_plain_concatenation(
        #[case] name: &str,
        #[case] user: &str,
        #[case] key: &str,
    ) {
        assert_eq!(binding_key(name, user), key);
    }

    #[test]
    fn test_stage_records_difference() {
        let handles = vec![instance("i1"), binding("b1", "i1", "alice")];
        let index = ExpectedIndex::from_handles(&handles);
        let mut staging = OrphanStaging::new();

        let counts = staging.stage(
            &report(
                "n1",
                &["i1", "i2"],
                vec![binding_creds("i1", "alice"), binding_creds("i2", "bob")],
            ),
            &index,
        );

        assert_eq!(counts, StagedCounts { instances: 1, bindings: 1 });
        assert_eq!(staging.candidates().instances["n1"], vec!["i2".to_string()]);
        assert_eq!(staging.reported_nodes(), 1);
    }

    #[test]
    fn test_bindings_without_user_are_skipped() {
        let index = ExpectedIndex::default();
        let mut staging = OrphanStaging::new();
        let nameless = Credentials::new().with("name", "i9");

        let counts = staging.stage(&report("n1", &[], vec![nameless]), &index);
        assert_eq!(counts.bindings, 0);
    }

    #[test]
    fn test_duplicate_entries_in_one_report_staged_once() {
        let expected = ExpectedIndex::default();
        let mut staging = OrphanStaging::new();
        let same_key = binding_creds("i1", "u1").with("password", "other");

        let counts = staging.stage(
            &report(
                "n1",
                &["ghost", "ghost", "other", "ghost"],
                vec![binding_creds("i1", "u1"), same_key, binding_creds("i1", "u2")],
            ),
            &expected,
        );

        assert_eq!(counts.instances, 2);
        assert_eq!(counts.bindings, 2);
        assert_eq!(
            staging.candidates().instances["n1"],
            vec!["ghost".to_string(), "other".to_string()]
        );
    }

    #[test]
    fn test_repeated_report_is_idempotent() {
        let index = ExpectedIndex::default();
        let mut staging = OrphanStaging::new();

        staging.stage(&report("n1", &["i1", "i1"], vec![]), &index);
        staging.stage(&report("n1", &["i1"], vec![]), &index);

        assert_eq!(staging.candidates().instance_count(), 1);
    }

    #[test]
    fn test_candidate_missing_from_later_report_is_not_confirmed() {
        let index = ExpectedIndex::default();
        let mut staging = OrphanStaging::new();

        staging.stage(&report("n1", &["i1", "i2"], vec![]), &index);
        staging.stage(&report("n1", &["i2"], vec![]), &index);

        let confirmed = staging.confirm(&index);
        assert_eq!(confirmed.instances["n1"], vec!["i2".to_string()]);
    }

    #[test]
    fn test_confirm_drops_entries_created_in_between() {
        let mut staging = OrphanStaging::new();
        staging.stage(
            &report("n1", &["i1", "i2"], vec![binding_creds("i1", "alice")]),
            &ExpectedIndex::default(),
        );

        let later = vec![instance("i1"), binding("b1", "i1", "alice")];
        let confirmed = staging.confirm(&ExpectedIndex::from_handles(&later));

        assert_eq!(confirmed.instances["n1"], vec!["i2".to_string()]);
        assert!(confirmed.bindings.is_empty());
        assert_eq!(confirmed.nodes().len(), 1);
    }

    #[test]
    fn test_remove_purged() {
        let mut set = OrphanSet::default();
        set.instances
            .insert("n1".to_string(), vec!["a".to_string(), "b".to_string()]);

        set.remove_purged(
            "n1",
            &PurgeOrphanRequest {
                orphan_ins_list: vec!["a".to_string(), "b".to_string()],
                orphan_binding_list: vec![],
            },
        );
        assert!(set.is_empty());
        assert!(set.instances.is_empty());
    }

    #[test]
    fn test_purge_batches_respect_payload_bound() {
        let ids: Vec<String> = (0..50).map(|i| format!("instance-{i:04}")).collect();
        let max = 200;

        let batches = purge_batches(&ids, &[], max).unwrap();

        assert!(batches.len() > 1);
        let total: usize = batches.iter().map(|b| b.orphan_ins_list.len()).sum();
        assert_eq!(total, ids.len());
        for batch in &batches {
            assert!(serde_json::to_vec(batch).unwrap().len() <= max);
        }
    }

    #[test]
    fn test_purge_batches_mix_instances_and_bindings() {
        let ids = vec!["i1".to_string()];
        let creds = vec![binding_creds("i1", "alice")];

        let batches = purge_batches(&ids, &creds, DEFAULT_MAX_PAYLOAD_BYTES).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].orphan_binding_list.len(), 1);
    }

    #[test]
    fn test_oversized_entry_gets_own_batch() {
        let ids = vec!["x".repeat(100), "y".to_string()];
        let batches = purge_batches(&ids, &[], 60).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].orphan_ins_list, vec!["y".to_string()]);
    }

    #[test]
    fn test_no_orphans_no_batches() {
        assert!(purge_batches(&[], &[], 100).unwrap().is_empty());
    }
}
