use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use brokerd_bus::{BusError, Envelope, LocalBus, MessageBus, Subscription};
use brokerd_messages::types::{
    Announcement, BindRequest, BindResponse, MigrationRequest, NodeHandlesReport,
    ProvisionRequest, ProvisionResponse, PurgeOrphanRequest, RestoreRequest, SimpleResponse,
    UnbindRequest, UnprovisionRequest, UpdateInstanceResponse,
};
use brokerd_messages::{
    decode, encode, Credentials, ErrorCode, ErrorResponse, ServiceHandle, Subjects,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;

const MIGRATION_ACTIONS: [&str; 5] = ["disable", "enable", "import", "update", "cleanupnfs"];

/// One request a fake node received.
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub subject: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Provision,
    Unprovision,
    Bind,
    Unbind,
    Restore,
    Migrate,
    CheckOrphan,
    PurgeOrphan,
    Discover,
}

#[derive(Default)]
struct Script {
    silent: bool,
    delay: Option<Duration>,
    fail_provision: Option<ErrorResponse>,
    fail_restore: Option<ErrorResponse>,
    fail_bind: Option<ErrorResponse>,
    fail_bind_users: Vec<String>,
    update_handles: Vec<ServiceHandle>,
}

#[derive(Default)]
struct NodeState {
    capacity: i64,
    capacity_unit: i64,
    versions: Vec<String>,
    script: Script,
    instances: BTreeMap<String, Credentials>,
    bindings: Vec<Credentials>,
    stray_instances: Vec<String>,
    stray_bindings: Vec<Credentials>,
    received: Vec<Received>,
    purges: Vec<PurgeOrphanRequest>,
    seq: u64,
}

impl NodeState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

struct Inner {
    id: String,
    plan: String,
    subjects: Subjects,
    bus: LocalBus,
    state: Mutex<NodeState>,
}

/// A worker node living on a [`LocalBus`].
///
/// Dropping the node stops its listeners.
pub struct FakeNode {
    inner: Arc<Inner>,
    tasks: Vec<JoinHandle<()>>,
}

impl FakeNode {
    /// Subscribe to every subject a node of `plan` answers. Starts with
    /// capacity 10, unit 1, supporting version `1.0`.
    pub async fn start(
        bus: &LocalBus,
        service: &str,
        id: &str,
        plan: &str,
    ) -> Result<Self, BusError> {
        let subjects = Subjects::new(service);
        let mut subscriptions = vec![
            (Op::Provision, bus.subscribe(&subjects.provision(id)).await?),
            (Op::Unprovision, bus.subscribe(&subjects.unprovision(id)).await?),
            (Op::Bind, bus.subscribe(&subjects.bind(id)).await?),
            (Op::Unbind, bus.subscribe(&subjects.unbind(id)).await?),
            (Op::Restore, bus.subscribe(&subjects.restore(id)).await?),
            (Op::CheckOrphan, bus.subscribe(&subjects.check_orphan()).await?),
            (Op::PurgeOrphan, bus.subscribe(&subjects.purge_orphan(id)).await?),
            (Op::Discover, bus.subscribe(&subjects.discover()).await?),
        ];
        for action in MIGRATION_ACTIONS {
            subscriptions.push((
                Op::Migrate,
                bus.subscribe(&subjects.migration(action, id)).await?,
            ));
        }

        let inner = Arc::new(Inner {
            id: id.to_string(),
            plan: plan.to_string(),
            subjects,
            bus: bus.clone(),
            state: Mutex::new(NodeState {
                capacity: 10,
                capacity_unit: 1,
                versions: vec!["1.0".to_string()],
                ..NodeState::default()
            }),
        });

        let tasks = subscriptions
            .into_iter()
            .map(|(op, sub)| tokio::spawn(listen(inner.clone(), op, sub)))
            .collect();

        Ok(Self { inner, tasks })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn plan(&self) -> &str {
        &self.inner.plan
    }

    /// Publish an announcement with the current capacity.
    pub async fn announce(&self) {
        announce(&self.inner).await;
    }

    pub fn set_capacity(&self, capacity: i64) {
        self.inner.state.lock().capacity = capacity;
    }

    pub fn set_capacity_unit(&self, unit: i64) {
        self.inner.state.lock().capacity_unit = unit;
    }

    pub fn set_versions(&self, versions: &[&str]) {
        self.inner.state.lock().versions = versions.iter().map(|v| v.to_string()).collect();
    }

    /// Stop replying to per-node requests. Requests are still recorded.
    pub fn set_silent(&self, silent: bool) {
        self.inner.state.lock().script.silent = silent;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        self.inner.state.lock().script.delay = delay;
    }

    pub fn fail_provision(&self, error: Option<ErrorResponse>) {
        self.inner.state.lock().script.fail_provision = error;
    }

    pub fn fail_restore(&self, error: Option<ErrorResponse>) {
        self.inner.state.lock().script.fail_restore = error;
    }

    /// Fail every bind.
    pub fn fail_binds(&self, error: Option<ErrorResponse>) {
        self.inner.state.lock().script.fail_bind = error;
    }

    /// Fail binds that try to reuse this username.
    pub fn fail_bind_for_user(&self, username: &str) {
        self.inner
            .state
            .lock()
            .script
            .fail_bind_users
            .push(username.to_string());
    }

    /// Handles returned by `update_instance`.
    pub fn set_update_handles(&self, handles: Vec<ServiceHandle>) {
        self.inner.state.lock().script.update_handles = handles;
    }

    /// Add an instance the node hosts but nobody asked for.
    pub fn add_stray_instance(&self, name: &str) {
        self.inner.state.lock().stray_instances.push(name.to_string());
    }

    /// Add a binding the node hosts but nobody asked for.
    pub fn add_stray_binding(&self, credentials: Credentials) {
        self.inner.state.lock().stray_bindings.push(credentials);
    }

    pub fn remove_stray_instance(&self, name: &str) {
        self.inner.state.lock().stray_instances.retain(|n| n != name);
    }

    /// Seed a hosted instance without going through provision.
    pub fn host_instance(&self, credentials: Credentials) {
        if let Some(name) = credentials.name().map(str::to_owned) {
            self.inner.state.lock().instances.insert(name, credentials);
        }
    }

    pub fn instances(&self) -> Vec<String> {
        self.inner.state.lock().instances.keys().cloned().collect()
    }

    pub fn bindings(&self) -> Vec<Credentials> {
        self.inner.state.lock().bindings.clone()
    }

    pub fn purges(&self) -> Vec<PurgeOrphanRequest> {
        self.inner.state.lock().purges.clone()
    }

    pub fn received(&self) -> Vec<Received> {
        self.inner.state.lock().received.clone()
    }

    /// Requests received on subjects containing `fragment`.
    pub fn received_on(&self, fragment: &str) -> Vec<Received> {
        self.inner
            .state
            .lock()
            .received
            .iter()
            .filter(|r| r.subject.contains(fragment))
            .cloned()
            .collect()
    }
}

impl Drop for FakeNode {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn listen(inner: Arc<Inner>, op: Op, mut sub: Subscription) {
    while let Some(envelope) = sub.next().await {
        let inner = inner.clone();
        tokio::spawn(async move { handle(&inner, op, envelope).await });
    }
}

async fn handle(inner: &Inner, op: Op, envelope: Envelope) {
    let payload = serde_json::from_slice(&envelope.payload).unwrap_or(serde_json::Value::Null);
    let (silent, delay) = {
        let mut state = inner.state.lock();
        state.received.push(Received {
            subject: envelope.subject.clone(),
            payload,
        });
        (state.script.silent, state.script.delay)
    };

    match op {
        Op::Discover => return announce(inner).await,
        Op::CheckOrphan => return report_handles(inner).await,
        _ => {}
    }

    if silent {
        debug!(node = %inner.id, subject = %envelope.subject, "Fake node staying silent");
        return;
    }
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let Some(reply_to) = envelope.reply_to.as_deref() else {
        if op == Op::PurgeOrphan {
            on_purge(inner, &envelope.payload);
        }
        return;
    };

    match op {
        Op::Provision => respond(inner, reply_to, &envelope.payload, on_provision).await,
        Op::Bind => respond(inner, reply_to, &envelope.payload, on_bind).await,
        Op::Unbind => respond(inner, reply_to, &envelope.payload, on_unbind).await,
        Op::Unprovision => respond(inner, reply_to, &envelope.payload, on_unprovision).await,
        Op::Restore => respond(inner, reply_to, &envelope.payload, on_restore).await,
        Op::Migrate if envelope.subject.contains(".update_instance.") => {
            respond(inner, reply_to, &envelope.payload, on_update).await
        }
        Op::Migrate => respond(inner, reply_to, &envelope.payload, on_migrate).await,
        Op::PurgeOrphan => {
            on_purge(inner, &envelope.payload);
            reply(inner, reply_to, &SimpleResponse::ok()).await;
        }
        Op::CheckOrphan | Op::Discover => {}
    }
}

async fn respond<Req, Resp>(
    inner: &Inner,
    reply_to: &str,
    payload: &[u8],
    handler: fn(&Inner, Req) -> Resp,
) where
    Req: DeserializeOwned,
    Resp: Serialize,
{
    match decode::<Req>(payload) {
        Ok(request) => {
            let response = handler(inner, request);
            reply(inner, reply_to, &response).await;
        }
        Err(e) => {
            let response = SimpleResponse::failed(
                ErrorCode::MalformattedRequest.response(Some(&e.to_string())),
            );
            reply(inner, reply_to, &response).await;
        }
    }
}

async fn reply<T: Serialize>(inner: &Inner, reply_to: &str, message: &T) {
    if let Ok(bytes) = encode(message) {
        let _ = inner.bus.publish(reply_to, bytes).await;
    }
}

async fn announce(inner: &Inner) {
    let announcement = {
        let state = inner.state.lock();
        Announcement {
            id: inner.id.clone(),
            plan: inner.plan.clone(),
            available_capacity: state.capacity,
            capacity_unit: state.capacity_unit,
            supported_versions: state.versions.clone(),
        }
    };
    if let Ok(bytes) = encode(&announcement) {
        let _ = inner.bus.publish(&inner.subjects.announce(), bytes).await;
    }
}

async fn report_handles(inner: &Inner) {
    let report = {
        let state = inner.state.lock();
        NodeHandlesReport {
            node_id: inner.id.clone(),
            instances_list: state
                .instances
                .keys()
                .cloned()
                .chain(state.stray_instances.iter().cloned())
                .collect(),
            bindings_list: state
                .bindings
                .iter()
                .chain(state.stray_bindings.iter())
                .cloned()
                .collect(),
        }
    };
    if let Ok(bytes) = encode(&report) {
        let _ = inner.bus.publish(&inner.subjects.node_handles(), bytes).await;
    }
}

fn on_provision(inner: &Inner, request: ProvisionRequest) -> ProvisionResponse {
    let mut state = inner.state.lock();
    if let Some(error) = state.script.fail_provision.clone() {
        return ProvisionResponse {
            success: false,
            credentials: None,
            error: Some(error),
        };
    }

    let seq = state.next_seq();
    let name = request
        .credentials
        .as_ref()
        .and_then(|c| c.name())
        .map(str::to_owned)
        .unwrap_or_else(|| format!("{}-ins-{seq}", inner.id));
    let credentials = Credentials::new()
        .with("name", name.clone())
        .with("node_id", inner.id.clone())
        .with("host", "127.0.0.1")
        .with("port", 5000 + seq)
        .with("plan", request.plan);
    state.instances.insert(name, credentials.clone());
    state.capacity -= state.capacity_unit;

    ProvisionResponse {
        success: true,
        credentials: Some(credentials),
        error: None,
    }
}

fn on_bind(inner: &Inner, request: BindRequest) -> BindResponse {
    let mut state = inner.state.lock();
    let reused = request
        .credentials
        .as_ref()
        .and_then(|c| c.username())
        .map(str::to_owned);

    let failure = state.script.fail_bind.clone().or_else(|| {
        reused
            .as_ref()
            .filter(|u| state.script.fail_bind_users.contains(u))
            .map(|u| ErrorCode::InternalError.response(Some(&format!("cannot bind {u}"))))
    });
    if let Some(error) = failure {
        return BindResponse {
            success: false,
            credentials: None,
            error: Some(error),
        };
    }
    if !state.instances.contains_key(&request.name) {
        return BindResponse {
            success: false,
            credentials: None,
            error: Some(ErrorCode::NotFound.response(Some(&request.name))),
        };
    }

    let seq = state.next_seq();
    let username = reused.unwrap_or_else(|| format!("u{seq}"));
    let credentials = Credentials::new()
        .with("name", request.name)
        .with("node_id", inner.id.clone())
        .with("user", username.clone())
        .with("username", username)
        .with("password", format!("secret-{seq}"));
    state.bindings.push(credentials.clone());

    BindResponse {
        success: true,
        credentials: Some(credentials),
        error: None,
    }
}

fn on_unbind(inner: &Inner, request: UnbindRequest) -> SimpleResponse {
    let mut state = inner.state.lock();
    let name = request.credentials.name();
    let user = request.credentials.username();
    state
        .bindings
        .retain(|b| b.name() != name || b.username() != user);
    SimpleResponse::ok()
}

fn on_unprovision(inner: &Inner, request: UnprovisionRequest) -> SimpleResponse {
    let mut state = inner.state.lock();
    if state.instances.remove(&request.name).is_none() {
        return SimpleResponse::failed(ErrorCode::NotFound.response(Some(&request.name)));
    }
    state
        .bindings
        .retain(|b| b.name() != Some(request.name.as_str()));
    state.capacity += state.capacity_unit;
    SimpleResponse::ok()
}

fn on_restore(inner: &Inner, request: RestoreRequest) -> SimpleResponse {
    let state = inner.state.lock();
    if let Some(error) = state.script.fail_restore.clone() {
        return SimpleResponse::failed(error);
    }
    if !state.instances.contains_key(&request.instance_id) {
        return SimpleResponse::failed(ErrorCode::NotFound.response(Some(&request.instance_id)));
    }
    SimpleResponse::ok()
}

fn on_migrate(_inner: &Inner, _request: MigrationRequest) -> SimpleResponse {
    SimpleResponse::ok()
}

fn on_update(inner: &Inner, _request: MigrationRequest) -> UpdateInstanceResponse {
    UpdateInstanceResponse {
        success: true,
        handles: inner.state.lock().script.update_handles.clone(),
        error: None,
    }
}

fn on_purge(inner: &Inner, payload: &[u8]) {
    let Ok(request) = decode::<PurgeOrphanRequest>(payload) else {
        return;
    };
    let mut state = inner.state.lock();
    state
        .stray_instances
        .retain(|n| !request.orphan_ins_list.contains(n));
    state
        .stray_bindings
        .retain(|b| !request.orphan_binding_list.contains(b));
    state.purges.push(request);
}
