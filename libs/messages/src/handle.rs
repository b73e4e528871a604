//! Canonical instance and binding handles.
//!
//! A handle is what the canonical store keeps per provisioned instance and
//! per binding. Both share one shape; an instance handle is the one whose
//! `service_id` equals its credentials' `name`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque credential map returned by a node.
///
/// The provisioner only ever reads `name`, `node_id` and `username`/`user`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(Map<String, Value>);

impl Credentials {
    pub fn new() -> Self {
        Self(Map::new())
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Instance name on the owning node.
    pub fn name(&self) -> Option<&str> {
        self.str_field("name")
    }

    /// Node hosting the instance.
    pub fn node_id(&self) -> Option<&str> {
        self.str_field("node_id")
    }

    /// Binding user, falling back to the legacy `user` key.
    pub fn username(&self) -> Option<&str> {
        self.str_field("username").or_else(|| self.str_field("user"))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }
}

impl From<Map<String, Value>> for Credentials {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Whether a handle describes an instance or a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Instance,
    Binding,
}

/// A canonical handle as stored by the external handle store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHandle {
    pub service_id: String,
    #[serde(default)]
    pub configuration: Value,
    pub credentials: Credentials,
}

impl ServiceHandle {
    pub fn kind(&self) -> HandleKind {
        if self.credentials.name() == Some(self.service_id.as_str()) {
            HandleKind::Instance
        } else {
            HandleKind::Binding
        }
    }

    /// Name of the instance this handle belongs to (itself for instances).
    pub fn instance_name(&self) -> Option<&str> {
        self.credentials.name()
    }

    pub fn node_id(&self) -> Option<&str> {
        self.credentials.node_id()
    }

    /// Plan recorded in the handle's configuration.
    pub fn plan(&self) -> Option<&str> {
        self.configuration.get("plan").and_then(Value::as_str)
    }

    /// Version recorded in the handle's configuration.
    pub fn version(&self) -> Option<&str> {
        self.configuration.get("version").and_then(Value::as_str)
    }

    /// Options a binding was created with, if recorded.
    pub fn binding_options(&self) -> Option<&Value> {
        self.configuration
            .get("data")
            .and_then(|data| data.get("binding_options"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance() -> ServiceHandle {
        ServiceHandle {
            service_id: "d0b1".to_string(),
            configuration: json!({"plan": "free", "version": "5.7"}),
            credentials: Credentials::new().with("name", "d0b1").with("node_id", "node-a"),
        }
    }

    #[test]
    fn test_kind_follows_credentials_name() {
        let inst = instance();
        assert_eq!(inst.kind(), HandleKind::Instance);

        let binding = ServiceHandle {
            service_id: "bind_x".to_string(),
            configuration: json!({"data": {"binding_options": {"ro": true}}}),
            credentials: Credentials::new().with("name", "d0b1").with("user", "u1"),
        };
        assert_eq!(binding.kind(), HandleKind::Binding);
        assert_eq!(binding.instance_name(), Some("d0b1"));
        assert_eq!(binding.credentials.username(), Some("u1"));
        assert_eq!(binding.binding_options(), Some(&json!({"ro": true})));
    }

    #[test]
    fn test_configuration_accessors() {
        let inst = instance();
        assert_eq!(inst.plan(), Some("free"));
        assert_eq!(inst.version(), Some("5.7"));
        assert_eq!(inst.node_id(), Some("node-a"));
    }

    #[test]
    fn test_username_prefers_username_key() {
        let creds = Credentials::new().with("username", "a").with("user", "b");
        assert_eq!(creds.username(), Some("a"));
    }

    #[test]
    fn test_credentials_serialize_as_plain_map() {
        let creds = Credentials::new().with("name", "x");
        assert_eq!(serde_json::to_value(&creds).unwrap(), json!({"name": "x"}));
    }
}
