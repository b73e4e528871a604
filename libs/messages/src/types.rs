//! Request and reply payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codes::ErrorResponse;
use crate::handle::{Credentials, ServiceHandle};

fn default_capacity_unit() -> i64 {
    1
}

/// Periodic node announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: String,
    pub plan: String,
    pub available_capacity: i64,
    #[serde(default = "default_capacity_unit")]
    pub capacity_unit: i64,
    #[serde(default)]
    pub supported_versions: Vec<String>,
}

/// Empty broadcast asking nodes to announce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoverRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub plan: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindRequest {
    pub name: String,
    #[serde(default)]
    pub bind_opts: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnbindRequest {
    pub credentials: Credentials,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnprovisionRequest {
    pub name: String,
    #[serde(default)]
    pub bindings: Vec<Credentials>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub instance_id: String,
    pub backup_path: String,
}

/// Reply carrying only success or a node error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

impl SimpleResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: ErrorResponse) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }
}

/// Payload of the `{action}_instance` migration subjects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub instance: Credentials,
    #[serde(default)]
    pub bindings: Vec<Credentials>,
}

/// Reply to `update_instance`: the handles the node rewrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateInstanceResponse {
    pub success: bool,
    #[serde(default)]
    pub handles: Vec<ServiceHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

/// Empty broadcast asking nodes to report their handles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckOrphanRequest {}

/// A node's full local inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHandlesReport {
    pub node_id: String,
    #[serde(default)]
    pub instances_list: Vec<String>,
    #[serde(default)]
    pub bindings_list: Vec<Credentials>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PurgeOrphanRequest {
    #[serde(default)]
    pub orphan_ins_list: Vec<String>,
    #[serde(default)]
    pub orphan_binding_list: Vec<Credentials>,
}

impl PurgeOrphanRequest {
    pub fn is_empty(&self) -> bool {
        self.orphan_ins_list.is_empty() && self.orphan_binding_list.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode, encode, ErrorCode, MessageError};

    #[test]
    fn test_provision_request_skips_absent_optionals() {
        let req = ProvisionRequest {
            plan: "free".to_string(),
            credentials: None,
            version: Some("1.0".to_string()),
        };
        let json: Value = serde_json::from_slice(&encode(&req).unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"plan": "free", "version": "1.0"}));
    }

    #[test]
    fn test_missing_required_field_fails() {
        let err = decode::<ProvisionResponse>(br#"{"credentials": {}}"#).unwrap_err();
        assert!(matches!(err, MessageError::Decode(_)));
    }

    #[test]
    fn test_announcement_defaults() {
        let ann: Announcement =
            decode(br#"{"id": "n1", "plan": "free", "available_capacity": 3}"#).unwrap();
        assert_eq!(ann.capacity_unit, 1);
        assert!(ann.supported_versions.is_empty());
    }

    #[test]
    fn test_failed_reply_carries_error_envelope() {
        let reply = SimpleResponse::failed(ErrorCode::NotFound.response(Some("inst")));
        let back: SimpleResponse = decode(&encode(&reply).unwrap()).unwrap();
        assert!(!back.success);
        assert_eq!(back.error.unwrap().msg.code, 30300);
    }

    #[test]
    fn test_purge_request_emptiness() {
        let mut req = PurgeOrphanRequest::default();
        assert!(req.is_empty());
        req.orphan_ins_list.push("i1".to_string());
        assert!(!req.is_empty());
    }
}
