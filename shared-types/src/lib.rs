//! Shared types between master, workers and tool clients
//!
//! These types are used by both:
//! - the master registry/router
//! - the worker runtime hosting tool adapters
//!
//! Serializable with serde for JSON over HTTP

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field carrying the session key in every per-tool request body.
pub const INSTANCE_ID_FIELD: &str = "instance_id";

// ============================================================================
// Tool Surface
// ============================================================================

/// The four operations every tool exposes under `/{tool}/{verb}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolVerb {
    Create,
    Execute,
    Release,
    CalcReward,
}

impl ToolVerb {
    pub const ALL: [ToolVerb; 4] = [
        ToolVerb::Create,
        ToolVerb::Execute,
        ToolVerb::Release,
        ToolVerb::CalcReward,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolVerb::Create => "create",
            ToolVerb::Execute => "execute",
            ToolVerb::Release => "release",
            ToolVerb::CalcReward => "calc_reward",
        }
    }

    /// Path of this verb for `tool`, relative to a server base URL.
    pub fn path_for(&self, tool: &str) -> String {
        format!("/{tool}/{}", self.as_str())
    }
}

impl fmt::Display for ToolVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVerb(pub String);

impl fmt::Display for UnknownVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown tool operation '{}'", self.0)
    }
}

impl std::error::Error for UnknownVerb {}

impl FromStr for ToolVerb {
    type Err = UnknownVerb;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolVerb::ALL
            .into_iter()
            .find(|verb| verb.as_str() == s)
            .ok_or_else(|| UnknownVerb(s.to_string()))
    }
}

/// Body of `POST /{tool}/create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CreateInput {
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub identity: Option<Value>,
}

/// Body of `POST /{tool}/release` and `POST /{tool}/calc_reward`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstanceRequest {
    #[serde(default)]
    pub instance_id: Option<String>,
}

/// Result of `execute`: `(response_text, incremental_reward, metrics)`.
///
/// Serialized as a three element JSON array, which is what tool clients
/// expect back from `/{tool}/execute`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecuteOutput(pub String, pub f64, pub Map<String, Value>);

impl ExecuteOutput {
    pub fn new(text: impl Into<String>, reward: f64, metrics: Map<String, Value>) -> Self {
        Self(text.into(), reward, metrics)
    }

    pub fn text(&self) -> &str {
        &self.0
    }

    pub fn reward(&self) -> f64 {
        self.1
    }

    pub fn metrics(&self) -> &Map<String, Value> {
        &self.2
    }
}

/// Read the session key out of an arbitrary request body.
///
/// Empty strings count as missing.
pub fn instance_id_of(body: &Value) -> Option<&str> {
    body.get(INSTANCE_ID_FIELD)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

// ============================================================================
// Replies
// ============================================================================

/// The `{success, result|message|error}` envelope used by control-plane
/// routes and by `create`/`release`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiReply {
    pub fn ok() -> Self {
        Self {
            success: true,
            result: None,
            message: None,
            error: None,
        }
    }

    pub fn with_result(result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::ok()
        }
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            message: None,
            error: Some(error.into()),
        }
    }
}

// ============================================================================
// Worker ↔ Master Control Plane
// ============================================================================

/// Body of `POST /register_worker`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerRegistration {
    pub worker_id: String,
    pub worker_url: String,
    pub tools: Vec<String>,
    /// Free-form diagnostics (hostname, ip, port, ...).
    #[serde(default)]
    pub host_info: Option<Value>,
}

/// Body of `POST /worker_heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Heartbeat {
    pub worker_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub instance_count: Option<usize>,
}

/// Body of `POST /unregister_worker`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Unregistration {
    pub worker_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Alive,
    Dead,
}

/// Per-worker entry of the master health report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerSummary {
    pub url: String,
    pub tools: Vec<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub status: Liveness,
    /// Bindings the master currently routes to this worker.
    pub instance_count: usize,
    /// Count the worker reported in its last heartbeat, if any.
    #[serde(default)]
    pub reported_instances: Option<usize>,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub host_info: Option<Value>,
}

/// `GET /health` on the master.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MasterHealth {
    pub status: String,
    pub tools: Vec<String>,
    pub registered_workers: usize,
    pub workers: BTreeMap<String, WorkerSummary>,
    pub instance_mappings: usize,
}

/// `GET /health` on a worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerHealth {
    pub status: String,
    pub worker_id: String,
    pub tools: Vec<String>,
    pub is_registered: bool,
    pub master_url: Option<String>,
    pub instance_count: usize,
}

/// `POST /register_to_master` on a worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterTriggerReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_verb_parses_path_segments() {
        assert_eq!("create".parse::<ToolVerb>(), Ok(ToolVerb::Create));
        assert_eq!("calc_reward".parse::<ToolVerb>(), Ok(ToolVerb::CalcReward));
        assert!("calcReward".parse::<ToolVerb>().is_err());
        assert_eq!(ToolVerb::Release.path_for("Foo"), "/Foo/release");
    }

    #[test]
    fn test_execute_output_is_a_json_triple() {
        let mut metrics = Map::new();
        metrics.insert("operation_count".to_string(), json!(1));
        let output = ExecuteOutput::new("ok", 0.1, metrics);

        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value, json!(["ok", 0.1, {"operation_count": 1}]));

        let back: ExecuteOutput = serde_json::from_value(value).unwrap();
        assert_eq!(back.text(), "ok");
        assert_eq!(back.metrics()["operation_count"], 1);
    }

    #[test]
    fn test_api_reply_omits_absent_fields() {
        let value = serde_json::to_value(ApiReply::failure("boom")).unwrap();
        assert_eq!(value, json!({"success": false, "error": "boom"}));

        let value = serde_json::to_value(ApiReply::with_result(json!("x-1"))).unwrap();
        assert_eq!(value, json!({"success": true, "result": "x-1"}));
    }

    #[test]
    fn test_registration_host_info_is_optional() {
        let reg: WorkerRegistration = serde_json::from_value(json!({
            "worker_id": "w1",
            "worker_url": "http://10.0.0.2:8001",
            "tools": ["ArithmeticTool"]
        }))
        .unwrap();
        assert!(reg.host_info.is_none());
        assert_eq!(reg.tools, vec!["ArithmeticTool".to_string()]);
    }

    #[test]
    fn test_instance_id_of_ignores_empty_and_non_string() {
        assert_eq!(instance_id_of(&json!({"instance_id": "x"})), Some("x"));
        assert_eq!(instance_id_of(&json!({"instance_id": ""})), None);
        assert_eq!(instance_id_of(&json!({"instance_id": 7})), None);
        assert_eq!(instance_id_of(&json!({})), None);
    }

    #[test]
    fn test_heartbeat_accepts_bare_worker_id() {
        let hb: Heartbeat = serde_json::from_value(json!({"worker_id": "w1"})).unwrap();
        assert_eq!(hb.status, None);
        assert_eq!(hb.instance_count, None);
    }
}
