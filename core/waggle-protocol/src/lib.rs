//! IPC protocol types for waggle-daemon.
//!
//! Shared by the daemon and its clients so the wire schema cannot drift.
//! Requests and responses are single JSON objects, one per line.
//!
//! Two layers of failure exist. Transport failures (bad JSON, unknown method,
//! wrong protocol version) come back as `ok: false` with an [`ErrorInfo`].
//! Tool failures (store unreachable, no namespace) come back as `ok: true`
//! with a tool result whose `status` is `"error"`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    ListAgents,
    DeleteNamespaceAgents,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Method parameters
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListAgentsParams {
    /// Exact session name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Case-insensitive substring of the agent's namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteNamespaceParams {
    /// Workspace root reported by the calling client, as a `file://` URI or path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_uri: Option<String>,
    /// Explicit namespace, used when `root_uri` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Missing params mean "no filter". Empty strings are treated as absent.
pub fn parse_list_agents(params: Option<Value>) -> Result<ListAgentsParams, ErrorInfo> {
    let parsed: ListAgentsParams = parse_params(params, "list_agents")?;
    Ok(ListAgentsParams {
        name: non_empty(parsed.name),
        repo: non_empty(parsed.repo),
    })
}

pub fn parse_delete_namespace(params: Option<Value>) -> Result<DeleteNamespaceParams, ErrorInfo> {
    let parsed: DeleteNamespaceParams = parse_params(params, "delete_namespace_agents")?;
    Ok(DeleteNamespaceParams {
        root_uri: non_empty(parsed.root_uri),
        namespace: non_empty(parsed.namespace),
    })
}

fn parse_params<T>(params: Option<Value>, method: &str) -> Result<T, ErrorInfo>
where
    T: Default + for<'de> Deserialize<'de>,
{
    match params {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value).map_err(|err| {
            ErrorInfo::new(
                "invalid_params",
                format!("{} params are invalid: {}", method, err),
            )
        }),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|candidate| !candidate.is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthInfo {
    pub status: String,
    pub pid: u32,
    pub version: String,
    pub protocol_version: u32,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<usize>,
}

/// One agent as returned by `list_agents`. `directory` is `null` when the
/// session's live working directory could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub name: String,
    pub session_id: String,
    pub session_created: String,
    pub status: String,
    pub namespace: Option<String>,
    pub directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ListAgentsResult {
    Success { agents: Vec<AgentRecord> },
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeleteNamespaceResult {
    Success { deleted_count: usize },
    Error { error: String },
}
