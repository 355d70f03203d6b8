use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coordinator request contract, shared by the IPC socket and the HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CountdownRequest {
    Ping,
    GetGroup {
        group_id: String,
    },
    Bootstrap {
        group_id: String,
        payload: serde_json::Value,
    },
    ListSessions {
        group_id: String,
    },
    GetSession {
        group_id: String,
        session_id: Uuid,
    },
    CreateSession {
        group_id: String,
        payload: serde_json::Value,
    },
    UpdateSession {
        group_id: String,
        session_id: Uuid,
        payload: serde_json::Value,
    },
    DeleteSession {
        group_id: String,
        session_id: Uuid,
    },
}

impl CountdownRequest {
    pub fn group_id(&self) -> Option<&str> {
        match self {
            CountdownRequest::Ping => None,
            CountdownRequest::GetGroup { group_id }
            | CountdownRequest::Bootstrap { group_id, .. }
            | CountdownRequest::ListSessions { group_id }
            | CountdownRequest::GetSession { group_id, .. }
            | CountdownRequest::CreateSession { group_id, .. }
            | CountdownRequest::UpdateSession { group_id, .. }
            | CountdownRequest::DeleteSession { group_id, .. } => Some(group_id),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CountdownResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Machine-readable error class: `validation`, `not_found`, `persistence`, `unavailable`.
    #[serde(default)]
    pub code: Option<String>,
    /// Set on successful writes, so callers can tell created from updated.
    #[serde(default)]
    pub created: bool,
    pub version: String,
}

impl CountdownResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            code: None,
            created: false,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn created(data: serde_json::Value) -> Self {
        Self {
            created: true,
            ..Self::ok(data)
        }
    }

    pub fn err(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            code: Some(code.into()),
            created: false,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

pub const PROTOCOL_VERSION: &str = "0.1.0";
