use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::group::GroupState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.updated")]
    SessionUpdated,
    #[serde(rename = "session.deleted")]
    SessionDeleted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::SessionCreated => "session.created",
            AuditAction::SessionUpdated => "session.updated",
            AuditAction::SessionDeleted => "session.deleted",
        }
    }
}

/// Immutable row in the events log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub group_id: String,
    pub session_id: Uuid,
    pub action: AuditAction,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        group_id: impl Into<String>,
        session_id: Uuid,
        action: AuditAction,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            group_id: group_id.into(),
            session_id,
            action,
            payload,
            occurred_at: Utc::now(),
        }
    }
}

/// Denormalized copy of a group, upserted by `group_id`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GroupSnapshotRow {
    pub group_id: String,
    pub label: String,
    pub timezone: String,
    pub version: i64,
    pub snapshot: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GroupSnapshotRow {
    pub fn from_state(state: &GroupState) -> Result<Self, serde_json::Error> {
        Ok(Self {
            group_id: state.group_id.clone(),
            label: state.label.clone(),
            timezone: state.timezone.clone(),
            version: state.version as i64,
            snapshot: serde_json::to_value(state)?,
            created_at: state.created_at,
            updated_at: state.updated_at,
        })
    }
}
