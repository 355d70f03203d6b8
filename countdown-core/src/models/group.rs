use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::session::Session;
use super::utc_millis;

pub const DEFAULT_GROUP_LABEL: &str = "Untitled Group";
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Aggregate root for one group. `sessions` is kept sorted by start time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupState {
    pub group_id: String,
    pub label: String,
    pub timezone: String,
    #[serde(default)]
    pub sessions: Vec<Session>,
    /// Reserved. No operation sets it.
    #[serde(default)]
    pub active_session_id: Option<Uuid>,
    pub version: u64,
    #[serde(with = "utc_millis")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "utc_millis")]
    pub updated_at: DateTime<Utc>,
}

impl GroupState {
    /// In-memory state for a group that has never been persisted.
    pub fn fallback(group_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        // Millisecond precision, matching the persisted form.
        let now = now.trunc_subsecs(3);
        Self {
            group_id: group_id.into(),
            label: DEFAULT_GROUP_LABEL.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            sessions: Vec::new(),
            active_session_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn find_session(&self, session_id: Uuid) -> Option<&Session> {
        self.sessions.iter().find(|s| s.session_id == session_id)
    }

    pub fn find_session_mut(&mut self, session_id: Uuid) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.session_id == session_id)
    }

    pub fn insert_session(&mut self, session: Session) {
        self.sessions.push(session);
        self.sort_sessions();
    }

    pub fn remove_session(&mut self, session_id: Uuid) -> Option<Session> {
        let idx = self.sessions.iter().position(|s| s.session_id == session_id)?;
        Some(self.sessions.remove(idx))
    }

    /// Stable sort, so sessions sharing a start time keep insertion order.
    pub fn sort_sessions(&mut self) {
        self.sessions.sort_by_key(|s| s.start_time_utc);
    }

    /// Advance the change witness. Called once per committed mutation.
    pub fn stamp(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.trunc_subsecs(3);
        self.version += 1;
    }
}

/// Bootstrap payload: display metadata for a group, plus the id it was created under.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupBootstrap {
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl GroupBootstrap {
    /// Apply label and timezone onto `state`. `groupId` never changes once
    /// the state exists, so a differing one is reported back and ignored.
    pub fn apply_to(&self, state: &mut GroupState) -> Result<Option<String>, String> {
        let label = self
            .label
            .as_ref()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| "label is required".to_string())?;

        state.label = label.clone();
        state.timezone = self
            .timezone
            .clone()
            .filter(|tz| !tz.is_empty())
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());

        let ignored = self
            .group_id
            .as_ref()
            .filter(|id| !id.is_empty() && **id != state.group_id)
            .cloned();
        Ok(ignored)
    }
}
