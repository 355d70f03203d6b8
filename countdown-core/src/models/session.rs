use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::utc_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Scheduled,
    Running,
    Complete,
    Canceled,
}

/// One countdown. Owned by a `GroupState`, never stored on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: Uuid,
    pub label: String,
    #[serde(with = "utc_millis")]
    pub start_time_utc: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Create payload as received. Every field is optional on the wire so that
/// absence can be reported as a validation failure instead of a decode error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub start_time_utc: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl NewSession {
    /// Build a scheduled session with a fresh id.
    ///
    /// Empty `label`, missing `startTimeUtc` and a missing or zero
    /// `durationMs` are all reported as missing.
    pub fn into_session(self) -> Result<Session, String> {
        let label = self.label.filter(|l| !l.is_empty());
        let start = self.start_time_utc.filter(|s| !s.is_empty());
        let duration = self.duration_ms.filter(|d| *d > 0);

        let (label, start, duration_ms) = match (label, start, duration) {
            (Some(l), Some(s), Some(d)) => (l, s, d),
            _ => return Err("label, startTimeUtc and durationMs are required".to_string()),
        };

        let start_time_utc = utc_millis::parse(&start)
            .ok_or_else(|| format!("startTimeUtc is not an RFC 3339 instant: {}", start))?;

        Ok(Session {
            session_id: Uuid::new_v4(),
            label,
            start_time_utc,
            duration_ms,
            status: SessionStatus::Scheduled,
            metadata: self.metadata.unwrap_or_default(),
        })
    }
}

/// Partial update. Empty strings and zero durations are ignored, like absent fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_utc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Keys with no effect on the session. Carried so that the serialized
    /// patch reproduces the request it was decoded from.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionPatch {
    /// Apply onto `session`. Metadata keys are merged shallowly.
    ///
    /// Validation happens before any field is touched, so an error leaves
    /// `session` unchanged.
    pub fn apply_to(&self, session: &mut Session) -> Result<(), String> {
        let start = match self.start_time_utc.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                utc_millis::parse(raw)
                    .ok_or_else(|| format!("startTimeUtc is not an RFC 3339 instant: {}", raw))?,
            ),
            None => None,
        };

        if let Some(label) = self.label.as_ref().filter(|l| !l.is_empty()) {
            session.label = label.clone();
        }
        if let Some(start) = start {
            session.start_time_utc = start;
        }
        if let Some(duration) = self.duration_ms.filter(|d| *d > 0) {
            session.duration_ms = duration;
        }
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(metadata) = &self.metadata {
            for (key, value) in metadata {
                session.metadata.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_session(value: Value) -> NewSession {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_new_session_defaults_to_scheduled() {
        let session = new_session(json!({
            "label": "Qualifier",
            "startTimeUtc": "2026-01-01T17:00:00.000Z",
            "durationMs": 3600000
        }))
        .into_session()
        .unwrap();

        assert_eq!(session.status, SessionStatus::Scheduled);
        assert_eq!(session.duration_ms, 3_600_000);
        assert!(session.metadata.is_empty());
    }

    #[test]
    fn test_zero_duration_is_treated_as_missing() {
        let err = new_session(json!({
            "label": "Instant",
            "startTimeUtc": "2026-01-01T17:00:00.000Z",
            "durationMs": 0
        }))
        .into_session()
        .unwrap_err();

        assert!(err.contains("required"));
    }

    #[test]
    fn test_whitespace_label_is_accepted() {
        let session = new_session(json!({
            "label": "  ",
            "startTimeUtc": "2026-01-01T17:00:00.000Z",
            "durationMs": 1000
        }))
        .into_session()
        .unwrap();

        assert_eq!(session.label, "  ");
    }

    #[test]
    fn test_patch_serializes_back_to_request_keys() {
        let request = json!({"label": "Renamed", "note": "moved by ops", "durationMs": 0});
        let patch: SessionPatch = serde_json::from_value(request.clone()).unwrap();

        assert_eq!(patch.extra.get("note"), Some(&json!("moved by ops")));
        assert_eq!(serde_json::to_value(&patch).unwrap(), request);
    }

    #[test]
    fn test_empty_label_is_treated_as_missing() {
        let err = new_session(json!({
            "label": "",
            "startTimeUtc": "2026-01-01T17:00:00.000Z",
            "durationMs": 1000
        }))
        .into_session()
        .unwrap_err();

        assert!(err.contains("required"));
    }

    #[test]
    fn test_unparseable_start_is_rejected() {
        let err = new_session(json!({
            "label": "Bad",
            "startTimeUtc": "tomorrow",
            "durationMs": 1000
        }))
        .into_session()
        .unwrap_err();

        assert!(err.contains("RFC 3339"));
    }

    #[test]
    fn test_session_wire_shape() {
        let session = new_session(json!({
            "label": "Final",
            "startTimeUtc": "2026-01-01T17:00:00Z",
            "durationMs": 60000
        }))
        .into_session()
        .unwrap();

        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["startTimeUtc"], "2026-01-01T17:00:00.000Z");
        assert_eq!(value["status"], "scheduled");
        assert!(value["sessionId"].is_string());
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn test_offset_start_is_normalized_to_utc() {
        let session = new_session(json!({
            "label": "Madrid",
            "startTimeUtc": "2026-01-01T19:00:00.123456+02:00",
            "durationMs": 60000
        }))
        .into_session()
        .unwrap();

        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["startTimeUtc"], "2026-01-01T17:00:00.123Z");
    }

    #[test]
    fn test_patch_merges_metadata() {
        let mut session = new_session(json!({
            "label": "Heat",
            "startTimeUtc": "2026-01-01T17:00:00.000Z",
            "durationMs": 1000,
            "metadata": {"a": 1}
        }))
        .into_session()
        .unwrap();

        let patch: SessionPatch = serde_json::from_value(json!({"metadata": {"b": 2}})).unwrap();
        patch.apply_to(&mut session).unwrap();

        assert_eq!(Value::Object(session.metadata.clone()), json!({"a": 1, "b": 2}));
        assert_eq!(session.label, "Heat");
    }

    #[test]
    fn test_patch_ignores_falsy_fields() {
        let mut session = new_session(json!({
            "label": "Heat",
            "startTimeUtc": "2026-01-01T17:00:00.000Z",
            "durationMs": 1000
        }))
        .into_session()
        .unwrap();

        let patch: SessionPatch =
            serde_json::from_value(json!({"label": "", "durationMs": 0, "status": "running"}))
                .unwrap();
        patch.apply_to(&mut session).unwrap();

        assert_eq!(session.label, "Heat");
        assert_eq!(session.duration_ms, 1000);
        assert_eq!(session.status, SessionStatus::Running);
    }

    #[test]
    fn test_patch_with_bad_start_changes_nothing() {
        let mut session = new_session(json!({
            "label": "Heat",
            "startTimeUtc": "2026-01-01T17:00:00.000Z",
            "durationMs": 1000
        }))
        .into_session()
        .unwrap();
        let before = session.clone();

        let patch: SessionPatch =
            serde_json::from_value(json!({"label": "Renamed", "startTimeUtc": "soon"})).unwrap();
        assert!(patch.apply_to(&mut session).is_err());
        assert_eq!(session, before);
    }
}
