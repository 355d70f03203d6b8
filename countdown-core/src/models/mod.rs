pub mod event;
pub mod group;
pub mod session;

pub use event::{AuditAction, AuditEvent, GroupSnapshotRow};
pub use group::{GroupBootstrap, GroupState};
pub use session::{NewSession, Session, SessionPatch, SessionStatus};

/// Serde adapter for instants rendered as `2026-01-01T17:00:00.000Z`.
pub mod utc_millis {
    use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(at: &DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Parse any RFC 3339 offset, normalized to UTC and truncated to milliseconds.
    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc).trunc_subsecs(3))
    }

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid RFC 3339 instant: {}", raw))
        })
    }
}
