//! Service records and heartbeat timestamps
//!
//! The caller-owned state a member carries between reports and liveness
//! checks. Records may cross non-structured transports, so heartbeat
//! stamps exist in both structured and raw-string form.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// One heartbeat timestamp on a service record.
///
/// Locally produced records carry structured UTC datetimes; records that
/// crossed a plain-text transport carry strings. Both compare as naive
/// UTC wall-clock times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeartbeatStamp {
    /// Structured UTC timestamp
    Structured(DateTime<Utc>),
    /// Raw string form, parsed on demand
    Raw(String),
}

impl HeartbeatStamp {
    /// Stamp for the current moment
    pub fn now() -> Self {
        HeartbeatStamp::Structured(Utc::now())
    }

    /// Naive UTC value for staleness math, or None if unparseable
    pub fn naive(&self) -> Option<NaiveDateTime> {
        match self {
            HeartbeatStamp::Structured(dt) => Some(dt.naive_utc()),
            HeartbeatStamp::Raw(s) => parse_raw_stamp(s),
        }
    }

    /// Structured UTC value, re-parsing the raw form when needed
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            HeartbeatStamp::Structured(dt) => Some(*dt),
            HeartbeatStamp::Raw(s) => parse_raw_stamp(s).map(|naive| naive.and_utc()),
        }
    }
}

impl From<DateTime<Utc>> for HeartbeatStamp {
    fn from(dt: DateTime<Utc>) -> Self {
        HeartbeatStamp::Structured(dt)
    }
}

impl From<&str> for HeartbeatStamp {
    fn from(s: &str) -> Self {
        HeartbeatStamp::Raw(s.to_string())
    }
}

/// Parse a raw stamp into naive UTC.
///
/// Offset-bearing stamps are converted to UTC first; offset-free stamps
/// are taken as already UTC. Both `T` and space separators are accepted.
fn parse_raw_stamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive);
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok()
}

/// Caller-owned record for one member of a service group
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Logical group the member reports under
    pub topic: String,

    /// Host this member instance runs on
    pub host: String,

    /// Number of liveness reports persisted so far
    #[serde(default)]
    pub report_count: u64,

    /// Administrative override; a forced-down member is never up
    #[serde(default)]
    pub forced_down: bool,

    /// Explicit liveness stamp, preferred over the bookkeeping stamps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_up: Option<HeartbeatStamp>,

    /// When the record was last saved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<HeartbeatStamp>,

    /// When the record was first saved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<HeartbeatStamp>,
}

impl ServiceRecord {
    /// Create a record for a member of `topic` running on `host`
    pub fn new(topic: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            host: host.into(),
            ..Default::default()
        }
    }

    /// The freshest heartbeat evidence on this record.
    ///
    /// Priority order: `last_seen_up`, then `updated_at`, then
    /// `created_at`.
    pub fn last_heartbeat(&self) -> Option<&HeartbeatStamp> {
        self.last_seen_up
            .as_ref()
            .or(self.updated_at.as_ref())
            .or(self.created_at.as_ref())
    }

    /// Liveness key used by the cache driver
    pub fn liveness_key(&self) -> String {
        format!("{}:{}", self.topic, self.host)
    }
}
