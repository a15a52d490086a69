use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::guard::integrity;

/// A live countdown for one timed activity.
///
/// `session_key` combines a user identity and an activity identifier (e.g.
/// `"user1_round42"`) so concurrent users and rounds do not collide in
/// storage. `duration_secs` comes from the trusted caller each time and is
/// never persisted or recomputed locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSession {
    pub session_key: String,
    pub start_time: DateTime<Utc>,
    pub duration_secs: u64,
    pub integrity_tag: String,
}

impl TimerSession {
    /// Begin a fresh session at `start_time`, computing its tag.
    pub fn begin(
        session_key: impl Into<String>,
        start_time: DateTime<Utc>,
        duration_secs: u64,
    ) -> Self {
        let session_key = session_key.into();
        let integrity_tag = integrity::compute_tag(&session_key, start_time);
        Self {
            session_key,
            start_time,
            duration_secs,
            integrity_tag,
        }
    }

    /// The instant at which the countdown reaches zero.
    pub fn deadline(&self) -> DateTime<Utc> {
        self.start_time + chrono::Duration::seconds(self.duration_secs as i64)
    }

    /// Seconds left at `now`, clamped to zero after expiry.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        let elapsed = (now - self.start_time).num_seconds().max(0);
        (self.duration_secs as i64 - elapsed).max(0) as u64
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining_secs(now) == 0
    }
}

/// The persisted half of a session, as read back from storage and before
/// any validation has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub start_time: DateTime<Utc>,
    pub integrity_tag: String,
}

impl StoredSession {
    /// Parse the two raw string values stored for a session.
    pub fn parse(start_time_raw: &str, integrity_tag: &str) -> Result<Self> {
        let start_time = DateTime::parse_from_rfc3339(start_time_raw)
            .with_context(|| format!("invalid stored start time: '{start_time_raw}'"))?
            .with_timezone(&Utc);

        Ok(Self {
            start_time,
            integrity_tag: integrity_tag.to_string(),
        })
    }
}
