//! Session records and the views rendered from them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::schema::MAX_DURATION_SECS;
use crate::config::SessionConfig;

/// Metadata key holding the repository URL a session works on.
pub const REPO_URL_KEY: &str = "repo_url";

/// Lifecycle status of a session.
///
/// `Expired` is never stored by writers; reads report it once the
/// expiry instant has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Suspended,
    Expired,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Suspended => "suspended",
            SessionStatus::Expired => "expired",
            SessionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "suspended" => Ok(SessionStatus::Suspended),
            "expired" => Ok(SessionStatus::Expired),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

/// One client's workflow context.
///
/// `id`, `created_at` and `expires_at` are fixed at creation; the store
/// ignores changes to them made inside an update callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    /// Workflow checkpoint label.
    pub stage: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: Instant,
    pub updated_at: Instant,
    pub expires_at: Instant,
    /// Bumped on every committed write.
    pub revision: u64,
}

/// Expiry instant for a session created at `now`. TTLs beyond what the
/// clock can represent saturate instead of overflowing.
pub(crate) fn expiry_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(Duration::from_secs(MAX_DURATION_SECS)))
        .unwrap_or(now)
}

impl Session {
    pub(crate) fn new(id: String, now: Instant, expires_at: Instant) -> Self {
        Self {
            id,
            status: SessionStatus::Active,
            stage: None,
            labels: BTreeMap::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            expires_at,
            revision: 0,
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Status as readers should see it at `now`.
    pub fn status_at(&self, now: Instant) -> SessionStatus {
        if self.is_expired_at(now) {
            SessionStatus::Expired
        } else {
            self.status
        }
    }

    /// Repository URL recorded in metadata, if any.
    pub fn repo_url(&self) -> Option<&str> {
        self.metadata.get(REPO_URL_KEY).and_then(|v| v.as_str())
    }

    /// Serializable view with ages relative to `now`.
    pub fn summary(&self, now: Instant) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            status: self.status_at(now),
            stage: self.stage.clone(),
            labels: self.labels.clone(),
            metadata: self.metadata.clone(),
            age_secs: now.saturating_duration_since(self.created_at).as_secs_f64(),
            idle_secs: now.saturating_duration_since(self.updated_at).as_secs_f64(),
            expires_in_secs: self.expires_at.saturating_duration_since(now).as_secs_f64(),
            revision: self.revision,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub status: SessionStatus,
    pub stage: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub age_secs: f64,
    pub idle_secs: f64,
    pub expires_in_secs: f64,
    pub revision: u64,
}

/// Selection criteria for `SessionStore::list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    /// Every pair must be present on the session.
    pub labels: BTreeMap<String, String>,
}

impl SessionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, session: &Session, now: Instant) -> bool {
        if let Some(status) = self.status {
            if session.status_at(now) != status {
                return false;
            }
        }
        self.labels
            .iter()
            .all(|(key, value)| session.labels.get(key) == Some(value))
    }
}

/// Pool limits, swappable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub ttl: Duration,
    pub max_sessions: usize,
}

impl From<&SessionConfig> for SessionLimits {
    fn from(config: &SessionConfig) -> Self {
        Self {
            ttl: config.ttl(),
            max_sessions: config.max_sessions,
        }
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// Pool occupancy computed at call time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub active: usize,
    pub total: usize,
    pub max: usize,
}
