//! Concurrent session pool.
//!
//! One `RwLock<HashMap>` guards every session. Reads take the shared lock
//! and hand out clones; writes take the exclusive lock briefly. The lock is
//! never held while caller code runs: `update` works on a detached copy and
//! commits only if nobody else wrote in between.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use arc_swap::ArcSwap;
use tokio::time::Instant;
use uuid::Uuid;

use crate::observability::metrics;
use crate::session::error::SessionError;
use crate::session::model::{
    expiry_after, Session, SessionFilter, SessionLimits, SessionStats, SessionStatus, REPO_URL_KEY,
};

/// Thread-safe store of live sessions.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    limits: ArcSwap<SessionLimits>,
}

impl SessionStore {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            limits: ArcSwap::from_pointee(limits),
        }
    }

    pub fn limits(&self) -> SessionLimits {
        **self.limits.load()
    }

    /// Replace TTL and capacity. Existing sessions keep their expiry; a
    /// lower capacity is enforced on the next creation.
    pub fn set_limits(&self, limits: SessionLimits) {
        let previous = self.limits.swap(Arc::new(limits));
        tracing::info!(
            ttl_secs = limits.ttl.as_secs(),
            max_sessions = limits.max_sessions,
            previous_max = previous.max_sessions,
            "Session limits updated"
        );
    }

    /// Fetch a copy of the session. Expired sessions are still returned,
    /// reported as `Expired`, until the sweep removes them.
    pub fn get(&self, id: &str) -> Result<Session, SessionError> {
        let sessions = self.read()?;
        let session = sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(view(session, Instant::now()))
    }

    /// Return the session for `id`, creating it if absent. An empty `id`
    /// always creates a session under a fresh UUID.
    pub fn get_or_create(&self, id: &str) -> Result<Session, SessionError> {
        let now = Instant::now();
        if !id.is_empty() {
            if let Some(existing) = self.read()?.get(id) {
                return Ok(view(existing, now));
            }
        }

        let id = if id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            id.to_string()
        };

        let limits = self.limits();
        let expires_at = expiry_after(now, limits.ttl);
        let mut sessions = self.write()?;
        // Another caller may have created it between the two locks.
        if let Some(existing) = sessions.get(&id) {
            return Ok(view(existing, now));
        }

        make_room(&mut sessions, limits.max_sessions, now);

        let session = Session::new(id.clone(), now, expires_at);
        sessions.insert(id.clone(), session.clone());
        metrics::record_session_created();
        publish_gauges(&sessions, now);
        tracing::debug!(session_id = %id, ttl_secs = limits.ttl.as_secs(), "Session created");
        Ok(session)
    }

    /// The oldest live session working on `repo_url`.
    pub fn find_by_repo(&self, repo_url: &str) -> Result<Session, SessionError> {
        let now = Instant::now();
        let sessions = self.read()?;
        oldest_for_repo(&sessions, repo_url, now)
            .map(|session| view(session, now))
            .ok_or_else(|| SessionError::NoSessionForRepo(repo_url.to_string()))
    }

    /// The live session for `repo_url`, or a new one under a fresh UUID with
    /// the URL recorded. Concurrent callers for one URL share one session.
    pub fn get_or_create_for_repo(&self, repo_url: &str) -> Result<Session, SessionError> {
        let now = Instant::now();
        let limits = self.limits();
        let expires_at = expiry_after(now, limits.ttl);
        let mut sessions = self.write()?;
        if let Some(existing) = oldest_for_repo(&sessions, repo_url, now) {
            return Ok(view(existing, now));
        }

        make_room(&mut sessions, limits.max_sessions, now);

        let id = Uuid::new_v4().to_string();
        let mut session = Session::new(id.clone(), now, expires_at);
        session
            .metadata
            .insert(REPO_URL_KEY.to_string(), serde_json::Value::from(repo_url));
        sessions.insert(id.clone(), session.clone());
        metrics::record_session_created();
        publish_gauges(&sessions, now);
        tracing::debug!(session_id = %id, repo_url = %repo_url, "Session created for repository");
        Ok(session)
    }

    /// Apply `apply` to a detached copy and commit it.
    ///
    /// If another writer commits first, the copy is re-fetched and `apply`
    /// runs again, so it may be called more than once. An error from
    /// `apply` leaves the stored session untouched. Identity and expiry
    /// fields are restored from the stored session on commit.
    pub fn update<F, E>(&self, id: &str, mut apply: F) -> Result<Session, SessionError>
    where
        F: FnMut(&mut Session) -> Result<(), E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            let mut draft = self.get(id)?;
            let base_revision = draft.revision;

            apply(&mut draft).map_err(|source| SessionError::UpdateRejected {
                id: id.to_string(),
                source: source.into(),
            })?;

            let mut sessions = self.write()?;
            let current = sessions
                .get_mut(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

            if current.revision != base_revision {
                tracing::debug!(session_id = %id, "Concurrent session write, retrying update");
                continue;
            }

            draft.id = current.id.clone();
            draft.created_at = current.created_at;
            draft.expires_at = current.expires_at;
            draft.updated_at = Instant::now();
            draft.revision = base_revision + 1;
            *current = draft.clone();
            return Ok(view(&draft, draft.updated_at));
        }
    }

    /// Remove a session explicitly.
    pub fn delete(&self, id: &str) -> Result<Session, SessionError> {
        let now = Instant::now();
        let mut sessions = self.write()?;
        let removed = sessions
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        publish_gauges(&sessions, now);
        tracing::debug!(session_id = %id, "Session deleted");
        Ok(view(&removed, now))
    }

    /// Sessions matching `filter`, oldest first (ties broken by id).
    pub fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>, SessionError> {
        let now = Instant::now();
        let mut matched: Vec<Session> = self
            .read()?
            .values()
            .filter(|session| filter.matches(session, now))
            .map(|session| view(session, now))
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matched)
    }

    /// Active/total/max at call time. Store failures yield zeroes.
    pub fn stats(&self) -> SessionStats {
        let max = self.limits().max_sessions;
        match self.read() {
            Ok(sessions) => {
                let now = Instant::now();
                SessionStats {
                    active: count_active(&sessions, now),
                    total: sessions.len(),
                    max,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to compute session stats");
                SessionStats::default()
            }
        }
    }

    /// Every label key in use with the distinct values seen for it.
    pub fn labels(&self) -> Result<BTreeMap<String, BTreeSet<String>>, SessionError> {
        let mut labels: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for session in self.read()?.values() {
            for (key, value) in &session.labels {
                labels.entry(key.clone()).or_default().insert(value.clone());
            }
        }
        Ok(labels)
    }

    /// Remove every expired session; returns how many were removed.
    pub fn cleanup(&self) -> Result<usize, SessionError> {
        let now = Instant::now();
        let mut sessions = self.write()?;
        let removed = sweep_expired(&mut sessions, now);
        if removed > 0 {
            tracing::info!(removed, remaining = sessions.len(), "Expired sessions removed");
        }
        publish_gauges(&sessions, now);
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.read().map(|sessions| sessions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Session>>, SessionError> {
        self.sessions
            .read()
            .map_err(|e| SessionError::StoreUnavailable(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Session>>, SessionError> {
        self.sessions
            .write()
            .map_err(|e| SessionError::StoreUnavailable(e.to_string()))
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionLimits::default())
    }
}

fn view(session: &Session, now: Instant) -> Session {
    let mut copy = session.clone();
    copy.status = session.status_at(now);
    copy
}

fn oldest_for_repo<'a>(sessions: &'a HashMap<String, Session>, repo_url: &str, now: Instant) -> Option<&'a Session> {
    sessions
        .values()
        .filter(|session| !session.is_expired_at(now) && session.repo_url() == Some(repo_url))
        .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
}

fn count_active(sessions: &HashMap<String, Session>, now: Instant) -> usize {
    sessions
        .values()
        .filter(|session| session.status_at(now) == SessionStatus::Active)
        .count()
}

fn publish_gauges(sessions: &HashMap<String, Session>, now: Instant) {
    metrics::record_sessions(count_active(sessions, now), sessions.len());
}

fn sweep_expired(sessions: &mut HashMap<String, Session>, now: Instant) -> usize {
    let before = sessions.len();
    sessions.retain(|_, session| !session.is_expired_at(now));
    let removed = before - sessions.len();
    if removed > 0 {
        metrics::record_sessions_expired(removed);
    }
    removed
}

/// Bring the pool below `max` so one more session fits: expired sessions
/// go first, then the least recently updated ones.
fn make_room(sessions: &mut HashMap<String, Session>, max: usize, now: Instant) {
    if sessions.len() < max {
        return;
    }
    sweep_expired(sessions, now);

    while sessions.len() >= max {
        let oldest = sessions
            .values()
            .min_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)))
            .map(|session| session.id.clone());
        let Some(oldest) = oldest else { break };
        sessions.remove(&oldest);
        metrics::record_session_evicted();
        tracing::info!(session_id = %oldest, max_sessions = max, "Session pool full, evicted oldest session");
    }
}
