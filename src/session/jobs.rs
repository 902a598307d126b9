//! Job, tool-execution and error bookkeeping kept in session metadata.
//!
//! Every write goes through `SessionStore::update`, so bookkeeping races
//! resolve like any other session write. Histories are capped: the oldest
//! finished jobs and tool executions are dropped first.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::session::error::SessionError;
use crate::session::model::Session;
use crate::session::store::SessionStore;

pub const JOBS_KEY: &str = "jobs";
pub const TOOL_HISTORY_KEY: &str = "tool_history";
pub const LAST_ERROR_KEY: &str = "last_error";
pub const ERROR_COUNT_KEY: &str = "error_count";

const MAX_FINISHED_JOBS: usize = 32;
const MAX_TOOL_HISTORY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_id: String,
    pub tool: String,
    pub status: JobStatus,
    pub started_at_unix_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_unix_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub tool: String,
    pub started_at_unix_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_unix_ms: Option<u64>,
    /// `None` while the execution is still running.
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub at_unix_ms: u64,
}

/// Why a bookkeeping update was refused.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("job {0} not found")]
    UnknownJob(String),

    #[error("job {job_id} already finished as {status:?}")]
    JobFinished { job_id: String, status: JobStatus },

    #[error("no running execution of tool {0}")]
    NoRunningTool(String),

    #[error("malformed '{key}' entry in session metadata: {source}")]
    Malformed {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl Session {
    /// Tracked jobs, oldest first.
    pub fn jobs(&self) -> Result<Vec<JobInfo>, TrackingError> {
        read_entry(self, JOBS_KEY)
    }

    /// Tool executions, oldest first.
    pub fn tool_history(&self) -> Result<Vec<ToolExecution>, TrackingError> {
        read_entry(self, TOOL_HISTORY_KEY)
    }

    pub fn error_count(&self) -> u64 {
        self.metadata
            .get(ERROR_COUNT_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    pub fn last_error(&self) -> Result<Option<ErrorRecord>, TrackingError> {
        read_entry(self, LAST_ERROR_KEY)
    }
}

impl SessionStore {
    /// Record a failure against the session: bumps its error count and
    /// replaces the last error.
    pub fn record_error(&self, id: &str, message: &str, context: Option<Value>) -> Result<Session, SessionError> {
        let record = ErrorRecord {
            message: message.to_string(),
            context,
            at_unix_ms: unix_millis(),
        };
        let session = self.update(id, |session| push_error(session, &record))?;
        tracing::warn!(session_id = %id, errors = session.error_count(), error = %message, "Session error recorded");
        Ok(session)
    }

    /// Start tracking a `Pending` job for `tool`.
    pub fn start_job(&self, id: &str, tool: &str) -> Result<JobInfo, SessionError> {
        let job = JobInfo {
            job_id: Uuid::new_v4().to_string(),
            tool: tool.to_string(),
            status: JobStatus::Pending,
            started_at_unix_ms: unix_millis(),
            ended_at_unix_ms: None,
            result: None,
            error: None,
        };
        self.update(id, |session| {
            let mut jobs: Vec<JobInfo> = read_entry(session, JOBS_KEY)?;
            jobs.push(job.clone());
            prune_finished_jobs(&mut jobs);
            write_entry(session, JOBS_KEY, &jobs)
        })?;
        tracing::debug!(session_id = %id, job_id = %job.job_id, tool = %tool, "Job started");
        Ok(job)
    }

    /// Move a job to `status`. Finished jobs are immutable.
    pub fn update_job(
        &self,
        id: &str,
        job_id: &str,
        status: JobStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<JobInfo, SessionError> {
        let mut updated = None;
        self.update(id, |session| {
            let mut jobs: Vec<JobInfo> = read_entry(session, JOBS_KEY)?;
            let job = jobs
                .iter_mut()
                .find(|job| job.job_id == job_id)
                .ok_or_else(|| TrackingError::UnknownJob(job_id.to_string()))?;
            if job.status.is_finished() {
                return Err(TrackingError::JobFinished {
                    job_id: job_id.to_string(),
                    status: job.status,
                });
            }

            job.status = status;
            if result.is_some() {
                job.result = result.clone();
            }
            if error.is_some() {
                job.error = error.clone();
            }
            if status.is_finished() {
                job.ended_at_unix_ms = Some(unix_millis());
            }
            updated = Some(job.clone());
            write_entry(session, JOBS_KEY, &jobs)
        })?;

        let job = updated.ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        tracing::debug!(session_id = %id, job_id = %job_id, status = ?job.status, "Job updated");
        Ok(job)
    }

    pub fn complete_job(&self, id: &str, job_id: &str, result: Value) -> Result<JobInfo, SessionError> {
        self.update_job(id, job_id, JobStatus::Completed, Some(result), None)
    }

    /// Record that `tool` started running in this session.
    pub fn track_tool_execution(&self, id: &str, tool: &str) -> Result<Session, SessionError> {
        let execution = ToolExecution {
            tool: tool.to_string(),
            started_at_unix_ms: unix_millis(),
            ended_at_unix_ms: None,
            success: None,
            error: None,
        };
        self.update(id, |session| {
            let mut history: Vec<ToolExecution> = read_entry(session, TOOL_HISTORY_KEY)?;
            history.push(execution.clone());
            if history.len() > MAX_TOOL_HISTORY {
                let excess = history.len() - MAX_TOOL_HISTORY;
                history.drain(..excess);
            }
            write_entry(session, TOOL_HISTORY_KEY, &history)
        })
    }

    /// Finish the most recent running execution of `tool`. A failure is
    /// also recorded as the session's last error.
    pub fn complete_tool_execution(
        &self,
        id: &str,
        tool: &str,
        success: bool,
        error: Option<String>,
    ) -> Result<ToolExecution, SessionError> {
        let mut finished = None;
        self.update(id, |session| {
            let mut history: Vec<ToolExecution> = read_entry(session, TOOL_HISTORY_KEY)?;
            let execution = history
                .iter_mut()
                .rev()
                .find(|execution| execution.tool == tool && execution.ended_at_unix_ms.is_none())
                .ok_or_else(|| TrackingError::NoRunningTool(tool.to_string()))?;

            let now = unix_millis();
            execution.ended_at_unix_ms = Some(now);
            execution.success = Some(success);
            execution.error = error.clone();
            finished = Some(execution.clone());
            write_entry(session, TOOL_HISTORY_KEY, &history)?;

            if !success {
                push_error(
                    session,
                    &ErrorRecord {
                        message: error.clone().unwrap_or_else(|| format!("{tool} failed")),
                        context: Some(serde_json::json!({ "tool": tool })),
                        at_unix_ms: now,
                    },
                )?;
            }
            Ok::<(), TrackingError>(())
        })?;

        finished.ok_or_else(|| SessionError::NotFound(id.to_string()))
    }
}

fn push_error(session: &mut Session, record: &ErrorRecord) -> Result<(), TrackingError> {
    let count = session.error_count() + 1;
    session.metadata.insert(ERROR_COUNT_KEY.to_string(), Value::from(count));
    write_entry(session, LAST_ERROR_KEY, record)
}

/// Keep every unfinished job and at most `MAX_FINISHED_JOBS` finished ones.
fn prune_finished_jobs(jobs: &mut Vec<JobInfo>) {
    let finished = jobs.iter().filter(|job| job.status.is_finished()).count();
    let mut excess = finished.saturating_sub(MAX_FINISHED_JOBS);
    jobs.retain(|job| {
        if excess > 0 && job.status.is_finished() {
            excess -= 1;
            false
        } else {
            true
        }
    });
}

fn read_entry<T: DeserializeOwned + Default>(session: &Session, key: &'static str) -> Result<T, TrackingError> {
    match session.metadata.get(key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|source| TrackingError::Malformed { key, source })
        }
    }
}

fn write_entry<T: Serialize>(session: &mut Session, key: &'static str, value: &T) -> Result<(), TrackingError> {
    let value = serde_json::to_value(value).map_err(|source| TrackingError::Malformed { key, source })?;
    session.metadata.insert(key.to_string(), value);
    Ok(())
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
