//! Built-in session, workflow and server methods.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use crate::lifecycle::Coordinator;
use crate::rpc::router::Router;
use crate::rpc::types::RpcError;
use crate::session::{JobStatus, Session, SessionFilter, SessionStatus, SessionStore, TrackingError};

/// Metadata key under which workflow progress is checkpointed.
pub const WORKFLOW_KEY: &str = "workflow";

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GetOrCreateParams {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListParams {
    status: Option<SessionStatus>,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct UpdateParams {
    id: String,
    #[serde(default)]
    status: Option<SessionStatus>,
    #[serde(default)]
    stage: Option<String>,
    /// Merged into existing labels; an empty value removes the key.
    #[serde(default)]
    labels: BTreeMap<String, String>,
    /// Merged into existing metadata; a `null` value removes the key.
    #[serde(default)]
    metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RepoParams {
    repo_url: String,
}

#[derive(Debug, Deserialize)]
struct RecordErrorParams {
    id: String,
    message: String,
    #[serde(default)]
    context: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ToolParams {
    id: String,
    tool: String,
}

#[derive(Debug, Deserialize)]
struct UpdateJobParams {
    id: String,
    job_id: String,
    status: JobStatus,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompleteToolParams {
    id: String,
    tool: String,
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

impl RepoParams {
    fn parse(params: Value) -> Result<Self, RpcError> {
        let params: RepoParams = parse(params)?;
        if params.repo_url.trim().is_empty() {
            return Err(RpcError::InvalidParams("repo_url must not be empty".into()));
        }
        Ok(params)
    }
}

/// Workflow progress as recorded in session metadata.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WorkflowView {
    pub repo_path: Option<String>,
    pub status: Option<String>,
    pub current_step: Option<String>,
    pub completed_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    pub error: Option<Value>,
}

/// Register every built-in method on `router`. `server/status` is only
/// available when a coordinator is supplied.
pub fn register_builtin(router: &mut Router, store: Arc<SessionStore>, coordinator: Option<Arc<Coordinator>>) {
    let s = store.clone();
    router.method("session/get_or_create", move |params| {
        let store = s.clone();
        async move {
            let params: GetOrCreateParams = parse_optional(params)?;
            let session = store.get_or_create(&params.id)?;
            Ok::<Value, RpcError>(summary(&session))
        }
    });

    let s = store.clone();
    router.method("session/get", move |params| {
        let store = s.clone();
        async move {
            let params: IdParams = parse(params)?;
            Ok::<Value, RpcError>(summary(&store.get(&params.id)?))
        }
    });

    let s = store.clone();
    router.method("session/list", move |params| {
        let store = s.clone();
        async move {
            let params: ListParams = parse_optional(params)?;
            let filter = SessionFilter {
                status: params.status,
                labels: params.labels,
            };
            let now = Instant::now();
            let sessions: Vec<_> = store.list(&filter)?.iter().map(|s| s.summary(now)).collect();
            Ok::<Value, RpcError>(json!({ "count": sessions.len(), "sessions": sessions }))
        }
    });

    let s = store.clone();
    router.method("session/update", move |params| {
        let store = s.clone();
        async move {
            let params: UpdateParams = parse(params)?;
            if params.status == Some(SessionStatus::Expired) {
                return Err(RpcError::InvalidParams("status 'expired' is set by the store only".into()));
            }
            let updated = store.update(&params.id, |session| {
                apply_update(session, &params);
                Ok::<(), RpcError>(())
            })?;
            Ok::<Value, RpcError>(summary(&updated))
        }
    });

    let s = store.clone();
    router.method("session/delete", move |params| {
        let store = s.clone();
        async move {
            let params: IdParams = parse(params)?;
            let removed = store.delete(&params.id)?;
            Ok::<Value, RpcError>(json!({ "deleted": removed.id }))
        }
    });

    let s = store.clone();
    router.method("session/stats", move |_params| {
        let store = s.clone();
        async move { Ok(json!(store.stats())) }
    });

    let s = store.clone();
    router.method("session/labels", move |_params| {
        let store = s.clone();
        async move { Ok::<Value, RpcError>(json!({ "labels": store.labels()? })) }
    });

    let s = store.clone();
    router.method("session/find_by_repo", move |params| {
        let store = s.clone();
        async move {
            let params = RepoParams::parse(params)?;
            Ok::<Value, RpcError>(summary(&store.find_by_repo(&params.repo_url)?))
        }
    });

    let s = store.clone();
    router.method("session/get_or_create_for_repo", move |params| {
        let store = s.clone();
        async move {
            let params = RepoParams::parse(params)?;
            Ok::<Value, RpcError>(summary(&store.get_or_create_for_repo(&params.repo_url)?))
        }
    });

    let s = store.clone();
    router.method("session/record_error", move |params| {
        let store = s.clone();
        async move {
            let params: RecordErrorParams = parse(params)?;
            let session = store.record_error(&params.id, &params.message, params.context)?;
            Ok::<Value, RpcError>(json!({
                "id": session.id,
                "error_count": session.error_count(),
                "last_error": session.last_error().map_err(tracking)?,
            }))
        }
    });

    let s = store.clone();
    router.method("session/start_job", move |params| {
        let store = s.clone();
        async move {
            let params: ToolParams = parse(params)?;
            Ok::<Value, RpcError>(json!(store.start_job(&params.id, &params.tool)?))
        }
    });

    let s = store.clone();
    router.method("session/update_job", move |params| {
        let store = s.clone();
        async move {
            let params: UpdateJobParams = parse(params)?;
            let job = store.update_job(&params.id, &params.job_id, params.status, params.result, params.error)?;
            Ok::<Value, RpcError>(json!(job))
        }
    });

    let s = store.clone();
    router.method("session/jobs", move |params| {
        let store = s.clone();
        async move {
            let params: IdParams = parse(params)?;
            let session = store.get(&params.id)?;
            Ok::<Value, RpcError>(json!({
                "id": session.id,
                "jobs": session.jobs().map_err(tracking)?,
                "tool_history": session.tool_history().map_err(tracking)?,
            }))
        }
    });

    let s = store.clone();
    router.method("session/track_tool", move |params| {
        let store = s.clone();
        async move {
            let params: ToolParams = parse(params)?;
            store.track_tool_execution(&params.id, &params.tool)?;
            Ok::<Value, RpcError>(json!({ "id": params.id, "tool": params.tool }))
        }
    });

    let s = store.clone();
    router.method("session/complete_tool", move |params| {
        let store = s.clone();
        async move {
            let params: CompleteToolParams = parse(params)?;
            let execution = store.complete_tool_execution(&params.id, &params.tool, params.success, params.error)?;
            Ok::<Value, RpcError>(json!(execution))
        }
    });

    let s = store;
    router.method("workflow/status", move |params| {
        let store = s.clone();
        async move {
            let params: IdParams = parse(params)?;
            let session = store.get(&params.id)?;
            workflow_status(&session)
        }
    });

    if let Some(coordinator) = coordinator {
        router.method("server/status", move |_params| {
            let coordinator = coordinator.clone();
            async move {
                Ok(json!({
                    "healthy": coordinator.is_healthy(),
                    "subsystems": coordinator.status(),
                }))
            }
        });
    }
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    Ok(serde_json::from_value(params)?)
}

/// Like `parse`, but absent params mean all defaults.
fn parse_optional<T: DeserializeOwned + Default>(params: Value) -> Result<T, RpcError> {
    match params {
        Value::Null => Ok(T::default()),
        params => parse(params),
    }
}

fn tracking(err: TrackingError) -> RpcError {
    RpcError::Internal(err.to_string())
}

fn summary(session: &Session) -> Value {
    json!(session.summary(Instant::now()))
}

fn apply_update(session: &mut Session, params: &UpdateParams) {
    if let Some(status) = params.status {
        session.status = status;
    }
    if let Some(stage) = &params.stage {
        session.stage = Some(stage.clone());
    }
    for (key, value) in &params.labels {
        if value.is_empty() {
            session.labels.remove(key);
        } else {
            session.labels.insert(key.clone(), value.clone());
        }
    }
    for (key, value) in &params.metadata {
        if value.is_null() {
            session.metadata.remove(key);
        } else {
            session.metadata.insert(key.clone(), value.clone());
        }
    }
}

fn workflow_status(session: &Session) -> Result<Value, RpcError> {
    let workflow = match session.metadata.get(WORKFLOW_KEY) {
        None => WorkflowView::default(),
        Some(value @ Value::Object(_)) => serde_json::from_value(value.clone())
            .map_err(|e| RpcError::Internal(format!("invalid workflow state in session: {e}")))?,
        Some(_) => return Err(RpcError::Internal("invalid workflow state in session".into())),
    };

    Ok(json!({
        "session_id": session.id,
        "session_status": session.status,
        "stage": session.stage,
        "status": workflow.status.as_deref().unwrap_or("not_started"),
        "current_step": workflow.current_step,
        "completed_steps": workflow.completed_steps,
        "failed_steps": workflow.failed_steps,
        "repo_path": workflow.repo_path,
        "error": workflow.error,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::types::Request;
    use crate::session::SessionLimits;
    use std::time::Duration;

    fn setup() -> (Router, Arc<SessionStore>) {
        let store = Arc::new(SessionStore::new(SessionLimits {
            ttl: Duration::from_secs(60),
            max_sessions: 10,
        }));
        let mut router = Router::new();
        register_builtin(&mut router, store.clone(), None);
        (router, store)
    }

    async fn call(router: &Router, method: &str, params: Value) -> Result<Value, Value> {
        let response = router
            .dispatch(Request {
                id: Some(json!(1)),
                method: method.into(),
                params,
            })
            .await
            .unwrap();
        match response.error {
            Some(error) => Err(json!(error.code)),
            None => Ok(response.result.unwrap()),
        }
    }

    #[tokio::test]
    async fn create_then_get() {
        let (router, _) = setup();
        let created = call(&router, "session/get_or_create", json!({"id": "abc"})).await.unwrap();
        assert_eq!(created["id"], json!("abc"));
        assert_eq!(created["status"], json!("active"));

        let fetched = call(&router, "session/get", json!({"id": "abc"})).await.unwrap();
        assert_eq!(fetched["revision"], json!(0));

        let generated = call(&router, "session/get_or_create", Value::Null).await.unwrap();
        assert_eq!(generated["id"].as_str().unwrap().len(), 36);
    }

    #[tokio::test]
    async fn missing_session_maps_to_not_found_code() {
        let (router, _) = setup();
        assert_eq!(call(&router, "session/get", json!({"id": "ghost"})).await, Err(json!(-32001)));
        assert_eq!(call(&router, "session/get", json!({})).await, Err(json!(-32602)));
    }

    #[tokio::test]
    async fn update_merges_labels_and_metadata() {
        let (router, store) = setup();
        store.get_or_create("s").unwrap();
        call(
            &router,
            "session/update",
            json!({"id": "s", "labels": {"repo": "core", "tmp": "x"}, "metadata": {"branch": "main"}}),
        )
        .await
        .unwrap();

        let updated = call(
            &router,
            "session/update",
            json!({"id": "s", "stage": "build", "labels": {"tmp": ""}, "metadata": {"branch": null}}),
        )
        .await
        .unwrap();

        assert_eq!(updated["stage"], json!("build"));
        assert_eq!(updated["labels"], json!({"repo": "core"}));
        assert_eq!(updated["metadata"], json!({}));
        assert_eq!(updated["revision"], json!(2));
    }

    #[tokio::test]
    async fn update_cannot_force_expiry() {
        let (router, store) = setup();
        store.get_or_create("s").unwrap();
        assert_eq!(
            call(&router, "session/update", json!({"id": "s", "status": "expired"})).await,
            Err(json!(-32602))
        );
    }

    #[tokio::test]
    async fn list_filters_by_status_and_label() {
        let (router, store) = setup();
        store.get_or_create("a").unwrap();
        store.get_or_create("b").unwrap();
        store
            .update("b", |s| {
                s.status = SessionStatus::Failed;
                s.labels.insert("repo".into(), "core".into());
                Ok::<(), RpcError>(())
            })
            .unwrap();

        let all = call(&router, "session/list", Value::Null).await.unwrap();
        assert_eq!(all["count"], json!(2));

        let failed = call(&router, "session/list", json!({"status": "failed"})).await.unwrap();
        assert_eq!(failed["sessions"][0]["id"], json!("b"));

        let labelled = call(&router, "session/list", json!({"labels": {"repo": "core"}})).await.unwrap();
        assert_eq!(labelled["count"], json!(1));
    }

    #[tokio::test]
    async fn delete_and_stats() {
        let (router, store) = setup();
        store.get_or_create("a").unwrap();
        store.get_or_create("b").unwrap();

        let stats = call(&router, "session/stats", Value::Null).await.unwrap();
        assert_eq!(stats, json!({"active": 2, "total": 2, "max": 10}));

        call(&router, "session/delete", json!({"id": "a"})).await.unwrap();
        assert_eq!(call(&router, "session/delete", json!({"id": "a"})).await, Err(json!(-32001)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn workflow_status_reads_checkpoint() {
        let (router, store) = setup();
        store.get_or_create("w").unwrap();

        let empty = call(&router, "workflow/status", json!({"id": "w"})).await.unwrap();
        assert_eq!(empty["status"], json!("not_started"));
        assert_eq!(empty["completed_steps"], json!([]));

        store
            .update("w", |s| {
                s.metadata.insert(
                    WORKFLOW_KEY.into(),
                    json!({
                        "status": "in_progress",
                        "current_step": "build_image",
                        "completed_steps": ["analyze", "dockerfile"],
                        "repo_path": "/src/app"
                    }),
                );
                Ok::<(), RpcError>(())
            })
            .unwrap();

        let status = call(&router, "workflow/status", json!({"id": "w"})).await.unwrap();
        assert_eq!(status["status"], json!("in_progress"));
        assert_eq!(status["current_step"], json!("build_image"));
        assert_eq!(status["completed_steps"], json!(["analyze", "dockerfile"]));
        assert_eq!(status["repo_path"], json!("/src/app"));
    }

    #[tokio::test]
    async fn labels_collects_values_per_key() {
        let (router, store) = setup();
        for (id, repo) in [("a", "core"), ("b", "web"), ("c", "core")] {
            store.get_or_create(id).unwrap();
            store
                .update(id, |s| {
                    s.labels.insert("repo".into(), repo.into());
                    Ok::<(), RpcError>(())
                })
                .unwrap();
        }

        let labels = call(&router, "session/labels", Value::Null).await.unwrap();
        assert_eq!(labels, json!({"labels": {"repo": ["core", "web"]}}));
    }

    #[tokio::test]
    async fn repo_lookup_reuses_the_same_session() {
        let (router, _) = setup();
        let url = json!({"repo_url": "https://github.com/acme/app"});
        assert_eq!(call(&router, "session/find_by_repo", url.clone()).await, Err(json!(-32001)));

        let created = call(&router, "session/get_or_create_for_repo", url.clone()).await.unwrap();
        let again = call(&router, "session/get_or_create_for_repo", url.clone()).await.unwrap();
        let found = call(&router, "session/find_by_repo", url).await.unwrap();

        assert_eq!(created["id"], again["id"]);
        assert_eq!(created["id"], found["id"]);
        assert_eq!(found["metadata"]["repo_url"], json!("https://github.com/acme/app"));
        assert_eq!(
            call(&router, "session/find_by_repo", json!({"repo_url": " "})).await,
            Err(json!(-32602))
        );
    }

    #[tokio::test]
    async fn job_and_tool_tracking_round() {
        let (router, store) = setup();
        store.get_or_create("s").unwrap();

        let job = call(&router, "session/start_job", json!({"id": "s", "tool": "build_image"}))
            .await
            .unwrap();
        assert_eq!(job["status"], json!("pending"));
        let job_id = job["job_id"].clone();

        let failed = call(
            &router,
            "session/update_job",
            json!({"id": "s", "job_id": job_id, "status": "failed", "error": "registry down"}),
        )
        .await
        .unwrap();
        assert_eq!(failed["status"], json!("failed"));
        assert!(call(
            &router,
            "session/update_job",
            json!({"id": "s", "job_id": job_id, "status": "running"})
        )
        .await
        .is_err());

        call(&router, "session/track_tool", json!({"id": "s", "tool": "scan"})).await.unwrap();
        let finished = call(
            &router,
            "session/complete_tool",
            json!({"id": "s", "tool": "scan", "success": false, "error": "trivy missing"}),
        )
        .await
        .unwrap();
        assert_eq!(finished["success"], json!(false));

        let tracked = call(&router, "session/jobs", json!({"id": "s"})).await.unwrap();
        assert_eq!(tracked["jobs"][0]["error"], json!("registry down"));
        assert_eq!(tracked["tool_history"][0]["tool"], json!("scan"));

        let recorded = call(&router, "session/record_error", json!({"id": "s", "message": "gave up"}))
            .await
            .unwrap();
        assert_eq!(recorded["error_count"], json!(2));
        assert_eq!(recorded["last_error"]["message"], json!("gave up"));
    }

    #[tokio::test]
    async fn server_status_requires_coordinator() {
        let (router, _) = setup();
        assert_eq!(call(&router, "server/status", Value::Null).await, Err(json!(-32601)));

        let mut with_status = Router::new();
        register_builtin(
            &mut with_status,
            Arc::new(SessionStore::default()),
            Some(Arc::new(Coordinator::new())),
        );
        let status = call(&with_status, "server/status", Value::Null).await.unwrap();
        assert_eq!(status["healthy"], json!(true));
    }
}
