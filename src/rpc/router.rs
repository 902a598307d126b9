//! JSON-RPC method table and dispatcher.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use serde_json::Value;

use crate::observability::metrics;
use crate::rpc::types::{Request, Response, RpcError};
use crate::transport::RequestHandler;

type Method = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

/// Owned table of named methods; the target every transport forwards to.
#[derive(Clone, Default)]
pub struct Router {
    methods: HashMap<String, Method>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous one.
    pub fn method<F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        let method: Method = Arc::new(move |params: Value| handler(params).boxed());
        self.methods.insert(name.into(), method);
        self
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run one validated request. Notifications never produce a response,
    /// even when the method fails.
    pub async fn dispatch(&self, request: Request) -> Option<Response> {
        let start = Instant::now();
        let Request { id, method, params } = request;

        let outcome = match self.methods.get(&method) {
            Some(handler) => handler(params).await,
            None => Err(RpcError::MethodNotFound(method.clone())),
        };

        match &outcome {
            Ok(_) => {
                tracing::debug!(method = %method, "RPC request handled");
                metrics::record_rpc_request(&method, "ok", start);
            }
            Err(e @ RpcError::MethodNotFound(_)) => {
                tracing::debug!(method = %method, error = %e, "Unknown RPC method");
                metrics::record_rpc_request("unknown", e.kind(), start);
            }
            Err(e) => {
                tracing::warn!(method = %method, error = %e, "RPC request failed");
                metrics::record_rpc_request(&method, e.kind(), start);
            }
        }

        let id = id?;
        Some(match outcome {
            Ok(result) => Response::success(id, result),
            Err(e) => Response::failure(id, &e),
        })
    }

    /// Handle a raw request body (single or batch).
    pub async fn handle_json(&self, body: &str) -> Option<String> {
        let value: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) => {
                return Some(Response::failure(Value::Null, &RpcError::Parse(e.to_string())).to_json());
            }
        };

        match value {
            Value::Array(batch) if batch.is_empty() => Some(
                Response::failure(Value::Null, &RpcError::InvalidRequest("empty batch".into())).to_json(),
            ),
            Value::Array(batch) => {
                let responses: Vec<Response> = join_all(batch.into_iter().map(|item| self.handle_value(item)))
                    .await
                    .into_iter()
                    .flatten()
                    .collect();
                if responses.is_empty() {
                    None
                } else {
                    Some(serde_json::to_string(&responses).unwrap_or_else(|e| {
                        Response::failure(Value::Null, &RpcError::Internal(e.to_string())).to_json()
                    }))
                }
            }
            single => self.handle_value(single).await.map(|response| response.to_json()),
        }
    }

    async fn handle_value(&self, value: Value) -> Option<Response> {
        match Request::from_value(value) {
            Ok(request) => self.dispatch(request).await,
            Err((id, e)) => {
                tracing::debug!(error = %e, "Rejected malformed RPC request");
                Some(Response::failure(id, &e))
            }
        }
    }
}

#[async_trait]
impl RequestHandler for Router {
    async fn handle(&self, request: &str) -> Option<String> {
        self.handle_json(request).await
    }
}
