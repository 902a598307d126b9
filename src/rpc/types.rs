//! JSON-RPC 2.0 envelopes and error codes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::session::SessionError;

pub const JSONRPC_VERSION: &str = "2.0";

/// A parsed request. `id` is `None` for notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Option<Value>,
    pub method: String,
    pub params: Value,
}

impl Request {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Validate one envelope. The returned id (possibly `Null`) is the one
    /// to answer with when validation fails.
    pub fn from_value(value: Value) -> Result<Self, (Value, RpcError)> {
        let Value::Object(mut object) = value else {
            return Err((Value::Null, RpcError::InvalidRequest("request must be an object".into())));
        };

        let id = object.remove("id");
        let reply_id = id.clone().unwrap_or(Value::Null);
        if let Some(id) = &id {
            if !matches!(id, Value::Null | Value::String(_) | Value::Number(_)) {
                return Err((Value::Null, RpcError::InvalidRequest("id must be a string, number or null".into())));
            }
        }

        match object.get("jsonrpc") {
            Some(Value::String(version)) if version == JSONRPC_VERSION => {}
            _ => return Err((reply_id, RpcError::InvalidRequest("jsonrpc must be \"2.0\"".into()))),
        }

        let method = match object.remove("method") {
            Some(Value::String(method)) => method,
            _ => return Err((reply_id, RpcError::InvalidRequest("method must be a string".into()))),
        };

        let params = object.remove("params").unwrap_or(Value::Null);
        if !matches!(params, Value::Null | Value::Object(_) | Value::Array(_)) {
            return Err((reply_id, RpcError::InvalidRequest("params must be an object or array".into())));
        }

        Ok(Self { id, method, params })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorObject>,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: &RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error.to_object()),
        }
    }

    /// Serialized form. Falls back to a static internal-error envelope in
    /// the (unreachable in practice) case that serialization fails.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize JSON-RPC response");
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"internal error"}}"#.to_string()
        })
    }
}

/// Protocol and application errors, each mapped to a JSON-RPC code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("update rejected: {0}")]
    UpdateRejected(String),
}

impl RpcError {
    pub fn code(&self) -> i64 {
        match self {
            RpcError::Parse(_) => -32700,
            RpcError::InvalidRequest(_) => -32600,
            RpcError::MethodNotFound(_) => -32601,
            RpcError::InvalidParams(_) => -32602,
            RpcError::Internal(_) => -32603,
            RpcError::SessionNotFound(_) => -32001,
            RpcError::StoreUnavailable(_) => -32002,
            RpcError::UpdateRejected(_) => -32003,
        }
    }

    /// Short label used as the metrics outcome.
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Parse(_) => "parse_error",
            RpcError::InvalidRequest(_) => "invalid_request",
            RpcError::MethodNotFound(_) => "method_not_found",
            RpcError::InvalidParams(_) => "invalid_params",
            RpcError::Internal(_) => "internal_error",
            RpcError::SessionNotFound(_) => "not_found",
            RpcError::StoreUnavailable(_) => "unavailable",
            RpcError::UpdateRejected(_) => "rejected",
        }
    }

    pub fn to_object(&self) -> ErrorObject {
        ErrorObject {
            code: self.code(),
            message: self.to_string(),
            data: None,
        }
    }
}

impl From<SessionError> for RpcError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(id) => RpcError::SessionNotFound(id),
            SessionError::NoSessionForRepo(url) => RpcError::SessionNotFound(format!("repository {url}")),
            SessionError::StoreUnavailable(reason) => RpcError::StoreUnavailable(reason),
            SessionError::UpdateRejected { source, .. } => RpcError::UpdateRejected(source.to_string()),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::InvalidParams(err.to_string())
    }
}
