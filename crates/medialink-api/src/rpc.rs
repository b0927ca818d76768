// JSON-RPC 2.0 envelope types
//
// Requests carry an `id` when a response is expected; notifications omit it.
// Server-pushed notifications arrive over the WebSocket as raw text frames and
// are handed upward untouched as `RawEvent`s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound JSON-RPC request or notification.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub params: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl<'a> Request<'a> {
    /// A request that expects a response correlated by `id`.
    pub fn call(method: &'a str, params: &'a Value, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
            id: Some(id),
        }
    }

    /// A fire-and-forget notification (no `id`, no response body expected).
    pub fn notification(method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
            id: None,
        }
    }
}

/// Inbound JSON-RPC response.
#[derive(Debug, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ErrorObject>,
}

/// The `error` member of a failed JSON-RPC response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// One text frame received on the event channel, not yet interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

impl RawEvent {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}
