//! The minimal JSON-RPC 2.0 message shapes this transport moves bytes for.
//!
//! Defining the full JSON-RPC grammar (tool calls, prompts, resources, ...)
//! is out of scope for a transport crate; the dispatcher that interprets
//! `method`/`params`/`result` is an external collaborator. What lives here
//! is just enough structure to correlate requests with responses and to
//! serialize/deserialize SSE `data:` payloads.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Always serializes/deserializes as the literal string `"2.0"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct JsonRpcVersion2_0;

impl Serialize for JsonRpcVersion2_0 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion2_0 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == "2.0" {
            Ok(JsonRpcVersion2_0)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected JSON-RPC version \"2.0\", got {s:?}"
            )))
        }
    }
}

/// A JSON-RPC request/response identifier: a string, a number, or absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => f.write_str(s),
            RequestId::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: JsonRpcVersion2_0,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: JsonRpcVersion2_0,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: JsonRpcVersion2_0,
    pub id: RequestId,
    pub result: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub jsonrpc: JsonRpcVersion2_0,
    pub id: RequestId,
    pub error: JsonRpcErrorObject,
}

/// One JSON-RPC message, in any of the four shapes the wire protocol allows,
/// or a batch of them. See spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
    Error(JsonRpcError),
    Batch(Vec<JsonRpcMessage>),
}

impl JsonRpcMessage {
    /// The request `id` this message correlates with, if any.
    ///
    /// Requests, responses and errors all carry one; notifications and
    /// batches don't carry a single one at this level.
    pub fn correlation_id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Request(r) => Some(&r.id),
            JsonRpcMessage::Response(r) => Some(&r.id),
            JsonRpcMessage::Error(e) => Some(&e.id),
            JsonRpcMessage::Notification(_) | JsonRpcMessage::Batch(_) => None,
        }
    }

    /// `true` for the two shapes that settle a pending request.
    pub fn is_final_response(&self) -> bool {
        matches!(
            self,
            JsonRpcMessage::Response(_) | JsonRpcMessage::Error(_)
        )
    }

    /// `true` if this message is an `initialize` request.
    pub fn is_initialize_request(&self) -> bool {
        matches!(self, JsonRpcMessage::Request(r) if r.method == "initialize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_roundtrips_string_and_number() {
        let s: RequestId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(s, RequestId::String("abc".into()));
        let n: RequestId = serde_json::from_str("42").unwrap();
        assert_eq!(n, RequestId::Number(42));
    }

    #[test]
    fn rejects_wrong_jsonrpc_version() {
        let err = serde_json::from_str::<JsonRpcVersion2_0>("\"1.0\"");
        assert!(err.is_err());
    }

    #[test]
    fn correlation_id_is_none_for_notifications() {
        let msg = JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: JsonRpcVersion2_0,
            method: "notifications/progress".into(),
            params: None,
        });
        assert!(msg.correlation_id().is_none());
        assert!(!msg.is_final_response());
    }

    #[test]
    fn final_response_detection() {
        let resp = JsonRpcMessage::Response(JsonRpcResponse {
            jsonrpc: JsonRpcVersion2_0,
            id: RequestId::Number(1),
            result: Value::Null,
        });
        assert!(resp.is_final_response());
    }
}
