//! JSON-RPC 2.0 message model.
//!
//! A single [`JsonRpcMessage`] struct carries every shape on the wire
//! (request, notification, response). Which shape a decoded message has is
//! decided by [`JsonRpcMessage::classify`], not by the deserializer, so that
//! malformed shapes reach the router and get a proper `-32600` reply.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// The only protocol version this crate speaks.
pub const JSONRPC_VERSION: &str = "2.0";

// ── Error code constants ────────────────────────────────────────────

/// Standard JSON-RPC error codes.
pub mod codes {
    /// Body is not valid JSON.
    pub const PARSE_ERROR: i64 = -32_700;
    /// Body is JSON but not a valid JSON-RPC message.
    pub const INVALID_REQUEST: i64 = -32_600;
    /// No handler registered for the method.
    pub const METHOD_NOT_FOUND: i64 = -32_601;
    /// Handler rejected its params.
    pub const INVALID_PARAMS: i64 = -32_602;
    /// Handler failed, panicked, or timed out.
    pub const INTERNAL_ERROR: i64 = -32_603;

    /// Lower bound of the range reserved by JSON-RPC.
    pub const RESERVED_MIN: i64 = -32_768;
    /// Upper bound of the range reserved by JSON-RPC.
    pub const RESERVED_MAX: i64 = -32_000;

    /// Whether `code` falls in the range application errors must avoid.
    pub fn is_reserved(code: i64) -> bool {
        (RESERVED_MIN..=RESERVED_MAX).contains(&code)
    }
}

// ── Ids ─────────────────────────────────────────────────────────────

/// Request id: a number or a string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    /// Integer id.
    Number(i64),
    /// String id.
    String(String),
}

impl fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for JsonRpcId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for JsonRpcId {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for JsonRpcId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

// ── Error object ────────────────────────────────────────────────────

/// The `error` member of a failed response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Short description.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Build an error without `data`.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured detail.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// `-32700`.
    pub fn parse_error() -> Self {
        Self::new(codes::PARSE_ERROR, "Parse error")
    }

    /// `-32600` with a reason.
    pub fn invalid_request(reason: &str) -> Self {
        Self::new(codes::INVALID_REQUEST, format!("Invalid Request: {reason}"))
    }

    /// `-32601` naming the method.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    /// `-32602` with a reason.
    pub fn invalid_params(reason: &str) -> Self {
        Self::new(codes::INVALID_PARAMS, format!("Invalid params: {reason}"))
    }

    /// `-32603`; the underlying failure text is kept in `data`.
    pub fn internal(detail: &str) -> Self {
        Self::new(codes::INTERNAL_ERROR, "Internal error").with_data(Value::String(detail.to_owned()))
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

// ── Message ─────────────────────────────────────────────────────────

/// Any JSON-RPC message. All members are optional so a structurally odd
/// message still decodes and can be answered with `-32600`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct JsonRpcMessage {
    /// Protocol version member; must be `"2.0"`.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Request/response correlation id. Absent on notifications.
    #[serde(default)]
    pub id: Option<JsonRpcId>,
    /// Method name on requests and notifications.
    #[serde(default)]
    pub method: Option<String>,
    /// Method params.
    #[serde(default, deserialize_with = "present")]
    pub params: Option<Value>,
    /// Success payload. `null` is a present result.
    #[serde(default, deserialize_with = "present")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// Keeps an explicit `null` as `Some(Value::Null)`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl Serialize for JsonRpcMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(version) = &self.jsonrpc {
            map.serialize_entry("jsonrpc", version)?;
        }
        match (&self.id, &self.method) {
            (Some(id), _) => map.serialize_entry("id", id)?,
            // Responses always carry an id, null when it could not be recovered.
            (None, None) => map.serialize_entry("id", &Value::Null)?,
            (None, Some(_)) => {}
        }
        if let Some(method) = &self.method {
            map.serialize_entry("method", method)?;
        }
        if let Some(params) = &self.params {
            map.serialize_entry("params", params)?;
        }
        if let Some(result) = &self.result {
            map.serialize_entry("result", result)?;
        }
        if let Some(error) = &self.error {
            map.serialize_entry("error", error)?;
        }
        map.end()
    }
}

/// Shape of a message as determined by [`JsonRpcMessage::classify`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MessageKind<'a> {
    /// Method call expecting a response.
    Request {
        /// Correlation id.
        id: &'a JsonRpcId,
        /// Method name.
        method: &'a str,
    },
    /// Method call without an id; never answered.
    Notification {
        /// Method name.
        method: &'a str,
    },
    /// Reply to an earlier request.
    Response {
        /// Correlation id, `None` when the peer could not recover one.
        id: Option<&'a JsonRpcId>,
        /// Result or error.
        outcome: ResponseOutcome<'a>,
    },
}

/// Payload half of a response.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ResponseOutcome<'a> {
    /// `result` member.
    Result(&'a Value),
    /// `error` member.
    Error(&'a JsonRpcError),
}

/// Why a message has no valid JSON-RPC shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    /// Neither a method nor a result/error member.
    #[error("missing method")]
    MissingMethod,
    /// A method together with result or error members.
    #[error("message mixes request and response members")]
    MixedMembers,
    /// Both result and error members.
    #[error("response carries both result and error")]
    ResultAndError,
}

impl JsonRpcMessage {
    /// Request with an id.
    pub fn request(id: impl Into<JsonRpcId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_owned()),
            id: Some(id.into()),
            method: Some(method.into()),
            params,
            ..Self::default()
        }
    }

    /// Notification (no id).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_owned()),
            method: Some(method.into()),
            params,
            ..Self::default()
        }
    }

    /// Success response.
    pub fn success(id: Option<JsonRpcId>, result: Value) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_owned()),
            id,
            result: Some(result),
            ..Self::default()
        }
    }

    /// Error response.
    pub fn failure(id: Option<JsonRpcId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_owned()),
            id,
            error: Some(error),
            ..Self::default()
        }
    }

    /// Whether the `jsonrpc` member is exactly `"2.0"`.
    pub fn has_valid_version(&self) -> bool {
        self.jsonrpc.as_deref() == Some(JSONRPC_VERSION)
    }

    /// Whether this is an error response.
    pub fn is_error(&self) -> bool {
        self.method.is_none() && self.error.is_some()
    }

    /// Decide the message shape.
    pub fn classify(&self) -> Result<MessageKind<'_>, ShapeError> {
        match (self.method.as_deref(), &self.result, &self.error) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(ShapeError::MixedMembers),
            (Some(method), None, None) => Ok(match &self.id {
                Some(id) => MessageKind::Request { id, method },
                None => MessageKind::Notification { method },
            }),
            (None, Some(_), Some(_)) => Err(ShapeError::ResultAndError),
            (None, Some(result), None) => Ok(MessageKind::Response {
                id: self.id.as_ref(),
                outcome: ResponseOutcome::Result(result),
            }),
            (None, None, Some(error)) => Ok(MessageKind::Response {
                id: self.id.as_ref(),
                outcome: ResponseOutcome::Error(error),
            }),
            (None, None, None) => Err(ShapeError::MissingMethod),
        }
    }
}
