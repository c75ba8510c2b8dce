//! Push envelope: the unit carried on the server→client stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::CodecError;
use crate::jsonrpc::JsonRpcMessage;
use crate::mcp::Implementation;

/// Envelope kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeKind {
    /// First frame on a fresh stream; assigns the channel id.
    Init,
    /// Server liveness probe; the client answers with a pong.
    HeartbeatPing,
    /// Liveness reply.
    HeartbeatPong,
    /// JSON-RPC message (success response or server-initiated message).
    Payload,
    /// JSON-RPC error response or channel-level fault.
    Fault,
}

impl EnvelopeKind {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::HeartbeatPing => "heartbeat-ping",
            Self::HeartbeatPong => "heartbeat-pong",
            Self::Payload => "payload",
            Self::Fault => "fault",
        }
    }
}

/// One frame of the push stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEnvelope {
    /// Frame kind.
    pub kind: EnvelopeKind,
    /// Channel the frame belongs to.
    pub channel_id: String,
    /// Kind-specific payload.
    #[serde(default)]
    pub body: Value,
    /// Emission time, epoch milliseconds.
    #[serde(default)]
    pub emitted_at: i64,
}

impl PushEnvelope {
    /// Stamp a new envelope with the current time.
    pub fn new(kind: EnvelopeKind, channel_id: impl Into<String>, body: Value) -> Self {
        Self {
            kind,
            channel_id: channel_id.into(),
            body,
            emitted_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Typed view of the envelope for exhaustive dispatch.
    pub fn into_event(self) -> Result<ChannelEvent, CodecError> {
        match self.kind {
            EnvelopeKind::Init => {
                let body = if self.body.is_null() {
                    InitBody::default()
                } else {
                    serde_json::from_value(self.body)
                        .map_err(|e| CodecError::malformed(format!("init body: {e}")))?
                };
                Ok(ChannelEvent::Init(body))
            }
            EnvelopeKind::HeartbeatPing => Ok(ChannelEvent::HeartbeatPing),
            EnvelopeKind::HeartbeatPong => Ok(ChannelEvent::HeartbeatPong),
            EnvelopeKind::Payload => decode_message(self.body, "payload").map(ChannelEvent::Payload),
            EnvelopeKind::Fault => decode_message(self.body, "fault").map(ChannelEvent::Fault),
        }
    }
}

fn decode_message(body: Value, kind: &str) -> Result<JsonRpcMessage, CodecError> {
    serde_json::from_value(body).map_err(|e| CodecError::malformed(format!("{kind} body: {e}")))
}

/// Body of an `init` frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitBody {
    /// Server capabilities object.
    #[serde(default)]
    pub capabilities: Value,
    /// MCP protocol revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    /// Server name and version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Implementation>,
    /// Deployment partition the channel lives in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
}

/// Decoded push frame.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    /// Stream opened.
    Init(InitBody),
    /// Liveness probe.
    HeartbeatPing,
    /// Liveness reply.
    HeartbeatPong,
    /// JSON-RPC message.
    Payload(JsonRpcMessage),
    /// JSON-RPC error response or channel fault.
    Fault(JsonRpcMessage),
}
