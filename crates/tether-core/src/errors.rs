//! Error taxonomy for push channels.
//!
//! Errors split into two families:
//!
//! - **request-local**: one pending call fails, the channel stays up
//!   ([`ChannelError::RequestTimeout`], [`ChannelError::Remote`],
//!   [`ChannelError::DuplicateId`])
//! - **channel-fatal**: every pending call on the channel fails
//!   ([`ChannelError::ChannelClosed`], [`ChannelError::ReconnectExhausted`])
//!
//! Frame decode failures ([`CodecError`]) are neither: callers log and skip
//! the frame.

use serde_json::Value;

use crate::jsonrpc::{JsonRpcError, JsonRpcId};

/// A push frame could not be encoded or decoded.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CodecError {
    /// Frame is not a valid envelope.
    #[error("malformed frame: {reason}")]
    MalformedFrame {
        /// What was wrong.
        reason: String,
    },
    /// Envelope body could not be serialized.
    #[error("failed to encode envelope: {reason}")]
    Encode {
        /// Serializer message.
        reason: String,
    },
}

impl CodecError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame { reason: reason.into() }
    }
}

/// Failure of a channel operation.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ChannelError {
    /// An entry with this id is already pending.
    #[error("request id {id} is already pending")]
    DuplicateId {
        /// The colliding id.
        id: JsonRpcId,
    },

    /// No reply arrived before the deadline.
    #[error("request {id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Request id.
        id: JsonRpcId,
        /// Deadline that elapsed.
        timeout_ms: u64,
    },

    /// The channel was torn down while the call was pending.
    #[error("channel closed: {reason}")]
    ChannelClosed {
        /// Teardown reason.
        reason: String,
    },

    /// `open()` did not reach the open state in time.
    #[error("channel did not open within {timeout_ms}ms")]
    ConnectTimeout {
        /// Deadline that elapsed.
        timeout_ms: u64,
    },

    /// Every reconnect attempt failed.
    #[error("max reconnection attempts reached ({attempts})")]
    ReconnectExhausted {
        /// Retries performed after the initial attempt.
        attempts: u32,
    },

    /// Operation requires an open channel.
    #[error("channel is not connected")]
    NotConnected,

    /// The peer answered with a JSON-RPC error.
    #[error("remote error {code}: {message}")]
    Remote {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
        /// Structured detail, if any.
        data: Option<Value>,
    },

    /// A message could not be sent because of its shape.
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// What was wrong.
        reason: String,
    },

    /// HTTP or stream I/O failure.
    #[error("transport error: {reason}")]
    Transport {
        /// Underlying error text.
        reason: String,
    },

    /// Frame codec failure.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl ChannelError {
    /// Shorthand for [`ChannelError::Transport`].
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport { reason: reason.into() }
    }

    /// Shorthand for [`ChannelError::ChannelClosed`].
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ChannelClosed { reason: reason.into() }
    }

    /// Whether this error takes the whole channel down.
    pub fn is_channel_fatal(&self) -> bool {
        matches!(self, Self::ChannelClosed { .. } | Self::ReconnectExhausted { .. })
    }

    /// Whether this error fails a single request and leaves the channel up.
    pub fn is_request_local(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout { .. } | Self::Remote { .. } | Self::DuplicateId { .. }
        )
    }
}

impl From<JsonRpcError> for ChannelError {
    fn from(error: JsonRpcError) -> Self {
        Self::Remote {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::codes;

    #[test]
    fn timeout_display() {
        let err = ChannelError::RequestTimeout {
            id: JsonRpcId::from(3),
            timeout_ms: 500,
        };
        assert_eq!(err.to_string(), "request 3 timed out after 500ms");
        assert!(err.is_request_local());
        assert!(!err.is_channel_fatal());
    }

    #[test]
    fn exhausted_is_fatal() {
        let err = ChannelError::ReconnectExhausted { attempts: 10 };
        assert!(err.is_channel_fatal());
        assert_eq!(err.to_string(), "max reconnection attempts reached (10)");
    }

    #[test]
    fn closed_is_fatal() {
        assert!(ChannelError::closed("client closed").is_channel_fatal());
    }

    #[test]
    fn remote_from_jsonrpc_error() {
        let err: ChannelError = JsonRpcError::method_not_found("nope").into();
        match err {
            ChannelError::Remote { code, message, data } => {
                assert_eq!(code, codes::METHOD_NOT_FOUND);
                assert!(message.contains("nope"));
                assert!(data.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn codec_error_is_transparent() {
        let err: ChannelError = CodecError::malformed("bad kind").into();
        assert_eq!(err.to_string(), "malformed frame: bad kind");
        assert!(!err.is_channel_fatal());
        assert!(!err.is_request_local());
    }
}
