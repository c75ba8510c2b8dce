//! Handler error type.

use serde_json::Value;
use tether_core::jsonrpc::{JsonRpcError, codes};
use tracing::warn;

/// Failure returned by a method handler.
///
/// Converted to a JSON-RPC error object by the router; it never crosses the
/// transport as anything else.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Params missing or of the wrong shape (`-32602`).
    #[error("{message}")]
    InvalidParams {
        /// What is wrong.
        message: String,
    },

    /// Application-defined failure.
    ///
    /// Codes inside the reserved JSON-RPC range are demoted to `-32603`.
    #[error("{message}")]
    Application {
        /// Application error code.
        code: i64,
        /// Human-readable message.
        message: String,
        /// Optional structured detail.
        data: Option<Value>,
    },

    /// A tool ran and failed (`-32603 Tool execution failed`).
    #[error("{message}")]
    ToolExecution {
        /// Failure text from the tool.
        message: String,
    },

    /// Unexpected failure (`-32603`).
    #[error("{message}")]
    Internal {
        /// Description, returned in `data`.
        message: String,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::InvalidParams`].
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Shorthand for [`HandlerError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Code of the wire error this becomes.
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidParams { .. } => codes::INVALID_PARAMS,
            Self::Application { code, .. } if !codes::is_reserved(*code) => *code,
            Self::Application { .. } | Self::ToolExecution { .. } | Self::Internal { .. } => codes::INTERNAL_ERROR,
        }
    }

    /// Label used for the `error_type` metric.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParams { .. } => "invalid_params",
            Self::Application { .. } => "application",
            Self::ToolExecution { .. } => "tool_execution",
            Self::Internal { .. } => "internal",
        }
    }

    /// Wire error object.
    pub fn into_rpc_error(self) -> JsonRpcError {
        match self {
            Self::InvalidParams { message } => JsonRpcError::invalid_params(&message),
            Self::Application { code, message, data } => {
                let code = if codes::is_reserved(code) {
                    warn!(code, "application error code in reserved range, reporting as internal error");
                    codes::INTERNAL_ERROR
                } else {
                    code
                };
                JsonRpcError { code, message, data }
            }
            Self::ToolExecution { message } => {
                JsonRpcError::new(codes::INTERNAL_ERROR, "Tool execution failed").with_data(Value::String(message))
            }
            Self::Internal { message } => JsonRpcError::internal(&message),
        }
    }
}
