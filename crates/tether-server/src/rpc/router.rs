//! Method registry, dispatch, and channel session ownership.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use metrics::{counter, histogram};
use serde_json::Value;
use tether_core::jsonrpc::{JsonRpcError, JsonRpcMessage, MessageKind};
use tracing::{debug, error, warn};

use crate::rpc::errors::HandlerError;
use crate::session::SessionTable;

/// Trait implemented by every method handler.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler with the request params.
    async fn handle(&self, params: Option<Value>, ctx: &DispatchContext) -> Result<Value, HandlerError>;
}

/// Per-call context handed to handlers.
#[derive(Clone, Debug, Default)]
pub struct DispatchContext {
    /// Channel the message arrived for, if the caller named one.
    pub channel_id: Option<String>,
    /// Partition the server runs in.
    pub partition: String,
}

/// Routes JSON-RPC messages to handlers and owns the channel sessions.
pub struct ServerDispatchRouter {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
    sessions: SessionTable,
    handler_timeout: Duration,
}

/// Handlers that run longer than this are logged as slow.
const SLOW_HANDLER: Duration = Duration::from_secs(5);

impl ServerDispatchRouter {
    /// Empty router with the given per-handler deadline.
    pub fn new(handler_timeout: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            sessions: SessionTable::new(),
            handler_timeout,
        }
    }

    /// Register a handler. A later registration for the same method wins.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler + 'static) {
        if self.handlers.insert(method.to_owned(), Arc::new(handler)).is_some() {
            debug!(method, "replaced method handler");
        }
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `method` has a handler.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Open channel sessions.
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Remove sessions whose last heartbeat is older than `max_age`.
    pub fn sweep(&self, max_age: Duration) -> Vec<String> {
        self.sessions.sweep(max_age)
    }

    /// Dispatch one message.
    ///
    /// Returns the response for a request, or an error response for anything
    /// that is not a well-formed request or notification. Notifications
    /// produce `None`, even when their handler fails.
    pub async fn dispatch(&self, message: JsonRpcMessage, ctx: &DispatchContext) -> Option<JsonRpcMessage> {
        let id = message.id.clone();
        if !message.has_valid_version() {
            counter!("rpc_errors_total", "method" => "", "error_type" => "invalid_request").increment(1);
            return Some(JsonRpcMessage::failure(
                id,
                JsonRpcError::invalid_request("jsonrpc must be \"2.0\""),
            ));
        }

        let (request_id, method) = match message.classify() {
            Ok(MessageKind::Request { id, method }) => (Some(id.clone()), method.to_owned()),
            Ok(MessageKind::Notification { method }) => (None, method.to_owned()),
            Ok(MessageKind::Response { .. }) => {
                return Some(JsonRpcMessage::failure(
                    id,
                    JsonRpcError::invalid_request("unexpected response message"),
                ));
            }
            Err(shape) => {
                return Some(JsonRpcMessage::failure(
                    id,
                    JsonRpcError::invalid_request(&shape.to_string()),
                ));
            }
        };

        counter!("rpc_requests_total", "method" => method.clone()).increment(1);
        let Some(handler) = self.handlers.get(&method).map(Arc::clone) else {
            counter!("rpc_errors_total", "method" => method.clone(), "error_type" => "method_not_found").increment(1);
            return match request_id {
                Some(id) => Some(JsonRpcMessage::failure(Some(id), JsonRpcError::method_not_found(&method))),
                None => {
                    debug!(method = %method, "notification for unknown method ignored");
                    None
                }
            };
        };

        let outcome = self.run_handler(handler.as_ref(), &method, message.params, ctx).await;
        match (request_id, outcome) {
            (Some(id), Ok(result)) => Some(JsonRpcMessage::success(Some(id), result)),
            (Some(id), Err(error)) => Some(JsonRpcMessage::failure(Some(id), error)),
            (None, Ok(_)) => None,
            (None, Err(error)) => {
                warn!(method = %method, %error, "notification handler failed");
                None
            }
        }
    }

    /// Run a handler under the timeout, converting every failure to a wire error.
    async fn run_handler(
        &self,
        handler: &dyn MethodHandler,
        method: &str,
        params: Option<Value>,
        ctx: &DispatchContext,
    ) -> Result<Value, JsonRpcError> {
        let start = Instant::now();
        let call = AssertUnwindSafe(handler.handle(params, ctx)).catch_unwind();
        let outcome = tokio::time::timeout(self.handler_timeout, call).await;

        let duration = start.elapsed();
        histogram!("rpc_request_duration_seconds", "method" => method.to_owned()).record(duration.as_secs_f64());
        if duration >= SLOW_HANDLER {
            warn!(method, duration_secs = duration.as_secs_f64(), "slow handler");
        }

        let (kind, error) = match outcome {
            Ok(Ok(Ok(result))) => return Ok(result),
            Ok(Ok(Err(err))) => {
                debug!(method, error = %err, "handler returned error");
                (err.kind(), err.into_rpc_error())
            }
            Ok(Err(panic)) => {
                let detail = panic_message(panic.as_ref());
                error!(method, panic = %detail, "handler panicked");
                ("panic", JsonRpcError::internal(&detail))
            }
            Err(_elapsed) => {
                let timeout_ms = u64::try_from(self.handler_timeout.as_millis()).unwrap_or(u64::MAX);
                error!(method, timeout_ms, "handler timed out");
                (
                    "timeout",
                    JsonRpcError::internal(&format!("handler for '{method}' timed out after {timeout_ms}ms")),
                )
            }
        };
        counter!("rpc_errors_total", "method" => method.to_owned(), "error_type" => kind).increment(1);
        Err(error)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
