//! `TetherServer`: axum HTTP surface for the split channel.
//!
//! - `GET /mcp/sse` opens a channel and streams push envelopes
//! - `POST /mcp/message` carries client→server JSON-RPC messages
//! - `POST /mcp/pong` answers heartbeat pings
//! - `/health`, `/capabilities`, `/mcp/connections`, `/mcp/cleanup` for operators

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use futures::Stream;
use serde_json::json;
use tether_core::envelope::{EnvelopeKind, InitBody};
use tether_core::jsonrpc::{JsonRpcError, JsonRpcId, JsonRpcMessage};
use tether_core::{CHANNEL_ID_HEADER, MCP_PROTOCOL_VERSION, MESSAGE_PATH, PONG_PATH, SSE_PATH};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::heartbeat::{run_ping_loop, run_sweep_loop};
use crate::rpc::handlers::{register_defaults, server_capabilities};
use crate::rpc::router::{DispatchContext, ServerDispatchRouter};
use crate::rpc::tools::ToolInvoker;
use crate::session::{self, ChannelSession, PushOutcome};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Dispatch router and session table.
    pub router: Arc<ServerDispatchRouter>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
}

/// The push-channel server.
pub struct TetherServer {
    config: Arc<ServerConfig>,
    router: Arc<ServerDispatchRouter>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl TetherServer {
    /// Server over a prepared router.
    pub fn new(config: ServerConfig, router: ServerDispatchRouter) -> Self {
        Self {
            config: Arc::new(config),
            router: Arc::new(router),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Server with the default MCP handlers backed by `invoker`.
    pub fn with_tools(config: ServerConfig, invoker: Arc<dyn ToolInvoker>) -> Self {
        let mut router = ServerDispatchRouter::new(config.handler_timeout);
        register_defaults(&mut router, invoker, config.server_info.clone());
        Self::new(config, router)
    }

    /// Build the axum router with all routes.
    pub fn app(&self) -> Router {
        let state = AppState {
            router: Arc::clone(&self.router),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/capabilities", get(capabilities_handler))
            .route(SSE_PATH, get(sse_handler))
            .route(MESSAGE_PATH, post(message_handler))
            .route(PONG_PATH, post(pong_handler))
            .route("/mcp/connections", get(connections_handler))
            .route("/mcp/cleanup", post(cleanup_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind, then serve and sweep in the background until shutdown.
    ///
    /// Returns the bound address and the serve task handle.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        info!(%addr, partition = %self.config.partition, "tether server listening");

        let token = self.shutdown.token();
        let app = self.app();
        let serve = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server exited with error");
            }
        });

        let sweep = tokio::spawn(run_sweep_loop(
            Arc::clone(&self.router),
            self.config.sweep_interval,
            self.config.session_max_age,
            self.shutdown.child_token(),
        ));
        self.shutdown.track(sweep);

        Ok((addr, serve))
    }

    /// Stop serving: close every channel and wait for background tasks.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> bool {
        let closed = self.router.sessions().close_all();
        info!(closed, "shutting down");
        self.shutdown.graceful_shutdown(timeout).await
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Dispatch router.
    pub fn router(&self) -> &Arc<ServerDispatchRouter> {
        &self.router
    }

    /// Shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

fn channel_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CHANNEL_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        &state.config.partition,
        &state.config.server_info.version,
        state.router.sessions().len(),
    ))
}

/// GET /capabilities
async fn capabilities_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(health::capabilities(&state.config.partition))
}

/// GET /mcp/sse
async fn sse_handler(State(state): State<AppState>) -> Response {
    let (session, rx) = state.router.sessions().open(
        &state.config.partition,
        state.config.channel_buffer,
        &state.shutdown.token(),
    );

    let init = InitBody {
        capabilities: server_capabilities(&state.config.partition),
        protocol_version: Some(MCP_PROTOCOL_VERSION.to_owned()),
        server_info: Some(state.config.server_info.clone()),
        partition: Some(state.config.partition.clone()),
    };
    if session.push(EnvelopeKind::Init, &init) != PushOutcome::Sent {
        warn!(channel_id = %session.id(), "failed to queue init frame");
    }

    drop(tokio::spawn(run_ping_loop(
        Arc::clone(&session),
        state.config.heartbeat_interval,
    )));

    let mut headers = HeaderMap::new();
    let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    let _ = headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(id) = HeaderValue::from_str(session.id()) {
        let _ = headers.insert(HeaderName::from_static(CHANNEL_ID_HEADER), id);
    }

    let body = Body::from_stream(channel_stream(Arc::clone(&state.router), &session, rx));
    (headers, body).into_response()
}

/// Removes the session when the push stream body is dropped.
struct StreamGuard {
    router: Arc<ServerDispatchRouter>,
    channel_id: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.router.sessions().close(&self.channel_id) {
            debug!(channel_id = %self.channel_id, "push stream dropped");
        }
    }
}

/// Frames for one channel until the session is closed or the client leaves.
fn channel_stream(
    router: Arc<ServerDispatchRouter>,
    session: &ChannelSession,
    rx: mpsc::Receiver<Bytes>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let guard = StreamGuard {
        router,
        channel_id: session.id().to_owned(),
    };
    let cancel: CancellationToken = session.cancel_token().clone();
    futures::stream::unfold((rx, cancel, guard), |(mut rx, cancel, guard)| async move {
        let frame = tokio::select! {
            () = cancel.cancelled() => None,
            frame = rx.recv() => frame,
        }?;
        Some((Ok(frame), (rx, cancel, guard)))
    })
}

/// POST /mcp/message
async fn message_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "unparseable side-channel body");
            let reply = JsonRpcMessage::failure(None, JsonRpcError::parse_error().with_data(json!(e.to_string())));
            return (StatusCode::BAD_REQUEST, Json(reply)).into_response();
        }
    };
    // Valid JSON that is not a message object is -32600, not -32700.
    let message: JsonRpcMessage = match serde_json::from_value(value.clone()) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "ill-typed side-channel body");
            let reply = JsonRpcMessage::failure(recover_id(&value), JsonRpcError::invalid_request(&e.to_string()));
            return (StatusCode::BAD_REQUEST, Json(reply)).into_response();
        }
    };

    let channel_id = channel_header(&headers);
    let session = channel_id.as_deref().and_then(|id| state.router.sessions().get(id));
    if let Some(session) = &session {
        session.touch();
    } else if let Some(id) = &channel_id {
        debug!(channel_id = %id, "message for unknown channel, replying inline");
    }

    let ctx = DispatchContext {
        channel_id,
        partition: state.config.partition.clone(),
    };
    let Some(reply) = state.router.dispatch(message, &ctx).await else {
        return StatusCode::ACCEPTED.into_response();
    };

    let delivery = state.config.response_delivery;
    let pushed = match &session {
        Some(session) if delivery.pushes() => session::push_response(session, &reply) == PushOutcome::Sent,
        _ => false,
    };
    if delivery.replies_inline() || !pushed {
        (StatusCode::OK, Json(reply)).into_response()
    } else {
        StatusCode::ACCEPTED.into_response()
    }
}

/// The `id` member of a rejected body, when it is a string or an integer.
fn recover_id(value: &serde_json::Value) -> Option<JsonRpcId> {
    match value.get("id")? {
        serde_json::Value::String(s) => Some(JsonRpcId::String(s.clone())),
        serde_json::Value::Number(n) => n.as_i64().map(JsonRpcId::Number),
        _ => None,
    }
}

/// POST /mcp/pong
async fn pong_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(channel_id) = channel_header(&headers) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "Missing connection ID"}))).into_response();
    };
    if state.router.sessions().touch(&channel_id) {
        Json(json!({"status": "ok"})).into_response()
    } else {
        debug!(%channel_id, "pong for unknown channel");
        (StatusCode::NOT_FOUND, Json(json!({"error": "Connection not found"}))).into_response()
    }
}

/// GET /mcp/connections
async fn connections_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let connections = state.router.sessions().list();
    Json(json!({"count": connections.len(), "connections": connections}))
}

/// POST /mcp/cleanup
async fn cleanup_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let removed = state.router.sweep(state.config.session_max_age);
    Json(json!({"status": "cleanup completed", "removed": removed}))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
