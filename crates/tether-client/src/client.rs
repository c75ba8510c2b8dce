//! Push channel client.
//!
//! Owns one logical channel: a supervisor task keeps the push stream alive
//! (connect, read, reconnect with backoff), routes push frames into the
//! pending request table, and answers heartbeat pings. Callers send requests
//! on the side channel and await the reply from whichever path delivers it
//! first.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_core::codec;
use tether_core::envelope::ChannelEvent;
use tether_core::errors::ChannelError;
use tether_core::ids;
use tether_core::jsonrpc::{JSONRPC_VERSION, JsonRpcId, JsonRpcMessage, MessageKind, ResponseOutcome};
use tether_core::mcp::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult, ListToolsResult, Tool, methods,
};
use tether_core::retry::ReconnectPolicy;
use tether_settings::ClientSettings;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::pending::PendingRequestTable;
use crate::state::{ChannelState, ConnectionSnapshot, ConnectionState};
use crate::transport::{FrameStream, HttpTransport, PushTransport};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Client tuning.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Reply deadline for each request (and each pong).
    pub request_timeout: Duration,
    /// Deadline for [`PushChannelClient::open`], retries included.
    pub connect_timeout: Duration,
    /// Push stream silence after which the stream is treated as dead.
    pub idle_timeout: Option<Duration>,
    /// Reconnect behavior.
    pub reconnect: ReconnectPolicy,
    /// Identity sent in `initialize`.
    pub client_info: Implementation,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            idle_timeout: (settings.idle_timeout_ms > 0).then(|| Duration::from_millis(settings.idle_timeout_ms)),
            reconnect: settings.reconnect.clone(),
            client_info: Implementation::new("tether-client", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-RPC client over a split push channel.
pub struct PushChannelClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    transport: Arc<dyn PushTransport>,
    pending: PendingRequestTable,
    state: ConnectionState,
    supervisor: Mutex<Option<Supervisor>>,
}

struct Supervisor {
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

type ReadySender = oneshot::Sender<Result<(), ChannelError>>;

impl PushChannelClient {
    /// Client over an arbitrary transport.
    pub fn new(config: ClientConfig, transport: Arc<dyn PushTransport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                pending: PendingRequestTable::new(),
                state: ConnectionState::new(),
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Client over HTTP against `base_url`.
    pub fn http(base_url: &str, config: ClientConfig) -> Result<Self, ChannelError> {
        let transport = HttpTransport::new(base_url, config.request_timeout)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    /// Open the channel.
    ///
    /// Resolves once the push stream is connected and its `init` frame has
    /// assigned a channel id. Fails with [`ChannelError::ConnectTimeout`] if
    /// that takes longer than the configured connect timeout, or with
    /// [`ChannelError::ReconnectExhausted`] if every attempt fails first.
    pub async fn open(&self) -> Result<(), ChannelError> {
        if self.inner.state.current() == ChannelState::Open {
            return Ok(());
        }
        self.inner.stop_supervisor();
        let _ = self.inner.state.transition(ChannelState::Disconnected);
        let _ = self.inner.state.transition(ChannelState::Connecting);

        let (ready_tx, ready_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(Arc::clone(&self.inner), cancel.clone(), ready_tx));
        *self.inner.supervisor.lock() = Some(Supervisor { cancel, _task: task });

        let timeout = self.inner.config.connect_timeout;
        match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChannelError::closed("channel closed while opening")),
            Err(_) => {
                warn!(timeout_ms = millis(timeout), "push channel did not open in time");
                self.inner.shutdown("connect timeout");
                Err(ChannelError::ConnectTimeout {
                    timeout_ms: millis(timeout),
                })
            }
        }
    }

    /// Send a request and await its reply.
    ///
    /// Assigns a `msg_…` id when the message has none. Fails with
    /// [`ChannelError::NotConnected`] unless the channel is open.
    pub async fn send(&self, mut message: JsonRpcMessage) -> Result<Value, ChannelError> {
        if message.method.is_none() {
            return Err(ChannelError::InvalidMessage {
                reason: "request has no method".into(),
            });
        }
        let channel_id = self.open_channel_id()?;
        let _ = message.jsonrpc.get_or_insert_with(|| JSONRPC_VERSION.to_owned());
        let id = message
            .id
            .get_or_insert_with(|| JsonRpcId::String(ids::message_id()))
            .clone();

        let reply = self.inner.pending.register(id.clone(), self.inner.config.request_timeout)?;
        trace!(%id, method = message.method.as_deref(), "request registered");

        match self.inner.transport.post_message(&channel_id, &message).await {
            Ok(Some(sync_reply)) if sync_reply.id.is_none() => {
                // The server could not read our id (e.g. parse error); the
                // failure still belongs to this request.
                let error = sync_reply.error.map_or_else(
                    || ChannelError::InvalidMessage {
                        reason: "reply without id".into(),
                    },
                    ChannelError::from,
                );
                let _ = self.inner.pending.reject(&id, error);
            }
            Ok(Some(sync_reply)) => self.inner.settle(&sync_reply),
            Ok(None) => {}
            Err(e) => {
                let _ = self.inner.pending.reject(&id, e);
            }
        }
        reply.await
    }

    /// Send a request built from `method` and `params`.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ChannelError> {
        self.send(JsonRpcMessage {
            method: Some(method.to_owned()),
            params,
            ..JsonRpcMessage::default()
        })
        .await
    }

    /// Send a notification. No reply is awaited.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ChannelError> {
        let channel_id = self.open_channel_id()?;
        let message = JsonRpcMessage::notification(method, params);
        match self.inner.transport.post_message(&channel_id, &message).await? {
            Some(JsonRpcMessage { error: Some(error), .. }) => Err(error.into()),
            _ => Ok(()),
        }
    }

    /// Tear the channel down and fail every pending request.
    ///
    /// Idempotent.
    pub fn close(&self) {
        self.inner.shutdown("closed by client");
    }

    // ── MCP calls ───────────────────────────────────────────────────────

    /// `initialize` handshake followed by `notifications/initialized`.
    pub async fn initialize(&self) -> Result<InitializeResult, ChannelError> {
        let params = InitializeParams::new(self.inner.config.client_info.clone());
        let result = self.request(methods::INITIALIZE, Some(to_params(&params)?)).await?;
        let result: InitializeResult = decode(result, "initialize")?;
        self.notify(methods::INITIALIZED, None).await?;
        Ok(result)
    }

    /// `tools/list`.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, ChannelError> {
        let result = self.request(methods::TOOLS_LIST, None).await?;
        Ok(decode::<ListToolsResult>(result, "tools/list")?.tools)
    }

    /// `tools/call`.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult, ChannelError> {
        let params = CallToolParams {
            name: name.to_owned(),
            arguments,
        };
        let result = self.request(methods::TOOLS_CALL, Some(to_params(&params)?)).await?;
        decode(result, "tools/call")
    }

    // ── Observation ─────────────────────────────────────────────────────

    /// Current state.
    pub fn state(&self) -> ChannelState {
        self.inner.state.current()
    }

    /// Watch state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    /// Channel id of the live stream.
    pub fn channel_id(&self) -> Option<String> {
        self.inner.state.channel_id()
    }

    /// Copy of the connection record.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.state.snapshot()
    }

    /// Requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    fn open_channel_id(&self) -> Result<String, ChannelError> {
        match (self.inner.state.current(), self.inner.state.channel_id()) {
            (ChannelState::Open, Some(id)) => Ok(id),
            _ => Err(ChannelError::NotConnected),
        }
    }
}

impl Drop for PushChannelClient {
    fn drop(&mut self) {
        self.inner.shutdown("client dropped");
    }
}

fn to_params<T: serde::Serialize>(params: &T) -> Result<Value, ChannelError> {
    serde_json::to_value(params).map_err(|e| ChannelError::InvalidMessage { reason: e.to_string() })
}

fn decode<T: DeserializeOwned>(value: Value, method: &str) -> Result<T, ChannelError> {
    serde_json::from_value(value).map_err(|e| ChannelError::InvalidMessage {
        reason: format!("unexpected {method} result: {e}"),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor
// ─────────────────────────────────────────────────────────────────────────────

/// How a push stream ended.
struct StreamEnd {
    was_open: bool,
    reason: String,
}

/// Connect, read, and reconnect until cancelled or out of attempts.
///
/// The initial connection is not a retry: with `max_attempts = n` the
/// transport is asked to connect at most `n + 1` times between opens.
async fn supervise(inner: Arc<Inner>, cancel: CancellationToken, ready: ReadySender) {
    let mut ready = Some(ready);
    let policy = inner.config.reconnect.clone();
    let mut attempt: u32 = 0;

    loop {
        let end = tokio::select! {
            () = cancel.cancelled() => return,
            end = inner.run_stream(&mut ready) => end,
        };
        if end.was_open {
            attempt = 0;
        }
        let _ = inner.state.transition(ChannelState::Degraded);

        if attempt >= policy.max_attempts {
            let err = ChannelError::ReconnectExhausted {
                attempts: policy.max_attempts,
            };
            warn!(attempts = policy.max_attempts, reason = %end.reason, "giving up on push channel");
            inner.shutdown(&err.to_string());
            if let Some(tx) = ready.take() {
                let _ = tx.send(Err(err));
            }
            return;
        }

        attempt += 1;
        inner.state.record_retry(attempt);
        let delay = policy.jittered_delay_for(attempt, rand::random::<f64>());
        info!(
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = millis(delay),
            reason = %end.reason,
            "push channel lost, reconnecting"
        );

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
        let _ = inner.state.transition(ChannelState::Connecting);
    }
}

impl Inner {
    /// One stream lifetime: connect, then pump frames until it fails.
    ///
    /// Connecting and waiting for the `init` frame share one
    /// `connect_timeout`; an attempt that runs out of it counts as failed.
    async fn run_stream(&self, ready: &mut Option<ReadySender>) -> StreamEnd {
        let deadline = self.config.connect_timeout;
        let mut frames = match tokio::time::timeout(deadline, self.establish()).await {
            Ok(Ok(frames)) => frames,
            Ok(Err(end)) => return end,
            Err(_) => {
                return StreamEnd {
                    was_open: false,
                    reason: format!("channel did not open within {}ms", millis(deadline)),
                };
            }
        };
        if let Some(tx) = ready.take() {
            let _ = tx.send(Ok(()));
        }

        loop {
            match self.read_frame(&mut frames, true).await {
                Ok(frame) => {
                    let _ = self.handle_frame(&frame);
                }
                Err(end) => return end,
            }
        }
    }

    /// Connect and read until an `init` frame opens the channel.
    async fn establish(&self) -> Result<FrameStream, StreamEnd> {
        let mut frames = self.transport.connect().await.map_err(|e| StreamEnd {
            was_open: false,
            reason: e.to_string(),
        })?;
        loop {
            let frame = self.read_frame(&mut frames, false).await?;
            if self.handle_frame(&frame) {
                return Ok(frames);
            }
        }
    }

    async fn read_frame(&self, frames: &mut FrameStream, was_open: bool) -> Result<String, StreamEnd> {
        let reason = match self.next_frame(frames).await {
            Ok(Some(Ok(frame))) => return Ok(frame),
            Ok(Some(Err(e))) => e.to_string(),
            Ok(None) => "push stream ended".to_owned(),
            Err(reason) => reason,
        };
        Err(StreamEnd { was_open, reason })
    }

    async fn next_frame(&self, frames: &mut FrameStream) -> Result<Option<Result<String, ChannelError>>, String> {
        match self.config.idle_timeout {
            Some(idle) => tokio::time::timeout(idle, frames.next())
                .await
                .map_err(|_| format!("no frames for {}ms", millis(idle))),
            None => Ok(frames.next().await),
        }
    }

    /// Route one raw frame. Returns `true` when it opened the channel.
    fn handle_frame(&self, frame: &str) -> bool {
        let envelope = match codec::decode_envelope(frame.as_bytes()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping malformed push frame");
                return false;
            }
        };
        self.state.touch();
        let channel_id = envelope.channel_id.clone();

        match envelope.into_event() {
            Ok(ChannelEvent::Init(init)) => self.state.mark_open(channel_id, init.partition),
            Ok(ChannelEvent::HeartbeatPing) => {
                self.spawn_pong(channel_id);
                false
            }
            Ok(ChannelEvent::HeartbeatPong) => {
                trace!(%channel_id, "heartbeat pong");
                false
            }
            Ok(ChannelEvent::Payload(message) | ChannelEvent::Fault(message)) => {
                self.settle(&message);
                false
            }
            Err(e) => {
                warn!(%channel_id, error = %e, "dropping push frame with invalid body");
                false
            }
        }
    }

    /// Fire-and-forget pong; failures are logged, never fatal.
    fn spawn_pong(&self, channel_id: String) {
        let transport = Arc::clone(&self.transport);
        let timeout = self.config.request_timeout;
        drop(tokio::spawn(async move {
            match tokio::time::timeout(timeout, transport.post_pong(&channel_id)).await {
                Ok(Ok(())) => trace!(%channel_id, "pong sent"),
                Ok(Err(e)) => warn!(%channel_id, error = %e, "pong failed"),
                Err(_) => warn!(%channel_id, timeout_ms = millis(timeout), "pong timed out"),
            }
        }));
    }

    /// Complete the pending request a response refers to.
    fn settle(&self, message: &JsonRpcMessage) {
        match message.classify() {
            Ok(MessageKind::Response { id: Some(id), outcome }) => {
                let settled = match outcome {
                    ResponseOutcome::Result(result) => self.pending.resolve(id, result.clone()),
                    ResponseOutcome::Error(error) => self.pending.reject(id, error.clone().into()),
                };
                if !settled {
                    debug!(%id, "reply for unknown or already settled request dropped");
                }
            }
            Ok(MessageKind::Response { id: None, outcome }) => {
                warn!(?outcome, "channel fault without request id");
            }
            Ok(MessageKind::Request { method, .. } | MessageKind::Notification { method }) => {
                debug!(method, "ignoring server-initiated message");
            }
            Err(e) => warn!(error = %e, "dropping push message with invalid shape"),
        }
    }

    fn stop_supervisor(&self) {
        if let Some(supervisor) = self.supervisor.lock().take() {
            supervisor.cancel.cancel();
        }
    }

    /// Stop reconnecting, move to `Disconnected`, fail everything pending.
    fn shutdown(&self, reason: &str) {
        self.stop_supervisor();
        let _ = self.state.transition(ChannelState::Disconnected);
        let drained = self.pending.drain_all(reason);
        if drained > 0 {
            info!(drained, reason, "push channel closed with requests pending");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
