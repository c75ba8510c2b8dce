//! Channel sessions: one per open push stream.
//!
//! A session is created when a client opens `/mcp/sse` and removed when the
//! stream closes, on shutdown, or by the staleness sweep. Every frame the
//! server pushes goes through [`ChannelSession::push`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tether_core::codec;
use tether_core::envelope::EnvelopeKind;
use tether_core::ids;
use tether_core::jsonrpc::JsonRpcMessage;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of pushing one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued for the stream.
    Sent,
    /// Buffer full; the frame was discarded.
    Dropped,
    /// The stream is gone.
    Closed,
}

/// Server-side record of one channel.
pub struct ChannelSession {
    id: String,
    partition: String,
    tx: mpsc::Sender<Bytes>,
    opened_at: Instant,
    last_heartbeat: Mutex<Instant>,
    connected: AtomicBool,
    dropped_frames: AtomicU64,
    cancel: CancellationToken,
}

impl ChannelSession {
    fn new(id: String, partition: String, tx: mpsc::Sender<Bytes>, cancel: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            id,
            partition,
            tx,
            opened_at: now,
            last_heartbeat: Mutex::new(now),
            connected: AtomicBool::new(true),
            dropped_frames: AtomicU64::new(0),
            cancel,
        }
    }

    /// Channel id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Partition tag.
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Whether the stream is still attached.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed) && !self.tx.is_closed()
    }

    /// Cancelled when the session is closed; background loops select on it.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Encode an envelope and queue it without waiting.
    pub fn push<B: Serialize + ?Sized>(&self, kind: EnvelopeKind, body: &B) -> PushOutcome {
        if !self.connected.load(Ordering::Relaxed) {
            return PushOutcome::Closed;
        }
        let frame = match codec::encode_envelope(kind, &self.id, body) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(channel_id = %self.id, kind = kind.as_str(), error = %e, "failed to encode push frame");
                return PushOutcome::Dropped;
            }
        };
        match self.tx.try_send(frame) {
            Ok(()) => PushOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(channel_id = %self.id, kind = kind.as_str(), dropped, "push buffer full, frame dropped");
                PushOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }

    /// Record liveness (a pong or any side-channel message).
    pub fn touch(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    /// Time since the last recorded liveness.
    pub fn last_heartbeat_age(&self) -> Duration {
        self.last_heartbeat.lock().elapsed()
    }

    /// Time since the session opened.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Frames discarded because the buffer was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.cancel.cancel();
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            connected: self.is_connected(),
            partition: self.partition.clone(),
            last_heartbeat_age_ms: millis(self.last_heartbeat_age()),
            age_ms: millis(self.age()),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Listing entry for `/mcp/connections`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Channel id.
    pub id: String,
    /// Whether the stream is attached.
    pub connected: bool,
    /// Partition tag.
    pub partition: String,
    /// Milliseconds since the last liveness signal.
    pub last_heartbeat_age_ms: u64,
    /// Milliseconds since the session opened.
    pub age_ms: u64,
}

/// All open sessions, keyed by channel id.
#[derive(Default)]
pub struct SessionTable {
    sessions: DashMap<String, Arc<ChannelSession>>,
}

impl SessionTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session with a fresh `conn_…` id.
    ///
    /// The returned receiver yields encoded frames for the push stream. The
    /// session's cancel token is a child of `parent`.
    pub fn open(
        &self,
        partition: &str,
        buffer: usize,
        parent: &CancellationToken,
    ) -> (Arc<ChannelSession>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let session = Arc::new(ChannelSession::new(
            ids::channel_id(),
            partition.to_owned(),
            tx,
            parent.child_token(),
        ));
        let _ = self.sessions.insert(session.id.clone(), Arc::clone(&session));
        info!(channel_id = %session.id, partition, "channel opened");
        metrics::gauge!("channel_sessions_active").increment(1.0);
        (session, rx)
    }

    /// Look up a session.
    pub fn get(&self, id: &str) -> Option<Arc<ChannelSession>> {
        self.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Record liveness. Returns `false` for an unknown id.
    pub fn touch(&self, id: &str) -> bool {
        match self.sessions.get(id) {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Remove and close a session. Returns `false` if it was not present.
    pub fn close(&self, id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            return false;
        };
        session.close();
        metrics::gauge!("channel_sessions_active").decrement(1.0);
        info!(channel_id = %id, age_ms = millis(session.age()), "channel closed");
        true
    }

    /// Remove every session whose last heartbeat is older than `max_age`.
    ///
    /// Returns the removed ids.
    pub fn sweep(&self, max_age: Duration) -> Vec<String> {
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| s.last_heartbeat_age() > max_age)
            .map(|s| s.key().clone())
            .collect();
        let removed: Vec<String> = stale.into_iter().filter(|id| self.close(id)).collect();
        if !removed.is_empty() {
            info!(count = removed.len(), max_age_ms = millis(max_age), "swept stale channels");
            metrics::counter!("channel_sessions_swept_total").increment(removed.len() as u64);
        }
        removed
    }

    /// Close every session.
    pub fn close_all(&self) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|s| s.key().clone()).collect();
        let closed = ids.iter().filter(|id| self.close(id)).count();
        if closed > 0 {
            debug!(closed, "closed all channels");
        }
        closed
    }

    /// Snapshot for listing, oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<(Instant, SessionInfo)> = self
            .sessions
            .iter()
            .map(|s| (s.opened_at, s.info()))
            .collect();
        sessions.sort_by_key(|(opened, _)| *opened);
        sessions.into_iter().map(|(_, info)| info).collect()
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is open.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Push a JSON-RPC response to a channel, as `fault` when it is an error.
pub fn push_response(session: &ChannelSession, response: &JsonRpcMessage) -> PushOutcome {
    let kind = if response.error.is_some() {
        EnvelopeKind::Fault
    } else {
        EnvelopeKind::Payload
    };
    session.push(kind, response)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
