//! Table of in-flight requests awaiting a reply.
//!
//! Each entry owns a one-shot completion and a timeout timer task. Removing
//! an entry (resolve, reject, timeout, drain) is the only way to complete it,
//! and a `DashMap` remove is atomic per key, so an entry completes exactly
//! once even when the push stream and the POST reply race.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tether_core::errors::ChannelError;
use tether_core::jsonrpc::JsonRpcId;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

type Completion = Result<Value, ChannelError>;

struct PendingEntry {
    /// Generation of this registration; a timer only removes its own entry.
    seq: u64,
    tx: oneshot::Sender<Completion>,
    timer: JoinHandle<()>,
}

/// In-flight request table keyed by JSON-RPC id.
pub struct PendingRequestTable {
    entries: Arc<DashMap<JsonRpcId, PendingEntry>>,
    next_seq: AtomicU64,
}

impl PendingRequestTable {
    /// Empty table.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Register `id` and arm its timeout.
    ///
    /// Fails with [`ChannelError::DuplicateId`] if `id` is already pending.
    /// Must be called from within a tokio runtime.
    pub fn register(&self, id: JsonRpcId, timeout: Duration) -> Result<PendingReply, ChannelError> {
        match self.entries.entry(id.clone()) {
            Entry::Occupied(_) => Err(ChannelError::DuplicateId { id }),
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel();
                let timer = spawn_timer(Arc::clone(&self.entries), id.clone(), seq, timeout);
                let _ = slot.insert(PendingEntry { seq, tx, timer });
                Ok(PendingReply { id, rx })
            }
        }
    }

    /// Complete `id` with a result. Returns `false` if nothing was pending.
    pub fn resolve(&self, id: &JsonRpcId, result: Value) -> bool {
        self.complete(id, Ok(result))
    }

    /// Complete `id` with an error. Returns `false` if nothing was pending.
    pub fn reject(&self, id: &JsonRpcId, error: ChannelError) -> bool {
        self.complete(id, Err(error))
    }

    /// Reject every pending entry with [`ChannelError::ChannelClosed`].
    ///
    /// Returns the number of entries rejected.
    pub fn drain_all(&self, reason: &str) -> usize {
        let ids: Vec<JsonRpcId> = self.entries.iter().map(|e| e.key().clone()).collect();
        let drained = ids
            .iter()
            .filter(|id| self.complete(id, Err(ChannelError::closed(reason))))
            .count();
        if drained > 0 {
            debug!(drained, reason, "drained pending requests");
        }
        drained
    }

    /// Whether `id` is pending.
    pub fn contains(&self, id: &JsonRpcId) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn complete(&self, id: &JsonRpcId, outcome: Completion) -> bool {
        let Some((_, entry)) = self.entries.remove(id) else {
            return false;
        };
        entry.timer.abort();
        // The caller may have dropped its reply future; that is not an error.
        let _ = entry.tx.send(outcome);
        true
    }
}

impl Default for PendingRequestTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PendingRequestTable {
    fn drop(&mut self) {
        let _ = self.drain_all("client dropped");
    }
}

fn spawn_timer(
    entries: Arc<DashMap<JsonRpcId, PendingEntry>>,
    id: JsonRpcId,
    seq: u64,
    timeout: Duration,
) -> JoinHandle<()> {
    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some((id, entry)) = entries.remove_if(&id, |_, e| e.seq == seq) {
            debug!(%id, timeout_ms, "pending request timed out");
            let _ = entry.tx.send(Err(ChannelError::RequestTimeout { id, timeout_ms }));
        }
    })
}

/// Completion future returned by [`PendingRequestTable::register`].
#[derive(Debug)]
pub struct PendingReply {
    id: JsonRpcId,
    rx: oneshot::Receiver<Completion>,
}

impl PendingReply {
    /// Id this reply is waiting on.
    pub fn id(&self) -> &JsonRpcId {
        &self.id
    }
}

impl Future for PendingReply {
    type Output = Completion;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(ChannelError::closed("pending entry dropped"))))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    const LONG: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn resolve_completes_reply() {
        let table = PendingRequestTable::new();
        let reply = table.register(JsonRpcId::from(1), LONG).unwrap();
        assert!(table.resolve(&JsonRpcId::from(1), json!({"ok": true})));
        assert_eq!(reply.await.unwrap(), json!({"ok": true}));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn second_resolution_is_ignored() {
        let table = PendingRequestTable::new();
        let reply = table.register(JsonRpcId::from("a"), LONG).unwrap();
        assert!(table.resolve(&JsonRpcId::from("a"), json!(1)));
        assert!(!table.resolve(&JsonRpcId::from("a"), json!(2)));
        assert!(!table.reject(&JsonRpcId::from("a"), ChannelError::NotConnected));
        assert_eq!(reply.await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn duplicate_id_rejected() {
        let table = PendingRequestTable::new();
        let _reply = table.register(JsonRpcId::from(7), LONG).unwrap();
        assert_matches!(
            table.register(JsonRpcId::from(7), LONG),
            Err(ChannelError::DuplicateId { id }) if id == JsonRpcId::from(7)
        );
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn reject_delivers_error() {
        let table = PendingRequestTable::new();
        let reply = table.register(JsonRpcId::from(2), LONG).unwrap();
        let err = ChannelError::Remote {
            code: -32_601,
            message: "Method not found: x".into(),
            data: None,
        };
        assert!(table.reject(&JsonRpcId::from(2), err.clone()));
        assert_eq!(reply.await.unwrap_err(), err);
    }

    #[tokio::test]
    async fn unknown_id_is_a_no_op() {
        let table = PendingRequestTable::new();
        assert!(!table.resolve(&JsonRpcId::from(99), json!(null)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rejects_and_removes_entry() {
        let table = PendingRequestTable::new();
        let reply = table.register(JsonRpcId::from(3), Duration::from_millis(500)).unwrap();
        assert_matches!(
            reply.await,
            Err(ChannelError::RequestTimeout { timeout_ms: 500, .. })
        );
        assert!(!table.contains(&JsonRpcId::from(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_entry_is_not_timed_out_later() {
        let table = PendingRequestTable::new();
        let reply = table.register(JsonRpcId::from(4), Duration::from_millis(100)).unwrap();
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(table.resolve(&JsonRpcId::from(4), json!("early")));
        assert_eq!(reply.await.unwrap(), json!("early"));

        // Reuse the id with a longer deadline; the first timer must not touch it.
        let reply = table.register(JsonRpcId::from(4), Duration::from_secs(1)).unwrap();
        tokio::time::advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert!(table.contains(&JsonRpcId::from(4)));
        assert!(table.resolve(&JsonRpcId::from(4), json!("second")));
        assert_eq!(reply.await.unwrap(), json!("second"));
    }

    #[tokio::test]
    async fn drain_all_rejects_everything() {
        let table = PendingRequestTable::new();
        let a = table.register(JsonRpcId::from(1), LONG).unwrap();
        let b = table.register(JsonRpcId::from("two"), LONG).unwrap();
        assert_eq!(table.drain_all("closed by client"), 2);
        assert!(table.is_empty());
        assert_matches!(a.await, Err(ChannelError::ChannelClosed { reason }) if reason == "closed by client");
        assert_matches!(b.await, Err(ChannelError::ChannelClosed { .. }));
        assert_eq!(table.drain_all("again"), 0);
    }

    #[tokio::test]
    async fn dropped_reply_does_not_break_resolution() {
        let table = PendingRequestTable::new();
        drop(table.register(JsonRpcId::from(5), LONG).unwrap());
        assert!(table.resolve(&JsonRpcId::from(5), json!(1)));
    }
}
