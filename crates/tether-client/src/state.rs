//! Connection state machine.
//!
//! ```text
//! Disconnected ──open──▶ Connecting ──init frame──▶ Open
//!      ▲                    │  ▲                     │
//!      │            failure │  │ retry               │ stream error / idle
//!      │                    ▼  │                     ▼
//!      └──exhausted/close── Degraded ◀───────────────┘
//! ```
//!
//! `close()` moves any state to `Disconnected`.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Lifecycle of a push channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// No stream and no retry in progress.
    Disconnected,
    /// Stream requested, `init` frame not yet received.
    Connecting,
    /// `init` received; requests may be sent.
    Open,
    /// Stream lost; waiting to retry.
    Degraded,
}

impl ChannelState {
    /// Whether the machine permits `self → next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ChannelState::{Connecting, Degraded, Disconnected, Open};
        // Open → Open: a fresh init on a live stream re-announces the channel.
        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected | Degraded, Connecting)
                | (Connecting | Open, Open | Degraded)
        )
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Degraded => "degraded",
        })
    }
}

#[derive(Debug)]
struct StateRecord {
    state: ChannelState,
    channel_id: Option<String>,
    partition: Option<String>,
    last_heartbeat: Option<Instant>,
    retry_count: u32,
}

/// Point-in-time copy of the connection record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Current state.
    pub state: ChannelState,
    /// Server-assigned channel id of the live stream.
    pub channel_id: Option<String>,
    /// Partition the server reported in its `init` frame.
    pub partition: Option<String>,
    /// Time since the last frame, if any was received.
    pub since_last_heartbeat: Option<Duration>,
    /// Reconnect attempts since the channel was last open.
    pub retry_count: u32,
}

/// Shared, observable connection record.
pub struct ConnectionState {
    record: Mutex<StateRecord>,
    tx: watch::Sender<ChannelState>,
}

impl ConnectionState {
    /// Fresh record in `Disconnected`.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ChannelState::Disconnected);
        Self {
            record: Mutex::new(StateRecord {
                state: ChannelState::Disconnected,
                channel_id: None,
                partition: None,
                last_heartbeat: None,
                retry_count: 0,
            }),
            tx,
        }
    }

    /// Current state.
    pub fn current(&self) -> ChannelState {
        self.record.lock().state
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.tx.subscribe()
    }

    /// Move to `next` if allowed. Returns whether the move happened.
    pub fn transition(&self, next: ChannelState) -> bool {
        let mut record = self.record.lock();
        let from = record.state;
        if !from.can_transition_to(next) {
            warn!(%from, to = %next, "rejected channel state transition");
            return false;
        }
        record.state = next;
        if next == ChannelState::Disconnected {
            record.channel_id = None;
        }
        drop(record);
        if from != next {
            debug!(%from, to = %next, "channel state changed");
        }
        let _ = self.tx.send_replace(next);
        true
    }

    /// Record a received `init` frame and move to `Open`.
    pub fn mark_open(&self, channel_id: String, partition: Option<String>) -> bool {
        let mut record = self.record.lock();
        let from = record.state;
        if !from.can_transition_to(ChannelState::Open) {
            warn!(%from, %channel_id, "init frame received outside of connecting state");
            return false;
        }
        debug!(%from, %channel_id, "channel open");
        record.state = ChannelState::Open;
        record.channel_id = Some(channel_id);
        record.partition = partition;
        record.last_heartbeat = Some(Instant::now());
        record.retry_count = 0;
        drop(record);
        let _ = self.tx.send_replace(ChannelState::Open);
        true
    }

    /// Record a reconnect attempt.
    pub fn record_retry(&self, attempt: u32) {
        self.record.lock().retry_count = attempt;
    }

    /// Record liveness (any frame counts).
    pub fn touch(&self) {
        self.record.lock().last_heartbeat = Some(Instant::now());
    }

    /// Channel id of the live stream.
    pub fn channel_id(&self) -> Option<String> {
        self.record.lock().channel_id.clone()
    }

    /// Reconnect attempts since the channel was last open.
    pub fn retry_count(&self) -> u32 {
        self.record.lock().retry_count
    }

    /// Copy of the full record.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        let record = self.record.lock();
        ConnectionSnapshot {
            state: record.state,
            channel_id: record.channel_id.clone(),
            partition: record.partition.clone(),
            since_last_heartbeat: record.last_heartbeat.map(|t| t.elapsed()),
            retry_count: record.retry_count,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChannelState::{Connecting, Degraded, Disconnected, Open};

    #[test]
    fn allowed_transitions() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Open));
        assert!(Connecting.can_transition_to(Degraded));
        assert!(Open.can_transition_to(Degraded));
        assert!(Degraded.can_transition_to(Connecting));
        for s in [Disconnected, Connecting, Open, Degraded] {
            assert!(s.can_transition_to(Disconnected));
        }
    }

    #[test]
    fn forbidden_transitions() {
        assert!(!Disconnected.can_transition_to(Open));
        assert!(!Degraded.can_transition_to(Open));
        assert!(!Open.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Degraded));
    }

    #[tokio::test]
    async fn mark_open_requires_connecting() {
        let state = ConnectionState::new();
        assert!(!state.mark_open("conn_1".into(), None));
        assert_eq!(state.current(), Disconnected);

        assert!(state.transition(Connecting));
        assert!(state.mark_open("conn_1".into(), Some("aws".into())));
        let snap = state.snapshot();
        assert_eq!(snap.state, Open);
        assert_eq!(snap.channel_id.as_deref(), Some("conn_1"));
        assert_eq!(snap.partition.as_deref(), Some("aws"));
        assert_eq!(snap.retry_count, 0);
    }

    #[tokio::test]
    async fn disconnect_clears_channel_id() {
        let state = ConnectionState::new();
        let _ = state.transition(Connecting);
        let _ = state.mark_open("conn_1".into(), None);
        assert!(state.transition(Disconnected));
        assert_eq!(state.channel_id(), None);
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let state = ConnectionState::new();
        let mut rx = state.subscribe();
        let _ = state.transition(Connecting);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_age_tracks_touch() {
        let state = ConnectionState::new();
        let _ = state.transition(Connecting);
        let _ = state.mark_open("conn_1".into(), None);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(state.snapshot().since_last_heartbeat, Some(Duration::from_secs(5)));
        state.touch();
        assert_eq!(state.snapshot().since_last_heartbeat, Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn retry_count_reset_on_open() {
        let state = ConnectionState::new();
        let _ = state.transition(Connecting);
        let _ = state.transition(Degraded);
        state.record_retry(3);
        assert_eq!(state.retry_count(), 3);
        let _ = state.transition(Connecting);
        let _ = state.mark_open("conn_2".into(), None);
        assert_eq!(state.retry_count(), 0);
    }
}
