//! Heartbeat ping loop and staleness sweep loop.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tether_core::envelope::EnvelopeKind;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::rpc::router::ServerDispatchRouter;
use crate::session::{ChannelSession, PushOutcome};

/// Shortest tick either loop will run at; zero intervals are raised to it.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Why a ping loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingLoopEnd {
    /// The session was closed or the server is shutting down.
    Cancelled,
    /// The push stream went away.
    StreamClosed,
}

/// Push a `heartbeat-ping` on `session` every `interval`.
///
/// Stops when the session's token is cancelled or the stream is gone. A
/// ping dropped on a full buffer is not fatal; the client's idle timer and
/// the sweep decide what happens to a channel that stops answering.
pub async fn run_ping_loop(session: Arc<ChannelSession>, interval: Duration) -> PingLoopEnd {
    let mut ticks = time::interval(interval.max(MIN_INTERVAL));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; the init frame already went out.
    let _ = ticks.tick().await;

    loop {
        tokio::select! {
            () = session.cancel_token().cancelled() => return PingLoopEnd::Cancelled,
            _ = ticks.tick() => {
                match session.push(EnvelopeKind::HeartbeatPing, &json!({})) {
                    PushOutcome::Sent => trace!(channel_id = %session.id(), "heartbeat ping"),
                    PushOutcome::Dropped => {}
                    PushOutcome::Closed => {
                        debug!(channel_id = %session.id(), "push stream closed, stopping pings");
                        return PingLoopEnd::StreamClosed;
                    }
                }
            }
        }
    }
}

/// Run [`ServerDispatchRouter::sweep`] every `interval` until cancelled.
pub async fn run_sweep_loop(
    router: Arc<ServerDispatchRouter>,
    interval: Duration,
    max_age: Duration,
    cancel: CancellationToken,
) {
    let mut ticks = time::interval(interval.max(MIN_INTERVAL));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let _ = ticks.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("sweep loop stopped");
                return;
            }
            _ = ticks.tick() => {
                let removed = router.sweep(max_age);
                trace!(removed = removed.len(), remaining = router.sessions().len(), "sweep pass");
            }
        }
    }
}
