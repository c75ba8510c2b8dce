//! # tether-client
//!
//! Client half of a split-channel JSON-RPC link.
//!
//! - [`PushChannelClient`] owns the push stream, reconnects it with bounded
//!   backoff, answers heartbeat pings, and correlates replies
//! - [`pending::PendingRequestTable`] holds in-flight requests and their timers
//! - [`state::ConnectionState`] is the observable channel state machine
//! - [`transport::PushTransport`] is the network seam; [`transport::HttpTransport`]
//!   implements it over reqwest

#![deny(unsafe_code)]

pub mod client;
pub mod pending;
pub mod sse;
pub mod state;
pub mod transport;

pub use client::{ClientConfig, PushChannelClient};
pub use state::{ChannelState, ConnectionSnapshot};
pub use transport::{HttpTransport, PushTransport};
