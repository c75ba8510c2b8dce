//! # tether-server
//!
//! Server half of a split-channel JSON-RPC link, exposed over axum.
//!
//! - [`server::TetherServer`] mounts the push stream, the side channel, and
//!   the operator routes
//! - [`rpc::ServerDispatchRouter`] maps methods to handlers and contains
//!   handler panics and timeouts
//! - [`session::SessionTable`] tracks one [`session::ChannelSession`] per open
//!   push stream
//! - [`heartbeat`] runs the per-channel ping loop and the staleness sweep

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod heartbeat;
pub mod rpc;
pub mod server;
pub mod session;
pub mod shutdown;

pub use config::ServerConfig;
pub use rpc::{DispatchContext, HandlerError, MethodHandler, ServerDispatchRouter, ToolInvoker};
pub use server::TetherServer;
pub use session::{ChannelSession, SessionTable};
