//! # tether-core
//!
//! Shared vocabulary for a split-channel JSON-RPC link: a server-push event
//! stream for server→client traffic and plain HTTP POSTs for client→server
//! traffic.
//!
//! - **JSON-RPC**: [`jsonrpc::JsonRpcMessage`] with shape classification and the
//!   standard error codes
//! - **Envelopes**: [`envelope::PushEnvelope`], the unit carried on the push stream
//! - **Codec**: [`codec`] frames envelopes as event-stream records and parses them
//!   back, including an incremental [`codec::SseFrameBuffer`]
//! - **Errors**: [`errors::ChannelError`] and [`errors::CodecError`]
//! - **Backoff**: reconnect delay math in [`retry`]
//! - **MCP payloads**: tool listing and invocation types in [`mcp`]

#![deny(unsafe_code)]

pub mod codec;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod jsonrpc;
pub mod logging;
pub mod mcp;
pub mod retry;

/// Path of the server-push stream endpoint.
pub const SSE_PATH: &str = "/mcp/sse";
/// Path of the side channel for client→server JSON-RPC messages.
pub const MESSAGE_PATH: &str = "/mcp/message";
/// Path the client posts heartbeat pongs to.
pub const PONG_PATH: &str = "/mcp/pong";
/// Header carrying the channel id on side-channel requests.
pub const CHANNEL_ID_HEADER: &str = "x-connection-id";
/// MCP protocol revision announced in the `init` frame.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
