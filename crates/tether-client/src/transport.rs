//! Transport seam between the channel client and the network.
//!
//! [`PushTransport`] abstracts the two halves of the link: the long-lived
//! push stream and the short side-channel POSTs. [`HttpTransport`] is the
//! reqwest implementation; tests substitute scripted transports.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use tether_core::errors::ChannelError;
use tether_core::jsonrpc::JsonRpcMessage;
use tether_core::{CHANNEL_ID_HEADER, MESSAGE_PATH, PONG_PATH, SSE_PATH};
use tracing::{debug, instrument};

use crate::sse::frame_stream;

/// Raw push frames, one event-stream record each.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ChannelError>> + Send>>;

/// Both halves of a split channel.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open the push stream.
    async fn connect(&self) -> Result<FrameStream, ChannelError>;

    /// Post a JSON-RPC message on the side channel.
    ///
    /// Returns the synchronous reply if the server put one in the response
    /// body, `None` if it only acknowledged receipt.
    async fn post_message(
        &self,
        channel_id: &str,
        message: &JsonRpcMessage,
    ) -> Result<Option<JsonRpcMessage>, ChannelError>;

    /// Answer a heartbeat ping.
    async fn post_pong(&self, channel_id: &str) -> Result<(), ChannelError>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Transport against `base_url` (e.g. `http://127.0.0.1:8787`).
    ///
    /// `request_timeout` bounds each side-channel POST; the push stream
    /// itself has no overall deadline.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ChannelError> {
        let http = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| ChannelError::transport(format!("failed to build http client: {e}")))?;
        Ok(Self::with_client(http, base_url, request_timeout))
    }

    /// Transport reusing an existing client.
    pub fn with_client(http: reqwest::Client, base_url: &str, request_timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn transport_err(context: &str, err: &reqwest::Error) -> ChannelError {
    ChannelError::transport(format!("{context}: {err}"))
}

#[async_trait]
impl PushTransport for HttpTransport {
    async fn connect(&self) -> Result<FrameStream, ChannelError> {
        let response = self
            .http
            .get(self.url(SSE_PATH))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| transport_err("push stream request failed", &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::transport(format!("push stream endpoint returned {status}")));
        }
        debug!(url = %self.base_url, "push stream connected");
        Ok(frame_stream(response.bytes_stream()))
    }

    #[instrument(skip_all, fields(channel_id = %channel_id, method = message.method.as_deref()))]
    async fn post_message(
        &self,
        channel_id: &str,
        message: &JsonRpcMessage,
    ) -> Result<Option<JsonRpcMessage>, ChannelError> {
        let response = self
            .http
            .post(self.url(MESSAGE_PATH))
            .header(CHANNEL_ID_HEADER, channel_id)
            .timeout(self.request_timeout)
            .json(message)
            .send()
            .await
            .map_err(|e| transport_err("side channel request failed", &e))?;

        let status = response.status();
        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_err("side channel body read failed", &e))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return if status.is_success() {
                Ok(None)
            } else {
                Err(ChannelError::transport(format!("side channel returned {status}")))
            };
        }

        // Error statuses may still carry a JSON-RPC error reply (e.g. -32700).
        match serde_json::from_slice::<JsonRpcMessage>(&body) {
            Ok(reply) => Ok(Some(reply)),
            Err(e) if status.is_success() => Err(ChannelError::transport(format!("invalid reply body: {e}"))),
            Err(_) => Err(ChannelError::transport(format!("side channel returned {status}"))),
        }
    }

    async fn post_pong(&self, channel_id: &str) -> Result<(), ChannelError> {
        let response = self
            .http
            .post(self.url(PONG_PATH))
            .header(CHANNEL_ID_HEADER, channel_id)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| transport_err("pong request failed", &e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ChannelError::transport(format!("pong endpoint returned {status}")))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer) -> HttpTransport {
        HttpTransport::new(&format!("{}/", server.uri()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn connect_streams_frames() {
        let server = MockServer::start().await;
        let body = "data: {\"kind\":\"init\",\"channelId\":\"conn_1\",\"body\":{},\"emittedAt\":1}\n\n\
                    : comment\n\n\
                    data: {\"kind\":\"heartbeat-ping\",\"channelId\":\"conn_1\",\"body\":{},\"emittedAt\":2}\n\n";
        Mock::given(method("GET"))
            .and(path("/mcp/sse"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let frames: Vec<_> = transport(&server).connect().await.unwrap().collect().await;
        assert_eq!(frames.len(), 2);
        assert!(frames[0].as_ref().unwrap().contains("\"init\""));
        assert!(frames[1].as_ref().unwrap().contains("heartbeat-ping"));
    }

    #[tokio::test]
    async fn connect_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mcp/sse"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = transport(&server).connect().await;
        assert_matches!(result.err(), Some(ChannelError::Transport { reason }) if reason.contains("503"));
    }

    #[tokio::test]
    async fn post_message_returns_sync_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp/message"))
            .and(header("x-connection-id", "conn_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": {"tools": []}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let msg = JsonRpcMessage::request(1, "tools/list", None);
        let reply = transport(&server).post_message("conn_1", &msg).await.unwrap().unwrap();
        assert_eq!(reply.result, Some(json!({"tools": []})));
    }

    #[tokio::test]
    async fn post_message_accepted_has_no_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp/message"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let msg = JsonRpcMessage::notification("notifications/initialized", None);
        assert!(transport(&server).post_message("conn_1", &msg).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn post_message_keeps_error_reply_on_bad_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp/message"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "Parse error"}
            })))
            .mount(&server)
            .await;

        let msg = JsonRpcMessage::request(1, "ping", None);
        let reply = transport(&server).post_message("conn_1", &msg).await.unwrap().unwrap();
        assert_eq!(reply.error.unwrap().code, -32_700);
    }

    #[tokio::test]
    async fn post_message_server_error_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp/message"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let msg = JsonRpcMessage::request(1, "ping", None);
        let result = transport(&server).post_message("conn_1", &msg).await;
        assert_matches!(result, Err(ChannelError::Transport { reason }) if reason.contains("500"));
    }

    #[tokio::test]
    async fn pong_sends_channel_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp/pong"))
            .and(header("x-connection-id", "conn_7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        transport(&server).post_pong("conn_7").await.unwrap();
    }

    #[tokio::test]
    async fn pong_unknown_channel_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp/pong"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(transport(&server).post_pong("conn_x").await.is_err());
    }
}
