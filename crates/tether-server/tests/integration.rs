//! End-to-end: a real `TetherServer` on a loopback port driven by the HTTP
//! `PushChannelClient`.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::{Value, json};
use tether_client::{ChannelState, ClientConfig, PushChannelClient};
use tether_core::errors::ChannelError;
use tether_core::jsonrpc::codes;
use tether_core::mcp::{CallToolResult, ContentBlock, Tool};
use tether_core::{CHANNEL_ID_HEADER, PONG_PATH};
use tether_server::{ServerConfig, TetherServer, ToolInvoker};
use tether_settings::ResponseDelivery;

struct EchoTools;

#[async_trait]
impl ToolInvoker for EchoTools {
    async fn list_tools(&self) -> Vec<Tool> {
        vec![Tool {
            name: "echo".into(),
            description: Some("Echo the message back".into()),
            input_schema: json!({"type": "object", "properties": {"message": {"type": "string"}}}),
        }]
    }

    async fn invoke(&self, name: &str, arguments: Value) -> anyhow::Result<CallToolResult> {
        match name {
            "echo" => Ok(CallToolResult::text(arguments["message"].as_str().unwrap_or_default())),
            "fail" => anyhow::bail!("tool exploded"),
            _ => anyhow::bail!("unknown tool: {name}"),
        }
    }
}

async fn boot(delivery: ResponseDelivery) -> (TetherServer, String) {
    let config = ServerConfig {
        partition: "itest".into(),
        response_delivery: delivery,
        heartbeat_interval: Duration::from_millis(100),
        ..ServerConfig::default()
    };
    let server = TetherServer::with_tools(config, Arc::new(EchoTools));
    let (addr, _serve) = server.listen().await.unwrap();
    (server, format!("http://{addr}"))
}

async fn connect(base_url: &str) -> PushChannelClient {
    let config = ClientConfig {
        request_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    };
    let client = PushChannelClient::http(base_url, config).unwrap();
    client.open().await.unwrap();
    client
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn open_assigns_server_channel() {
    let (server, base) = boot(ResponseDelivery::Both).await;
    let client = connect(&base).await;

    assert_eq!(client.state(), ChannelState::Open);
    let channel_id = client.channel_id().unwrap();
    assert!(channel_id.starts_with("conn_"));
    assert!(server.router().sessions().get(&channel_id).is_some());
    assert_eq!(client.snapshot().partition.as_deref(), Some("itest"));

    client.close();
    assert!(server.shutdown(Some(Duration::from_secs(2))).await);
}

#[tokio::test]
async fn initialize_then_list_and_call_tools() {
    let (server, base) = boot(ResponseDelivery::Both).await;
    let client = connect(&base).await;

    let init = client.initialize().await.unwrap();
    assert_eq!(init.server_info.name, "tether");
    assert_eq!(init.capabilities["experimental"]["partition"], "itest");

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");

    let result = client
        .call_tool("echo", Some(json!({"message": "over the wire"})))
        .await
        .unwrap();
    assert_eq!(
        result.content,
        vec![ContentBlock::Text {
            text: "over the wire".into()
        }]
    );
    assert_eq!(client.pending_count(), 0);

    client.close();
    let _ = server.shutdown(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn errors_come_back_as_remote_failures() {
    let (server, base) = boot(ResponseDelivery::Both).await;
    let client = connect(&base).await;

    let err = client.request("no/such/method", None).await.unwrap_err();
    assert_matches!(err, ChannelError::Remote { code, .. } if code == codes::METHOD_NOT_FOUND);

    let err = client.call_tool("fail", None).await.unwrap_err();
    assert_matches!(
        err,
        ChannelError::Remote { code, data: Some(data), .. }
            if code == codes::INTERNAL_ERROR && data == json!("tool exploded")
    );

    // The channel survives request-level failures.
    assert_eq!(client.state(), ChannelState::Open);
    assert_eq!(client.request("ping", None).await.unwrap(), json!({}));

    client.close();
    let _ = server.shutdown(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn push_only_delivery_resolves_from_stream() {
    let (server, base) = boot(ResponseDelivery::Push).await;
    let client = connect(&base).await;

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools[0].name, "echo");

    let err = client.request("missing", None).await.unwrap_err();
    assert_matches!(err, ChannelError::Remote { code, .. } if code == codes::METHOD_NOT_FOUND);

    client.close();
    let _ = server.shutdown(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn sync_only_delivery_resolves_from_http_body() {
    let (server, base) = boot(ResponseDelivery::Sync).await;
    let client = connect(&base).await;

    assert_eq!(client.request("ping", None).await.unwrap(), json!({}));

    client.close();
    let _ = server.shutdown(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn operator_routes_see_the_channel() {
    let (server, base) = boot(ResponseDelivery::Both).await;
    let client = connect(&base).await;
    let channel_id = client.channel_id().unwrap();
    let http = reqwest::Client::new();

    let health: Value = http
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["connections"], 1);

    let listing: Value = http
        .get(format!("{base}/mcp/connections"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["connections"][0]["id"], channel_id.as_str());

    let pong = http
        .post(format!("{base}{PONG_PATH}"))
        .header(CHANNEL_ID_HEADER, &channel_id)
        .send()
        .await
        .unwrap();
    assert_eq!(pong.status(), reqwest::StatusCode::OK);

    let missing = http
        .post(format!("{base}{PONG_PATH}"))
        .header(CHANNEL_ID_HEADER, "conn_nope")
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    client.close();
    let _ = server.shutdown(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn client_close_releases_server_session() {
    let (server, base) = boot(ResponseDelivery::Both).await;
    let client = connect(&base).await;
    let channel_id = client.channel_id().unwrap();

    client.close();
    assert_eq!(client.state(), ChannelState::Disconnected);
    eventually(|| server.router().sessions().get(&channel_id).is_none()).await;

    let _ = server.shutdown(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn server_shutdown_ends_client_stream() {
    let (server, base) = boot(ResponseDelivery::Both).await;
    let client = connect(&base).await;
    let mut states = client.subscribe_state();

    assert!(server.shutdown(Some(Duration::from_secs(2))).await);

    let left_open = tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s != ChannelState::Open),
    )
    .await;
    assert!(left_open.is_ok());
    client.close();
}
