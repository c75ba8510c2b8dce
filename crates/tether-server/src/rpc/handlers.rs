//! Default MCP method handlers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tether_core::MCP_PROTOCOL_VERSION;
use tether_core::mcp::{CallToolParams, Implementation, InitializeParams, InitializeResult, ListToolsResult, methods};
use tracing::{debug, info};

use crate::rpc::errors::HandlerError;
use crate::rpc::router::{DispatchContext, MethodHandler, ServerDispatchRouter};
use crate::rpc::tools::ToolInvoker;

/// Capabilities object shared by `initialize`, the `init` frame, and
/// `/capabilities`.
pub fn server_capabilities(partition: &str) -> Value {
    json!({
        "tools": {"listChanged": false},
        "experimental": {"sse": true, "partition": partition},
    })
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, HandlerError> {
    serde_json::to_value(value).map_err(|e| HandlerError::internal(format!("failed to encode result: {e}")))
}

/// `initialize`.
pub struct InitializeHandler {
    server_info: Implementation,
}

#[async_trait]
impl MethodHandler for InitializeHandler {
    async fn handle(&self, params: Option<Value>, ctx: &DispatchContext) -> Result<Value, HandlerError> {
        // Client info is informational; a missing or odd params object is accepted.
        if let Some(params) = params.and_then(|p| serde_json::from_value::<InitializeParams>(p).ok()) {
            info!(
                client = %params.client_info.name,
                client_version = %params.client_info.version,
                protocol = %params.protocol_version,
                channel_id = ctx.channel_id.as_deref(),
                "client initialized"
            );
        }
        to_value(&InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_owned(),
            capabilities: server_capabilities(&ctx.partition),
            server_info: self.server_info.clone(),
        })
    }
}

/// `notifications/initialized`.
pub struct InitializedHandler;

#[async_trait]
impl MethodHandler for InitializedHandler {
    async fn handle(&self, _params: Option<Value>, ctx: &DispatchContext) -> Result<Value, HandlerError> {
        debug!(channel_id = ctx.channel_id.as_deref(), "client finished initialization");
        Ok(Value::Null)
    }
}

/// `ping`.
pub struct PingHandler;

#[async_trait]
impl MethodHandler for PingHandler {
    async fn handle(&self, _params: Option<Value>, _ctx: &DispatchContext) -> Result<Value, HandlerError> {
        Ok(json!({}))
    }
}

/// `tools/list`.
pub struct ListToolsHandler {
    invoker: Arc<dyn ToolInvoker>,
}

#[async_trait]
impl MethodHandler for ListToolsHandler {
    async fn handle(&self, _params: Option<Value>, _ctx: &DispatchContext) -> Result<Value, HandlerError> {
        let tools = self.invoker.list_tools().await;
        to_value(&ListToolsResult { tools })
    }
}

/// `tools/call`.
pub struct CallToolHandler {
    invoker: Arc<dyn ToolInvoker>,
}

#[async_trait]
impl MethodHandler for CallToolHandler {
    async fn handle(&self, params: Option<Value>, ctx: &DispatchContext) -> Result<Value, HandlerError> {
        let params = params.ok_or_else(|| HandlerError::invalid_params("params required"))?;
        let CallToolParams { name, arguments } =
            serde_json::from_value(params).map_err(|e| HandlerError::invalid_params(e.to_string()))?;
        let arguments = arguments.unwrap_or_else(|| json!({}));

        debug!(tool = %name, channel_id = ctx.channel_id.as_deref(), "invoking tool");
        let result = self
            .invoker
            .invoke(&name, arguments)
            .await
            .map_err(|e| HandlerError::ToolExecution {
                message: format!("{e:#}"),
            })?;
        to_value(&result)
    }
}

/// Register `initialize`, `notifications/initialized`, `ping`, `tools/list`
/// and `tools/call`.
pub fn register_defaults(router: &mut ServerDispatchRouter, invoker: Arc<dyn ToolInvoker>, server_info: Implementation) {
    router.register(methods::INITIALIZE, InitializeHandler { server_info });
    router.register(methods::INITIALIZED, InitializedHandler);
    router.register(methods::PING, PingHandler);
    router.register(
        methods::TOOLS_LIST,
        ListToolsHandler {
            invoker: Arc::clone(&invoker),
        },
    );
    router.register(methods::TOOLS_CALL, CallToolHandler { invoker });
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tether_core::jsonrpc::{JsonRpcMessage, codes};
    use tether_core::mcp::{CallToolResult, Tool};

    struct UpperTools;

    #[async_trait]
    impl ToolInvoker for UpperTools {
        async fn list_tools(&self) -> Vec<Tool> {
            vec![Tool {
                name: "upper".into(),
                description: Some("Uppercase text".into()),
                input_schema: json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            }]
        }

        async fn invoke(&self, name: &str, arguments: Value) -> anyhow::Result<CallToolResult> {
            anyhow::ensure!(name == "upper", "unknown tool: {name}");
            let text = arguments["text"].as_str().unwrap_or_default();
            Ok(CallToolResult::text(text.to_uppercase()))
        }
    }

    fn router() -> ServerDispatchRouter {
        let mut router = ServerDispatchRouter::new(Duration::from_secs(5));
        register_defaults(&mut router, Arc::new(UpperTools), Implementation::new("tether", "9.9.9"));
        router
    }

    fn ctx() -> DispatchContext {
        DispatchContext {
            channel_id: Some("conn_1".into()),
            partition: "aws".into(),
        }
    }

    async fn call(method: &str, params: Option<Value>) -> JsonRpcMessage {
        router()
            .dispatch(JsonRpcMessage::request(1, method, params), &ctx())
            .await
            .unwrap()
    }

    #[test]
    fn registers_all_defaults() {
        assert_eq!(
            router().methods(),
            vec!["initialize", "notifications/initialized", "ping", "tools/call", "tools/list"]
        );
    }

    #[tokio::test]
    async fn initialize_reports_server() {
        let params = json!({"protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": {"name": "cli", "version": "1"}});
        let result = call("initialize", Some(params)).await.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["version"], "9.9.9");
        assert_eq!(result["capabilities"]["experimental"]["partition"], "aws");
    }

    #[tokio::test]
    async fn initialize_tolerates_missing_params() {
        let resp = call("initialize", None).await;
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn initialized_notification_has_no_reply() {
        let resp = router()
            .dispatch(JsonRpcMessage::notification("notifications/initialized", None), &ctx())
            .await;
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn ping_returns_empty_object() {
        assert_eq!(call("ping", None).await.result, Some(json!({})));
    }

    #[tokio::test]
    async fn tools_list_uses_invoker() {
        let result = call("tools/list", None).await.result.unwrap();
        assert_eq!(result["tools"][0]["name"], "upper");
        assert_eq!(result["tools"][0]["inputSchema"]["type"], "object");
    }

    #[tokio::test]
    async fn tools_call_runs_tool() {
        let result = call("tools/call", Some(json!({"name": "upper", "arguments": {"text": "hi"}})))
            .await
            .result
            .unwrap();
        assert_eq!(result, json!({"content": [{"type": "text", "text": "HI"}]}));
    }

    #[tokio::test]
    async fn tools_call_without_params_is_invalid() {
        let err = call("tools/call", None).await.error.unwrap();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn tools_call_with_bad_params_is_invalid() {
        let err = call("tools/call", Some(json!({"arguments": {}}))).await.error.unwrap();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn tool_failure_is_reported_with_text() {
        let err = call("tools/call", Some(json!({"name": "missing"}))).await.error.unwrap();
        assert_eq!(err.code, codes::INTERNAL_ERROR);
        assert_eq!(err.message, "Tool execution failed");
        assert_eq!(err.data, Some(json!("unknown tool: missing")));
    }
}
