//! Built-in tools served by `tether serve`.

use async_trait::async_trait;
use serde_json::{Value, json};
use tether_core::mcp::{CallToolResult, Tool};
use tether_server::ToolInvoker;

/// `echo` and `now`.
pub struct BuiltinTools;

#[async_trait]
impl ToolInvoker for BuiltinTools {
    async fn list_tools(&self) -> Vec<Tool> {
        vec![
            Tool {
                name: "echo".into(),
                description: Some("Return the given message unchanged".into()),
                input_schema: json!({
                    "type": "object",
                    "properties": {"message": {"type": "string"}},
                    "required": ["message"],
                }),
            },
            Tool {
                name: "now".into(),
                description: Some("Current UTC time as RFC 3339".into()),
                input_schema: json!({"type": "object", "properties": {}}),
            },
        ]
    }

    async fn invoke(&self, name: &str, arguments: Value) -> anyhow::Result<CallToolResult> {
        match name {
            "echo" => {
                let Some(message) = arguments.get("message").and_then(Value::as_str) else {
                    anyhow::bail!("echo requires a string `message` argument");
                };
                Ok(CallToolResult::text(message))
            }
            "now" => Ok(CallToolResult::text(chrono::Utc::now().to_rfc3339())),
            _ => anyhow::bail!("unknown tool: {name}"),
        }
    }
}
