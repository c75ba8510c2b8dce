//! Seam to whatever actually implements the tools.

use async_trait::async_trait;
use serde_json::Value;
use tether_core::mcp::{CallToolResult, Tool};

/// Source of tools for `tools/list` and `tools/call`.
///
/// The router neither knows nor cares what a tool does. An `Err` from
/// [`ToolInvoker::invoke`] is reported to the caller as
/// `-32603 Tool execution failed`; a tool that ran but wants to report a
/// failure to the model returns `Ok` with `is_error` set instead.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Tools currently available.
    async fn list_tools(&self) -> Vec<Tool>;

    /// Run tool `name` with `arguments` (an object, `{}` when omitted).
    async fn invoke(&self, name: &str, arguments: Value) -> anyhow::Result<CallToolResult>;
}

/// Invoker with no tools; every call fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTools;

#[async_trait]
impl ToolInvoker for NoTools {
    async fn list_tools(&self) -> Vec<Tool> {
        Vec::new()
    }

    async fn invoke(&self, name: &str, _arguments: Value) -> anyhow::Result<CallToolResult> {
        anyhow::bail!("unknown tool: {name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn no_tools_lists_nothing_and_rejects_calls() {
        assert!(NoTools.list_tools().await.is_empty());
        let err = NoTools.invoke("echo", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "unknown tool: echo");
    }
}
