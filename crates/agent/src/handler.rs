//! Tool-call handling: decode the AI's `browser_action` request, run it and
//! always report an outcome back.

use async_trait::async_trait;
use aurademo_browser::ActionExecutor;
use aurademo_realtime::{RealtimeOutbound, ToolCall, ToolCallHandler, BROWSER_ACTION_TOOL};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Decoded `browser_action` arguments.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BrowserActionArgs {
    pub action: String,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub value: Option<String>,
}

pub struct BrowserToolHandler {
    executor: Arc<Mutex<ActionExecutor>>,
    outbound: Arc<dyn RealtimeOutbound>,
}

impl BrowserToolHandler {
    pub fn new(executor: Arc<Mutex<ActionExecutor>>, outbound: Arc<dyn RealtimeOutbound>) -> Self {
        Self { executor, outbound }
    }

    /// Outcome string for one call. Never fails.
    pub async fn handle(&self, call: &ToolCall) -> String {
        if call.name != BROWSER_ACTION_TOOL {
            warn!(tool = %call.name, "Unknown tool requested");
            return format!("Unknown tool: {}", call.name);
        }

        let args: BrowserActionArgs = match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!(call_id = %call.call_id, error = %e, "Bad tool arguments");
                return format!("Error processing arguments: {}", e);
            }
        };

        let executor = self.executor.lock().await;
        executor
            .perform_action(&args.action, &args.selector, args.value.as_deref())
            .await
    }
}

#[async_trait]
impl ToolCallHandler for BrowserToolHandler {
    async fn on_tool_call(&self, call: ToolCall) {
        let output = self.handle(&call).await;
        info!(call_id = %call.call_id, result = %output, "Tool call finished");
        if let Err(e) = self.outbound.send_tool_result(&call.call_id, &output).await {
            error!(call_id = %call.call_id, error = %e, "Failed to send tool result");
        }
    }
}
