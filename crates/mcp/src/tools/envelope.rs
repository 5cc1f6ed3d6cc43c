// Dispatch envelope: (tool name, raw arguments) → CallToolResult
//
// This is the only place tool failures turn into responses. Whatever happens
// below (unknown name, bad arguments, handler error or panic) the caller gets
// a well-formed result, never an error.

use crate::error::ToolError;
use crate::protocol::{CallToolResult, ContentItem, ToolSchema};
use crate::tools::registry::ToolRegistry;
use futures_util::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn list_tools(&self) -> Vec<ToolSchema> {
        self.registry.list_schemas()
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> CallToolResult {
        let outcome = AssertUnwindSafe(self.try_call(name, arguments))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ToolError::Panicked(panic_message(panic.as_ref()))));

        match outcome {
            Ok(content) => {
                debug!(tool = name, items = content.len(), "Tool call succeeded");
                CallToolResult::success(content)
            }
            Err(e) => {
                warn!(tool = name, error = %e, "Tool call failed");
                CallToolResult::error(e)
            }
        }
    }

    async fn try_call(&self, name: &str, arguments: Value) -> Result<Vec<ContentItem>, ToolError> {
        let spec = self
            .registry
            .spec(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let args = spec.decode(arguments)?;
        self.registry.dispatch(args).await
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
