use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{info, warn};

use crate::model::ToolDefinition;
use crate::sandbox::SandboxContext;
use crate::tools::context::{ToolError, ToolInvocation, ToolResult};
use crate::tools::registry::ToolRegistry;

/// Single entry point for tool dispatch. Always yields exactly one
/// [`ToolResult`] per invocation.
pub struct ToolRouter {
  registry: Arc<ToolRegistry>,
}

impl ToolRouter {
  pub fn new(registry: Arc<ToolRegistry>) -> Self {
    Self { registry }
  }

  pub async fn dispatch(&self, invocation: ToolInvocation, ctx: &SandboxContext) -> ToolResult {
    let Some(handler) = self.registry.get_handler(&invocation.name) else {
      warn!(tool = %invocation.name, call_id = %invocation.call_id, "unknown tool");
      return ToolResult::failure(ToolError::validation(format!(
        "unknown tool: {}",
        invocation.name
      )));
    };

    if !invocation.arguments.is_object() {
      return ToolResult::failure(ToolError::validation(format!(
        "arguments for {} must be a JSON object",
        invocation.name
      )));
    }

    info!(
      tool = %invocation.name,
      call_id = %invocation.call_id,
      session_id = %ctx.session_id,
      mutating = handler.is_mutating(),
      "dispatching tool"
    );
    let started = Instant::now();

    let outcome = AssertUnwindSafe(handler.handle(&invocation, ctx))
      .catch_unwind()
      .await;

    let result = match outcome {
      Ok(result) => ToolResult::from(result),
      Err(_) => {
        warn!(tool = %invocation.name, call_id = %invocation.call_id, "tool panicked");
        ToolResult::failure(ToolError::unknown(format!(
          "tool {} failed unexpectedly",
          invocation.name
        )))
      }
    };

    info!(
      tool = %invocation.name,
      call_id = %invocation.call_id,
      success = !result.is_error(),
      error_kind = result.error_kind().map(|k| k.as_str()),
      elapsed_ms = started.elapsed().as_millis() as u64,
      "tool finished"
    );
    result
  }

  pub fn definitions(&self) -> Vec<ToolDefinition> {
    self.registry.model_tools()
  }
}
