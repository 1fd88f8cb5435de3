use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::sandbox::SandboxContext;
use crate::tools::context::{ToolError, ToolInvocation};
use crate::tools::registry::ToolHandler;

pub struct WriteFileHandler;

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
  path: String,
  content: String,
}

#[async_trait]
impl ToolHandler for WriteFileHandler {
  fn is_mutating(&self) -> bool {
    true
  }

  async fn handle(
    &self,
    invocation: &ToolInvocation,
    ctx: &SandboxContext,
  ) -> Result<Value, ToolError> {
    let args: WriteFileArgs = invocation.parse_arguments()?;
    let path = ctx.resolve_for_tool(&args.path)?;
    let rel = ctx.relative(&path);

    let created = match tokio::fs::metadata(&path).await {
      Ok(meta) if meta.is_dir() => {
        return Err(ToolError::validation(format!("{rel} is a directory")));
      }
      Ok(_) => false,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
      Err(e) => return Err(ToolError::io("inspect", &rel, &e)),
    };

    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| ToolError::io("create parent directories for", &rel, &e))?;
    }
    tokio::fs::write(&path, args.content.as_bytes())
      .await
      .map_err(|e| ToolError::io("write", &rel, &e))?;

    Ok(json!({
      "path": rel,
      "bytesWritten": args.content.len(),
      "created": created,
    }))
  }
}
