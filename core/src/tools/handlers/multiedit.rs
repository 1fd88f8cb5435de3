use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::edit::{EditOp, apply_edit, load_text};
use crate::sandbox::SandboxContext;
use crate::tools::context::{ToolError, ToolInvocation};
use crate::tools::registry::ToolHandler;

/// Sequential edits to one file; the file is written only if every edit applies.
pub struct MultiEditHandler;

#[derive(Debug, Deserialize)]
struct MultiEditArgs {
  path: String,
  edits: Vec<EditOp>,
}

#[async_trait]
impl ToolHandler for MultiEditHandler {
  fn is_mutating(&self) -> bool {
    true
  }

  async fn handle(
    &self,
    invocation: &ToolInvocation,
    ctx: &SandboxContext,
  ) -> Result<Value, ToolError> {
    let args: MultiEditArgs = invocation.parse_arguments()?;
    if args.edits.is_empty() {
      return Err(ToolError::validation("edits must contain at least one edit"));
    }

    let (path, rel, mut content) = load_text(ctx, &args.path).await?;
    let mut replacements = 0;
    for (idx, op) in args.edits.iter().enumerate() {
      let (updated, n) = apply_edit(&content, op).map_err(|err| {
        ToolError::new(err.kind, format!("edit {} of {}: {}", idx + 1, args.edits.len(), err.message))
          .with_details(json!({ "failedEdit": idx }))
      })?;
      content = updated;
      replacements += n;
    }

    tokio::fs::write(&path, content.as_bytes())
      .await
      .map_err(|e| ToolError::io("write", &rel, &e))?;

    Ok(json!({
      "path": rel,
      "editsApplied": args.edits.len(),
      "replacements": replacements,
    }))
  }
}
