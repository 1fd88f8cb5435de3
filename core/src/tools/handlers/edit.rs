use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::sandbox::SandboxContext;
use crate::tools::context::{ToolError, ToolInvocation};
use crate::tools::registry::ToolHandler;

pub struct EditHandler;

/// One exact-text replacement.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EditOp {
  pub old_string: String,
  pub new_string: String,
  #[serde(default)]
  pub replace_all: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditArgs {
  path: String,
  #[serde(flatten)]
  op: EditOp,
}

/// Apply `op` to `content`, returning the new text and the replacement count.
pub(crate) fn apply_edit(content: &str, op: &EditOp) -> Result<(String, usize), ToolError> {
  if op.old_string.is_empty() {
    return Err(ToolError::validation("oldString must not be empty"));
  }
  if op.old_string == op.new_string {
    return Err(ToolError::validation("oldString and newString are identical"));
  }

  let count = content.matches(op.old_string.as_str()).count();
  match count {
    0 => Err(ToolError::validation("oldString was not found in the file")),
    n if n > 1 && !op.replace_all => Err(ToolError::validation(format!(
      "oldString matches {n} times; add surrounding context or set replaceAll"
    ))),
    n if op.replace_all => Ok((content.replace(&op.old_string, &op.new_string), n)),
    _ => Ok((content.replacen(&op.old_string, &op.new_string, 1), 1)),
  }
}

/// Resolve and load an existing UTF-8 file for editing.
pub(crate) async fn load_text(
  ctx: &SandboxContext,
  raw_path: &str,
) -> Result<(PathBuf, String, String), ToolError> {
  let path = ctx.resolve_for_tool(raw_path)?;
  let rel = ctx.relative(&path);

  let meta = tokio::fs::metadata(&path)
    .await
    .map_err(|e| ToolError::io("edit", &rel, &e))?;
  if meta.is_dir() {
    return Err(ToolError::validation(format!("{rel} is a directory")));
  }

  let bytes = tokio::fs::read(&path)
    .await
    .map_err(|e| ToolError::io("read", &rel, &e))?;
  let content = String::from_utf8(bytes)
    .map_err(|_| ToolError::execution(format!("{rel} is not valid UTF-8 text")))?;
  Ok((path, rel, content))
}

#[async_trait]
impl ToolHandler for EditHandler {
  fn is_mutating(&self) -> bool {
    true
  }

  async fn handle(
    &self,
    invocation: &ToolInvocation,
    ctx: &SandboxContext,
  ) -> Result<Value, ToolError> {
    let args: EditArgs = invocation.parse_arguments()?;
    let (path, rel, content) = load_text(ctx, &args.path).await?;

    let (updated, replacements) = apply_edit(&content, &args.op)?;
    tokio::fs::write(&path, updated.as_bytes())
      .await
      .map_err(|e| ToolError::io("write", &rel, &e))?;

    Ok(json!({
      "path": rel,
      "replacements": replacements,
    }))
  }
}
