use async_trait::async_trait;
use glob::MatchOptions;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::sandbox::SandboxContext;
use crate::tools::context::{ToolError, ToolInvocation};
use crate::tools::registry::ToolHandler;

pub struct GlobHandler {
  max_results: usize,
}

impl GlobHandler {
  pub fn new(max_results: usize) -> Self {
    Self { max_results }
  }
}

#[derive(Debug, Deserialize)]
struct GlobArgs {
  pattern: String,
  path: Option<String>,
}

#[async_trait]
impl ToolHandler for GlobHandler {
  async fn handle(
    &self,
    invocation: &ToolInvocation,
    ctx: &SandboxContext,
  ) -> Result<Value, ToolError> {
    let args: GlobArgs = invocation.parse_arguments()?;
    if args.pattern.split(['/', '\\']).any(|segment| segment == "..") {
      return Err(ToolError::security("glob patterns may not contain '..'"));
    }
    if args.pattern.starts_with('/') || args.pattern.starts_with('\\') {
      return Err(ToolError::validation("glob pattern must be relative to path"));
    }

    let base = ctx.resolve_for_tool(args.path.as_deref().unwrap_or("."))?;
    let base_rel = ctx.relative(&base);
    let meta = tokio::fs::metadata(&base)
      .await
      .map_err(|e| ToolError::io("search", &base_rel, &e))?;
    if !meta.is_dir() {
      return Err(ToolError::validation(format!("{base_rel} is not a directory")));
    }

    let full = format!(
      "{}/{}",
      glob::Pattern::escape(&base.to_string_lossy()),
      args.pattern
    );
    let options = MatchOptions {
      case_sensitive: true,
      require_literal_separator: true,
      require_literal_leading_dot: false,
    };
    let entries = glob::glob_with(&full, options)
      .map_err(|e| ToolError::validation(format!("invalid glob pattern: {e}")))?;

    let mut matches = Vec::new();
    for entry in entries.flatten() {
      if !entry.is_file() || !entry.starts_with(&ctx.root) || ctx.is_denied(&entry) {
        continue;
      }
      matches.push(ctx.relative(&entry));
    }
    matches.sort();
    let truncated = matches.len() > self.max_results;
    matches.truncate(self.max_results);

    Ok(json!({
      "matches": matches,
      "truncated": truncated,
    }))
  }
}
