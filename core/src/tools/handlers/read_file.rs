use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::sandbox::SandboxContext;
use crate::tools::context::{ToolError, ToolInvocation};
use crate::tools::registry::ToolHandler;

pub struct ReadFileHandler {
  max_bytes: u64,
}

impl ReadFileHandler {
  pub fn new(max_bytes: u64) -> Self {
    Self { max_bytes }
  }
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
  path: String,
  offset: Option<usize>,
  limit: Option<usize>,
}

#[async_trait]
impl ToolHandler for ReadFileHandler {
  async fn handle(
    &self,
    invocation: &ToolInvocation,
    ctx: &SandboxContext,
  ) -> Result<Value, ToolError> {
    let args: ReadFileArgs = invocation.parse_arguments()?;
    let path = ctx.resolve_for_tool(&args.path)?;
    let rel = ctx.relative(&path);

    let meta = tokio::fs::metadata(&path)
      .await
      .map_err(|e| ToolError::io("read", &rel, &e))?;
    if meta.is_dir() {
      return Err(ToolError::validation(format!("{rel} is a directory")));
    }
    if meta.len() > self.max_bytes {
      return Err(ToolError::validation(format!(
        "{rel} is {} bytes, larger than the {} byte read limit",
        meta.len(),
        self.max_bytes
      )));
    }

    let bytes = tokio::fs::read(&path)
      .await
      .map_err(|e| ToolError::io("read", &rel, &e))?;
    let content = String::from_utf8(bytes)
      .map_err(|_| ToolError::execution(format!("{rel} is not valid UTF-8 text")))?;

    let lines: Vec<&str> = content.lines().collect();
    let start = args.offset.unwrap_or(0).min(lines.len());
    let end = match args.limit {
      Some(limit) => start.saturating_add(limit).min(lines.len()),
      None => lines.len(),
    };
    let slice = lines[start..end].join("\n");

    Ok(json!({
      "path": rel,
      "content": slice,
      "totalLines": lines.len(),
      "startLine": start + 1,
      "endLine": end,
      "truncated": start > 0 || end < lines.len(),
    }))
  }
}

#[cfg(test)]
mod tests {
  use std::fs;

  use atelier_cancel::CancelToken;
  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;
  use crate::tools::context::ErrorKind;

  fn setup() -> (tempfile::TempDir, SandboxContext) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = fs::canonicalize(tmp.path()).expect("canonicalize");
    let ctx = SandboxContext::new(root, "test", CancelToken::new());
    (tmp, ctx)
  }

  fn invocation(args: Value) -> ToolInvocation {
    ToolInvocation::new("1", "read", args)
  }

  #[tokio::test]
  async fn reads_lines_with_offset_limit() {
    let (_tmp, ctx) = setup();
    fs::write(ctx.root.join("a.txt"), "a\nb\nc\nd\n").expect("write test file");

    let out = ReadFileHandler::new(1024)
      .handle(&invocation(json!({ "path": "a.txt", "offset": 1, "limit": 2 })), &ctx)
      .await
      .expect("read file");

    assert_eq!(out["content"], json!("b\nc"));
    assert_eq!(out["startLine"], json!(2));
    assert_eq!(out["endLine"], json!(3));
    assert_eq!(out["totalLines"], json!(4));
    assert_eq!(out["truncated"], json!(true));
  }

  #[tokio::test]
  async fn traversal_is_rejected_before_touching_disk() {
    let (_tmp, ctx) = setup();
    let err = ReadFileHandler::new(1024)
      .handle(&invocation(json!({ "path": "../../etc/passwd" })), &ctx)
      .await
      .expect_err("traversal");
    assert_eq!(err.kind, ErrorKind::Security);
  }

  #[tokio::test]
  async fn missing_file_is_file_not_found() {
    let (_tmp, ctx) = setup();
    let err = ReadFileHandler::new(1024)
      .handle(&invocation(json!({ "path": "nope.txt" })), &ctx)
      .await
      .expect_err("missing");
    assert_eq!(err.kind, ErrorKind::FileNotFound);
  }

  #[tokio::test]
  async fn directories_and_oversized_files_are_validation_errors() {
    let (_tmp, ctx) = setup();
    fs::create_dir(ctx.root.join("dir")).expect("mkdir");
    fs::write(ctx.root.join("big.txt"), "x".repeat(64)).expect("write");
    let handler = ReadFileHandler::new(16);

    let err = handler
      .handle(&invocation(json!({ "path": "dir" })), &ctx)
      .await
      .expect_err("dir");
    assert_eq!(err.kind, ErrorKind::Validation);

    let err = handler
      .handle(&invocation(json!({ "path": "big.txt" })), &ctx)
      .await
      .expect_err("too big");
    assert_eq!(err.kind, ErrorKind::Validation);
  }

  #[tokio::test]
  async fn denied_paths_are_security_errors() {
    let (_tmp, ctx) = setup();
    fs::write(ctx.root.join(".env"), "SECRET=1").expect("write");
    let err = ReadFileHandler::new(1024)
      .handle(&invocation(json!({ "path": ".env" })), &ctx)
      .await
      .expect_err("denied");
    assert_eq!(err.kind, ErrorKind::Security);
  }
}
