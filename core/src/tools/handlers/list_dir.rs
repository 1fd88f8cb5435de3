use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::sandbox::SandboxContext;
use crate::tools::context::{ToolError, ToolInvocation};
use crate::tools::registry::ToolHandler;

pub struct ListDirHandler;

#[derive(Debug, Deserialize)]
struct ListDirArgs {
  #[serde(default = "default_path")]
  path: String,
}

fn default_path() -> String {
  ".".to_string()
}

#[async_trait]
impl ToolHandler for ListDirHandler {
  async fn handle(
    &self,
    invocation: &ToolInvocation,
    ctx: &SandboxContext,
  ) -> Result<Value, ToolError> {
    let args: ListDirArgs = invocation.parse_arguments()?;
    let dir = ctx.resolve_for_tool(&args.path)?;
    let rel = ctx.relative(&dir);

    let meta = tokio::fs::metadata(&dir)
      .await
      .map_err(|e| ToolError::io("list", &rel, &e))?;
    if !meta.is_dir() {
      return Err(ToolError::validation(format!("{rel} is not a directory")));
    }

    let mut reader = tokio::fs::read_dir(&dir)
      .await
      .map_err(|e| ToolError::io("list", &rel, &e))?;
    let mut entries = Vec::new();
    while let Some(entry) = reader
      .next_entry()
      .await
      .map_err(|e| ToolError::io("list", &rel, &e))?
    {
      let path = entry.path();
      if ctx.is_denied(&path) {
        continue;
      }
      let name = entry.file_name().to_string_lossy().into_owned();
      let is_dir = entry
        .file_type()
        .await
        .map(|ft| ft.is_dir())
        .unwrap_or(false);
      entries.push(if is_dir { format!("{name}/") } else { name });
    }
    entries.sort();

    Ok(json!({
      "path": rel,
      "entries": entries,
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
    (tmp, SandboxContext::new(root, "test", CancelToken::new()))
  }

  #[tokio::test]
  async fn lists_sorted_entries_with_directory_suffix() {
    let (_tmp, ctx) = setup();
    fs::write(ctx.root.join("b.txt"), "").expect("write");
    fs::write(ctx.root.join("a.txt"), "").expect("write");
    fs::create_dir(ctx.root.join("assets")).expect("mkdir");
    fs::create_dir(ctx.root.join(".git")).expect("mkdir");

    let out = ListDirHandler
      .handle(&ToolInvocation::new("1", "ls", json!({})), &ctx)
      .await
      .expect("ls");
    assert_eq!(out["path"], json!("."));
    assert_eq!(out["entries"], json!(["a.txt", "assets/", "b.txt"]));
  }

  #[tokio::test]
  async fn listing_a_file_is_a_validation_error() {
    let (_tmp, ctx) = setup();
    fs::write(ctx.root.join("a.txt"), "").expect("write");
    let err = ListDirHandler
      .handle(&ToolInvocation::new("1", "ls", json!({ "path": "a.txt" })), &ctx)
      .await
      .expect_err("file");
    assert_eq!(err.kind, ErrorKind::Validation);
  }

  #[tokio::test]
  async fn listing_outside_the_root_is_a_security_error() {
    let (_tmp, ctx) = setup();
    let err = ListDirHandler
      .handle(&ToolInvocation::new("1", "ls", json!({ "path": "../" })), &ctx)
      .await
      .expect_err("escape");
    assert_eq!(err.kind, ErrorKind::Security);
  }
}
