use std::path::{Path, PathBuf};

use async_trait::async_trait;
use globset::{GlobBuilder, GlobMatcher};
use ignore::WalkBuilder;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::sandbox::SandboxContext;
use crate::tools::context::{ToolError, ToolInvocation};
use crate::tools::registry::ToolHandler;

const MAX_LINE_CHARS: usize = 400;

pub struct GrepFilesHandler {
  max_results: usize,
}

impl GrepFilesHandler {
  pub fn new(max_results: usize) -> Self {
    Self { max_results }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrepFilesArgs {
  pattern: String,
  path: Option<String>,
  include: Option<String>,
  #[serde(default)]
  case_insensitive: bool,
}

#[derive(Debug, Serialize)]
struct GrepMatch {
  file: String,
  line: usize,
  text: String,
}

#[async_trait]
impl ToolHandler for GrepFilesHandler {
  async fn handle(
    &self,
    invocation: &ToolInvocation,
    ctx: &SandboxContext,
  ) -> Result<Value, ToolError> {
    let args: GrepFilesArgs = invocation.parse_arguments()?;
    let regex = RegexBuilder::new(&args.pattern)
      .case_insensitive(args.case_insensitive)
      .build()
      .map_err(|e| ToolError::validation(format!("invalid regex: {e}")))?;
    let include = match &args.include {
      Some(pattern) => {
        if pattern.contains("..") {
          return Err(ToolError::security("include patterns may not contain '..'"));
        }
        let glob = GlobBuilder::new(pattern)
          .build()
          .map_err(|e| ToolError::validation(format!("invalid include pattern: {e}")))?;
        Some(glob.compile_matcher())
      }
      None => None,
    };

    let base = ctx.resolve_for_tool(args.path.as_deref().unwrap_or("."))?;
    let base_rel = ctx.relative(&base);
    tokio::fs::metadata(&base)
      .await
      .map_err(|e| ToolError::io("search", &base_rel, &e))?;

    let scan_ctx = ctx.clone();
    let max_results = self.max_results;
    let (matches, truncated) = tokio::task::spawn_blocking(move || {
      scan(&scan_ctx, &base, &regex, include.as_ref(), max_results)
    })
    .await
    .map_err(|e| ToolError::execution(format!("search task failed: {e}")))?;

    Ok(json!({
      "matches": matches,
      "truncated": truncated,
    }))
  }
}

fn scan(
  ctx: &SandboxContext,
  base: &Path,
  regex: &regex::Regex,
  include: Option<&GlobMatcher>,
  max_results: usize,
) -> (Vec<GrepMatch>, bool) {
  let mut files: Vec<PathBuf> = WalkBuilder::new(base)
    .hidden(false)
    .follow_links(false)
    .build()
    .flatten()
    .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
    .map(|entry| entry.into_path())
    .filter(|path| !ctx.is_denied(path))
    .filter(|path| match (include, path.file_name()) {
      (Some(matcher), Some(name)) => matcher.is_match(name),
      (Some(_), None) => false,
      (None, _) => true,
    })
    .collect();
  files.sort();

  let mut matches = Vec::new();
  for file in files {
    if ctx.cancel.is_cancelled() {
      break;
    }
    let Ok(content) = std::fs::read_to_string(&file) else {
      continue;
    };
    for (idx, line) in content.lines().enumerate() {
      if !regex.is_match(line) {
        continue;
      }
      if matches.len() == max_results {
        return (matches, true);
      }
      matches.push(GrepMatch {
        file: ctx.relative(&file),
        line: idx + 1,
        text: line.chars().take(MAX_LINE_CHARS).collect(),
      });
    }
  }
  (matches, false)
}
