use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::exec::{ExecEngine, ExecError, ExecRequest, ExecState};
use crate::sandbox::SandboxContext;
use crate::tools::context::{ToolError, ToolInvocation};
use crate::tools::registry::ToolHandler;

pub struct ShellHandler {
  engine: Arc<ExecEngine>,
  default_timeout_ms: u64,
  max_timeout_ms: u64,
}

impl ShellHandler {
  pub fn new(engine: Arc<ExecEngine>, default_timeout_ms: u64, max_timeout_ms: u64) -> Self {
    Self {
      engine,
      default_timeout_ms,
      max_timeout_ms,
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShellArgs {
  command: String,
  directory: Option<String>,
  timeout_ms: Option<u64>,
  #[serde(default = "default_capture")]
  capture_output: bool,
  #[serde(default)]
  env: HashMap<String, String>,
}

fn default_capture() -> bool {
  true
}

#[async_trait]
impl ToolHandler for ShellHandler {
  fn is_mutating(&self) -> bool {
    true
  }

  async fn handle(
    &self,
    invocation: &ToolInvocation,
    ctx: &SandboxContext,
  ) -> Result<Value, ToolError> {
    let args: ShellArgs = invocation.parse_arguments()?;
    if args.command.trim().is_empty() {
      return Err(ToolError::validation("command must not be empty"));
    }
    self.engine.check(&args.command).map_err(exec_error)?;

    let cwd = ctx.resolve_for_tool(args.directory.as_deref().unwrap_or("."))?;
    let cwd_rel = ctx.relative(&cwd);
    let meta = tokio::fs::metadata(&cwd)
      .await
      .map_err(|e| ToolError::io("use working directory", &cwd_rel, &e))?;
    if !meta.is_dir() {
      return Err(ToolError::validation(format!("{cwd_rel} is not a directory")));
    }

    let timeout_ms = args
      .timeout_ms
      .unwrap_or(self.default_timeout_ms)
      .clamp(1, self.max_timeout_ms.max(1));

    let request = ExecRequest {
      command: args.command,
      cwd,
      timeout: Duration::from_millis(timeout_ms),
      capture_output: args.capture_output,
      env: args.env,
    };
    let result = self
      .engine
      .run(request, &ctx.cancel)
      .await
      .map_err(exec_error)?;

    match result.state {
      ExecState::TimedOut => Err(
        ToolError::execution(format!("command timed out after {timeout_ms}ms"))
          .with_details(json!(result)),
      ),
      ExecState::Killed => Err(
        ToolError::execution("command was cancelled").with_details(json!(result)),
      ),
      _ if result.exit_code != Some(0) => {
        let status = match (result.exit_code, result.signal) {
          (Some(code), _) => format!("exit code {code}"),
          (None, Some(signal)) => format!("signal {signal}"),
          (None, None) => "unknown status".to_string(),
        };
        Err(
          ToolError::execution(format!("command failed with {status}"))
            .with_details(json!(result)),
        )
      }
      _ => Ok(json!(result)),
    }
  }
}

fn exec_error(err: ExecError) -> ToolError {
  match err {
    ExecError::Denied { .. } => ToolError::security(err.to_string()),
    ExecError::InvalidDenylist(_) | ExecError::Spawn(_) | ExecError::Wait(_) => {
      ToolError::execution(err.to_string())
    }
  }
}

#[cfg(all(test, unix))]
mod tests {
  use std::fs;

  use atelier_cancel::CancelToken;
  use atelier_config::ShellConfig;
  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;
  use crate::tools::context::ErrorKind;

  fn setup() -> (tempfile::TempDir, SandboxContext, ShellHandler) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = fs::canonicalize(tmp.path()).expect("canonicalize");
    let engine = ExecEngine::from_config(&ShellConfig {
      grace_period_ms: 200,
      ..ShellConfig::default()
    })
    .expect("engine");
    let handler = ShellHandler::new(Arc::new(engine), 30_000, 600_000);
    (tmp, SandboxContext::new(root, "test", CancelToken::new()), handler)
  }

  fn bash(args: Value) -> ToolInvocation {
    ToolInvocation::new("1", "bash", args)
  }

  #[tokio::test]
  async fn runs_in_the_requested_directory() {
    let (_tmp, ctx, handler) = setup();
    fs::create_dir(ctx.root.join("site")).expect("mkdir");
    let out = handler
      .handle(&bash(json!({ "command": "pwd", "directory": "site" })), &ctx)
      .await
      .expect("bash");
    assert_eq!(
      out["stdout"],
      json!(format!("{}\n", ctx.root.join("site").display()))
    );
    assert_eq!(out["exitCode"], json!(0));
    assert_eq!(out["timedOut"], json!(false));
  }

  #[tokio::test]
  async fn destructive_command_is_a_security_error() {
    let (_tmp, ctx, handler) = setup();
    let err = handler
      .handle(&bash(json!({ "command": "rm -rf /" })), &ctx)
      .await
      .expect_err("denied");
    assert_eq!(err.kind, ErrorKind::Security);
  }

  #[tokio::test]
  async fn non_zero_exit_carries_stderr() {
    let (_tmp, ctx, handler) = setup();
    let err = handler
      .handle(&bash(json!({ "command": "echo nope >&2; exit 4" })), &ctx)
      .await
      .expect_err("failure");
    assert_eq!(err.kind, ErrorKind::Execution);
    let details = err.details.expect("details");
    assert_eq!(details["stderr"], json!("nope\n"));
    assert_eq!(details["exitCode"], json!(4));
    assert_eq!(details["timedOut"], json!(false));
  }

  #[tokio::test]
  async fn timeout_is_reported_as_its_own_execution_error() {
    let (_tmp, ctx, handler) = setup();
    let err = handler
      .handle(&bash(json!({ "command": "sleep 5", "timeoutMs": 100 })), &ctx)
      .await
      .expect_err("timeout");
    assert_eq!(err.kind, ErrorKind::Execution);
    assert!(err.message.contains("timed out"));
    assert_eq!(err.details.expect("details")["timedOut"], json!(true));
  }

  #[tokio::test]
  async fn working_directory_must_stay_inside_the_root() {
    let (_tmp, ctx, handler) = setup();
    let err = handler
      .handle(&bash(json!({ "command": "ls", "directory": "/" })), &ctx)
      .await
      .expect_err("outside");
    assert_eq!(err.kind, ErrorKind::Security);
  }
}
