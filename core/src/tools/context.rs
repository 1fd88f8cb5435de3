use std::io;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::sandbox::SandboxError;

/// Invocation payload passed to a tool handler.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
  pub call_id: String,
  pub name: String,
  pub arguments: Value,
}

impl ToolInvocation {
  pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
    Self {
      call_id: call_id.into(),
      name: name.into(),
      arguments,
    }
  }

  pub fn parse_arguments<T: DeserializeOwned>(&self) -> Result<T, ToolError> {
    T::deserialize(&self.arguments).map_err(|e| {
      ToolError::validation(format!("invalid arguments for {}: {e}", self.name))
    })
  }
}

/// Failure taxonomy shared by every tool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  /// Malformed input.
  Validation,
  /// Sandbox escape or denylisted command.
  Security,
  FileNotFound,
  Permission,
  /// The operation ran and failed, including timeouts and non-zero exits.
  Execution,
  Unknown,
}

impl ErrorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Validation => "validation",
      Self::Security => "security",
      Self::FileNotFound => "file_not_found",
      Self::Permission => "permission",
      Self::Execution => "execution",
      Self::Unknown => "unknown",
    }
  }
}

/// Tool invocation failure, converted into a [`ToolResult`] at the router.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
  pub kind: ErrorKind,
  pub message: String,
  pub details: Option<Value>,
}

impl ToolError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
      details: None,
    }
  }

  pub fn validation(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Validation, message)
  }

  pub fn security(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Security, message)
  }

  pub fn not_found(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::FileNotFound, message)
  }

  pub fn execution(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Execution, message)
  }

  pub fn unknown(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Unknown, message)
  }

  pub fn with_details(mut self, details: Value) -> Self {
    self.details = Some(details);
    self
  }

  /// Map an I/O failure on `target` to the matching kind.
  pub fn io(action: &str, target: &str, err: &io::Error) -> Self {
    let kind = match err.kind() {
      io::ErrorKind::NotFound => ErrorKind::FileNotFound,
      io::ErrorKind::PermissionDenied => ErrorKind::Permission,
      _ => ErrorKind::Execution,
    };
    Self::new(kind, format!("failed to {action} {target}: {err}"))
  }
}

impl From<SandboxError> for ToolError {
  fn from(err: SandboxError) -> Self {
    if err.is_validation() {
      Self::validation(err.to_string())
    } else {
      Self::security(err.to_string())
    }
  }
}

/// Uniform tool response envelope.
///
/// Serializes as `{"success": true, ...payload}` or
/// `{"success": false, "error", "errorKind", "details"?}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
  Success(Map<String, Value>),
  Failure(ToolError),
}

impl ToolResult {
  /// Non-object payloads are wrapped under `value`.
  pub fn success(payload: Value) -> Self {
    match payload {
      Value::Object(mut fields) => {
        fields.remove("success");
        Self::Success(fields)
      }
      other => {
        let mut fields = Map::new();
        fields.insert("value".to_string(), other);
        Self::Success(fields)
      }
    }
  }

  pub fn failure(error: ToolError) -> Self {
    Self::Failure(error)
  }

  pub fn is_error(&self) -> bool {
    matches!(self, Self::Failure(_))
  }

  pub fn error_kind(&self) -> Option<ErrorKind> {
    match self {
      Self::Success(_) => None,
      Self::Failure(err) => Some(err.kind),
    }
  }

  pub fn to_value(&self) -> Value {
    match self {
      Self::Success(fields) => {
        let mut out = Map::with_capacity(fields.len() + 1);
        out.insert("success".to_string(), Value::Bool(true));
        out.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Value::Object(out)
      }
      Self::Failure(err) => {
        let mut out = json!({
          "success": false,
          "error": err.message,
          "errorKind": err.kind,
        });
        if let (Some(details), Some(fields)) = (&err.details, out.as_object_mut()) {
          fields.insert("details".to_string(), details.clone());
        }
        out
      }
    }
  }
}

impl From<Result<Value, ToolError>> for ToolResult {
  fn from(result: Result<Value, ToolError>) -> Self {
    match result {
      Ok(payload) => Self::success(payload),
      Err(err) => Self::failure(err),
    }
  }
}

impl Serialize for ToolResult {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.to_value().serialize(serializer)
  }
}
