use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of content carried by a response chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
  Text,
  ToolCall,
}

/// Remediation offered alongside a session-level error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorAction {
  pub id: String,
  pub label: String,
}

impl ErrorAction {
  pub fn configure_credentials() -> Self {
    Self {
      id: "configure-credentials".to_string(),
      label: "Configure credentials".to_string(),
    }
  }
}

/// Notifications produced for the presentation layer while a query runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UiEvent {
  #[serde(rename_all = "camelCase")]
  ChatStreamStart { session_id: String },
  #[serde(rename_all = "camelCase")]
  ChatResponseChunk {
    message_type: MessageType,
    content: String,
    metadata: Value,
  },
  #[serde(rename_all = "camelCase")]
  ChatToolUpdate {
    call_id: String,
    partial_arguments: Value,
  },
  #[serde(rename_all = "camelCase")]
  ChatToolResult {
    call_id: String,
    content: Value,
    is_error: bool,
  },
  ChatStreamEnd,
  ChatStopped,
  ChatError { message: String },
  ChatErrorWithActions {
    message: String,
    actions: Vec<ErrorAction>,
  },
}

/// Terminal state of one query.
///
/// `Aborted` is deliberately not an error: callers render it as a stop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum SessionOutcome {
  Finished,
  Errored { message: String },
  Aborted,
}

impl SessionOutcome {
  pub fn is_aborted(&self) -> bool {
    matches!(self, Self::Aborted)
  }
}
