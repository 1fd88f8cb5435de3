use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Typed events delivered by a model stream.
///
/// Tool results never arrive on this stream; they originate from local
/// tool dispatch. Unknown `type` tags fail to decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
  /// Incremental assistant text.
  TextDelta { delta: String },
  /// A tool call has been opened; arguments follow as fragments.
  ToolCallStart { id: String, name: String },
  /// One fragment of a tool call's JSON arguments.
  ToolCallArgumentDelta { id: String, delta: String },
  /// Authoritative, fully decoded arguments for a tool call.
  ToolCallComplete {
    id: String,
    name: String,
    arguments: Value,
  },
  StepStart,
  StepFinish {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
  },
  /// Provider-side failure. Terminal.
  Error { message: String },
  /// Normal end of the response. Terminal.
  Finish {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
  },
}

impl StreamEvent {
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Error { .. } | Self::Finish { .. })
  }

  pub fn kind(&self) -> &'static str {
    match self {
      Self::TextDelta { .. } => "text-delta",
      Self::ToolCallStart { .. } => "tool-call-start",
      Self::ToolCallArgumentDelta { .. } => "tool-call-argument-delta",
      Self::ToolCallComplete { .. } => "tool-call-complete",
      Self::StepStart => "step-start",
      Self::StepFinish { .. } => "step-finish",
      Self::Error { .. } => "error",
      Self::Finish { .. } => "finish",
    }
  }
}
