use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Owner of a conversation turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  User,
  Assistant,
  Tool,
}

/// One typed fragment of a turn's content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
  Text {
    text: String,
  },
  ToolCall {
    id: String,
    name: String,
    arguments: Value,
  },
  #[serde(rename_all = "camelCase")]
  ToolResult {
    call_id: String,
    name: String,
    result: Value,
    is_error: bool,
  },
}

impl ContentPart {
  pub fn text(text: impl Into<String>) -> Self {
    Self::Text { text: text.into() }
  }

  pub fn tool_call_id(&self) -> Option<&str> {
    match self {
      Self::ToolCall { id, .. } => Some(id),
      _ => None,
    }
  }

  pub fn result_call_id(&self) -> Option<&str> {
    match self {
      Self::ToolResult { call_id, .. } => Some(call_id),
      _ => None,
    }
  }
}

/// A turn is either a single text string or an ordered list of parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TurnContent {
  Text(String),
  Parts(Vec<ContentPart>),
}

impl TurnContent {
  /// Returns the content as parts, turning plain text into a single text part.
  pub fn into_parts(self) -> Vec<ContentPart> {
    match self {
      Self::Text(text) if text.is_empty() => Vec::new(),
      Self::Text(text) => vec![ContentPart::Text { text }],
      Self::Parts(parts) => parts,
    }
  }

  pub fn parts(&self) -> &[ContentPart] {
    match self {
      Self::Text(_) => &[],
      Self::Parts(parts) => parts,
    }
  }

  pub fn is_empty(&self) -> bool {
    match self {
      Self::Text(text) => text.is_empty(),
      Self::Parts(parts) => parts.is_empty(),
    }
  }
}

/// One entry of the conversation, owned by a single role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
  pub role: Role,
  pub content: TurnContent,
  /// Session-level failure notice. Never re-sent to the model and the only
  /// kind of turn that may be removed from a conversation.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub is_error: bool,
}

impl Turn {
  pub fn user(text: impl Into<String>) -> Self {
    Self {
      role: Role::User,
      content: TurnContent::Text(text.into()),
      is_error: false,
    }
  }

  pub fn assistant(content: TurnContent) -> Self {
    Self {
      role: Role::Assistant,
      content,
      is_error: false,
    }
  }

  pub fn assistant_error(message: impl Into<String>) -> Self {
    Self {
      role: Role::Assistant,
      content: TurnContent::Text(message.into()),
      is_error: true,
    }
  }

  pub fn tool_result(
    call_id: impl Into<String>,
    name: impl Into<String>,
    result: Value,
    is_error: bool,
  ) -> Self {
    Self {
      role: Role::Tool,
      content: TurnContent::Parts(vec![ContentPart::ToolResult {
        call_id: call_id.into(),
        name: name.into(),
        result,
        is_error,
      }]),
      is_error: false,
    }
  }

  pub fn parts(&self) -> &[ContentPart] {
    self.content.parts()
  }

  /// Ids of every tool call carried by this turn, in order.
  pub fn tool_call_ids(&self) -> impl Iterator<Item = &str> {
    self.parts().iter().filter_map(ContentPart::tool_call_id)
  }

  /// Concatenated text of the turn, ignoring non-text parts.
  pub fn text(&self) -> String {
    match &self.content {
      TurnContent::Text(text) => text.clone(),
      TurnContent::Parts(parts) => parts
        .iter()
        .filter_map(|part| match part {
          ContentPart::Text { text } => Some(text.as_str()),
          _ => None,
        })
        .collect(),
    }
  }
}
