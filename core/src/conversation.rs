//! Append-only conversation log.
//!
//! Turn order is the only source of truth for display and for history sent
//! back to the model. Turns are appended, and the trailing assistant turn may
//! grow while it streams; the only removal is dismissing an error turn.

use atelier_protocol::{ContentPart, Role, Turn, TurnContent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversationError {
  #[error("no turn at index {0}")]
  OutOfRange(usize),
  #[error("turn {0} is not an error turn")]
  NotAnError(usize),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Conversation {
  turns: Vec<Turn>,
}

impl Conversation {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn turns(&self) -> &[Turn] {
    &self.turns
  }

  pub fn len(&self) -> usize {
    self.turns.len()
  }

  pub fn is_empty(&self) -> bool {
    self.turns.is_empty()
  }

  /// Appends a turn and returns its index.
  pub fn append(&mut self, turn: Turn) -> usize {
    self.turns.push(turn);
    self.turns.len() - 1
  }

  /// The last turn, when it is a regular assistant turn that can still grow.
  pub(crate) fn trailing_assistant_mut(&mut self) -> Option<&mut Turn> {
    self
      .turns
      .last_mut()
      .filter(|turn| turn.role == Role::Assistant && !turn.is_error)
  }

  /// Appends `part` to the trailing assistant turn, opening one if needed.
  pub(crate) fn push_assistant_part(&mut self, part: ContentPart) {
    match self.trailing_assistant_mut() {
      Some(turn) => {
        let content = std::mem::replace(&mut turn.content, TurnContent::Parts(Vec::new()));
        let mut parts = content.into_parts();
        parts.push(part);
        turn.content = TurnContent::Parts(parts);
      }
      None => {
        self.append(Turn::assistant(TurnContent::Parts(vec![part])));
      }
    }
  }

  fn call_position(&self, call_id: &str) -> Option<usize> {
    self
      .turns
      .iter()
      .position(|turn| turn.tool_call_ids().any(|id| id == call_id))
  }

  /// Arguments slot of the tool call with `call_id`.
  pub(crate) fn call_arguments_mut(&mut self, call_id: &str) -> Option<&mut Value> {
    self.turns.iter_mut().rev().find_map(|turn| match &mut turn.content {
      TurnContent::Parts(parts) => parts.iter_mut().find_map(|part| match part {
        ContentPart::ToolCall { id, arguments, .. } if id == call_id => Some(arguments),
        _ => None,
      }),
      TurnContent::Text(_) => None,
    })
  }

  /// The result for a call: the first `tool` turn after the call whose
  /// result carries the same id.
  pub fn find_result(&self, call_id: &str) -> Option<&ContentPart> {
    let start = self.call_position(call_id)?;
    self.turns[start + 1..]
      .iter()
      .filter(|turn| turn.role == Role::Tool)
      .flat_map(Turn::parts)
      .find(|part| part.result_call_id() == Some(call_id))
  }

  /// Ids of tool calls that have no result later in the conversation.
  pub fn pending_calls(&self) -> Vec<String> {
    self
      .turns
      .iter()
      .filter(|turn| turn.role == Role::Assistant)
      .flat_map(Turn::tool_call_ids)
      .filter(|id| self.find_result(id).is_none())
      .map(ToString::to_string)
      .collect()
  }

  /// Removes an error turn. Any other turn is permanent.
  pub fn dismiss_error(&mut self, index: usize) -> Result<Turn, ConversationError> {
    let turn = self
      .turns
      .get(index)
      .ok_or(ConversationError::OutOfRange(index))?;
    if !turn.is_error {
      return Err(ConversationError::NotAnError(index));
    }
    Ok(self.turns.remove(index))
  }

  /// History to send to the model. Error turns are left out and tool calls
  /// that never got a result are pruned, along with any assistant turn left
  /// empty by the pruning. The conversation itself is untouched.
  pub fn history_for_model(&self) -> Vec<Turn> {
    let pending = self.pending_calls();
    self
      .turns
      .iter()
      .filter(|turn| !turn.is_error)
      .filter_map(|turn| {
        if turn.role != Role::Assistant || pending.is_empty() {
          return Some(turn.clone());
        }
        let TurnContent::Parts(parts) = &turn.content else {
          return Some(turn.clone());
        };
        let kept: Vec<ContentPart> = parts
          .iter()
          .filter(|part| match part.tool_call_id() {
            Some(id) => !pending.iter().any(|p| p == id),
            None => true,
          })
          .cloned()
          .collect();
        if kept.is_empty() {
          None
        } else {
          Some(Turn::assistant(TurnContent::Parts(kept)))
        }
      })
      .collect()
  }
}
