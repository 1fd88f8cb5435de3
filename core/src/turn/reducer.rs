//! Stream reducer: folds model stream events into the conversation.
//!
//! The reducer is synchronous and owns no I/O. Each event mutates the
//! conversation and yields effects: notifications for the presentation layer
//! and tool dispatch requests. The executor performs the dispatch and feeds
//! the result back with [`StreamReducer::apply_tool_result`].

use std::collections::{HashMap, HashSet};

use atelier_protocol::{
  ContentPart, ErrorAction, MessageType, StreamEvent, Turn, TurnContent, UiEvent,
};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::conversation::Conversation;
use crate::tools::context::ToolResult;
use crate::turn::partial::PartialDecoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReducerState {
  Idle,
  Streaming,
  ToolPending,
  Finished,
  Errored,
  Aborted,
}

impl ReducerState {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Finished | Self::Errored | Self::Aborted)
  }
}

/// A completed tool call, ready to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
  pub call_id: String,
  pub name: String,
  pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReducerEffect {
  Ui(UiEvent),
  Dispatch(ToolCallRequest),
}

/// Arguments of a call that is still streaming.
#[derive(Debug)]
struct PendingToolCall {
  name: String,
  decoder: PartialDecoder,
}

#[derive(Debug)]
pub struct StreamReducer {
  state: ReducerState,
  /// First turn index belonging to this query.
  session_start: usize,
  pending: HashMap<String, PendingToolCall>,
  /// Dispatched calls still waiting for their result.
  in_flight: HashSet<String>,
  results_this_step: usize,
}

impl StreamReducer {
  /// A reducer for one query whose turns start at `session_start`.
  pub fn new(session_start: usize) -> Self {
    Self {
      state: ReducerState::Idle,
      session_start,
      pending: HashMap::new(),
      in_flight: HashSet::new(),
      results_this_step: 0,
    }
  }

  pub fn state(&self) -> ReducerState {
    self.state
  }

  /// Marks the start of one model stream.
  pub fn begin_step(&mut self) {
    if self.state.is_terminal() {
      return;
    }
    self.state = ReducerState::Streaming;
    self.results_this_step = 0;
    self.pending.clear();
  }

  /// Tool results appended since the current stream opened.
  pub fn results_this_step(&self) -> usize {
    self.results_this_step
  }

  pub fn apply(&mut self, conversation: &mut Conversation, event: StreamEvent) -> Vec<ReducerEffect> {
    if self.state.is_terminal() {
      debug!(event = event.kind(), state = ?self.state, "event after terminal state ignored");
      return Vec::new();
    }
    if self.state == ReducerState::Idle {
      self.state = ReducerState::Streaming;
    }

    match event {
      StreamEvent::TextDelta { delta } => self.on_text(conversation, delta),
      StreamEvent::ToolCallStart { id, name } => self.on_call_start(conversation, id, name),
      StreamEvent::ToolCallArgumentDelta { id, delta } => {
        self.on_argument_delta(conversation, id, &delta)
      }
      StreamEvent::ToolCallComplete {
        id,
        name,
        arguments,
      } => self.on_call_complete(conversation, id, name, arguments),
      StreamEvent::StepStart => {
        debug!("model step started");
        Vec::new()
      }
      StreamEvent::StepFinish { reason } => {
        debug!(reason = ?reason, "model step finished");
        Vec::new()
      }
      StreamEvent::Error { message } => self.fail(conversation, message, Vec::new()),
      StreamEvent::Finish { reason } => {
        debug!(reason = ?reason, "model stream finished");
        self.pending.clear();
        self.state = ReducerState::Finished;
        Vec::new()
      }
    }
  }

  fn on_text(&mut self, conversation: &mut Conversation, delta: String) -> Vec<ReducerEffect> {
    if delta.is_empty() {
      return Vec::new();
    }
    let extended = match conversation.trailing_assistant_mut() {
      Some(Turn {
        content: TurnContent::Text(text),
        ..
      }) => {
        text.push_str(&delta);
        true
      }
      _ => false,
    };
    let turn_index = if extended {
      conversation.len() - 1
    } else {
      conversation.append(Turn::assistant(TurnContent::Text(delta.clone())))
    };
    vec![ReducerEffect::Ui(UiEvent::ChatResponseChunk {
      message_type: MessageType::Text,
      content: delta,
      metadata: json!({ "turnIndex": turn_index }),
    })]
  }

  fn on_call_start(
    &mut self,
    conversation: &mut Conversation,
    id: String,
    name: String,
  ) -> Vec<ReducerEffect> {
    if self.pending.contains_key(&id) || self.call_in_session(conversation, &id) {
      warn!(call_id = %id, tool = %name, "duplicate tool-call-start ignored");
      return Vec::new();
    }
    conversation.push_assistant_part(ContentPart::ToolCall {
      id: id.clone(),
      name: name.clone(),
      arguments: Value::Object(Map::new()),
    });
    self.pending.insert(
      id.clone(),
      PendingToolCall {
        name: name.clone(),
        decoder: PartialDecoder::new(),
      },
    );
    self.state = ReducerState::ToolPending;
    vec![call_chunk(&id, &name)]
  }

  fn on_argument_delta(
    &mut self,
    conversation: &mut Conversation,
    id: String,
    delta: &str,
  ) -> Vec<ReducerEffect> {
    let Some(pending) = self.pending.get_mut(&id) else {
      warn!(call_id = %id, "argument delta for unknown tool call ignored");
      return Vec::new();
    };
    let Some(partial) = pending.decoder.push(delta) else {
      return Vec::new();
    };
    debug!(call_id = %id, tool = %pending.name, "partial arguments decoded");
    if let Some(arguments) = conversation.call_arguments_mut(&id) {
      *arguments = partial.clone();
    }
    vec![ReducerEffect::Ui(UiEvent::ChatToolUpdate {
      call_id: id,
      partial_arguments: partial,
    })]
  }

  fn on_call_complete(
    &mut self,
    conversation: &mut Conversation,
    id: String,
    name: String,
    arguments: Value,
  ) -> Vec<ReducerEffect> {
    let started = self.pending.remove(&id).is_some();
    if self.in_flight.contains(&id) || self.result_in_session(conversation, &id) {
      warn!(call_id = %id, tool = %name, "tool call already completed; ignored");
      return Vec::new();
    }

    let mut effects = Vec::new();
    if started || self.call_in_session(conversation, &id) {
      if let Some(slot) = conversation.call_arguments_mut(&id) {
        *slot = arguments.clone();
      }
    } else {
      // Completion without a start: record the call now.
      conversation.push_assistant_part(ContentPart::ToolCall {
        id: id.clone(),
        name: name.clone(),
        arguments: arguments.clone(),
      });
      effects.push(call_chunk(&id, &name));
    }

    self.in_flight.insert(id.clone());
    self.state = ReducerState::ToolPending;
    effects.push(ReducerEffect::Dispatch(ToolCallRequest {
      call_id: id,
      name,
      arguments,
    }));
    effects
  }

  /// Folds a tool's result in as a new `tool` turn. Ignored once the query
  /// has ended, so an aborted call stays pending.
  pub fn apply_tool_result(
    &mut self,
    conversation: &mut Conversation,
    request: &ToolCallRequest,
    result: &ToolResult,
  ) -> Vec<ReducerEffect> {
    if self.state.is_terminal() {
      debug!(call_id = %request.call_id, state = ?self.state, "tool result after terminal state dropped");
      return Vec::new();
    }
    if !self.in_flight.remove(&request.call_id) {
      warn!(call_id = %request.call_id, "result for a call that was not dispatched ignored");
      return Vec::new();
    }

    let content = result.to_value();
    conversation.append(Turn::tool_result(
      request.call_id.clone(),
      request.name.clone(),
      content.clone(),
      result.is_error(),
    ));
    self.results_this_step += 1;
    if self.pending.is_empty() && self.in_flight.is_empty() {
      self.state = ReducerState::Streaming;
    }
    vec![ReducerEffect::Ui(UiEvent::ChatToolResult {
      call_id: request.call_id.clone(),
      content,
      is_error: result.is_error(),
    })]
  }

  /// Session-level failure: appends an error turn and ends the query.
  pub fn fail(
    &mut self,
    conversation: &mut Conversation,
    message: String,
    actions: Vec<ErrorAction>,
  ) -> Vec<ReducerEffect> {
    if self.state.is_terminal() {
      return Vec::new();
    }
    warn!(message = %message, "model stream failed");
    conversation.append(Turn::assistant_error(message.clone()));
    self.pending.clear();
    self.in_flight.clear();
    self.state = ReducerState::Errored;
    let event = if actions.is_empty() {
      UiEvent::ChatError { message }
    } else {
      UiEvent::ChatErrorWithActions { message, actions }
    };
    vec![ReducerEffect::Ui(event)]
  }

  /// Cancellation. Dispatched calls keep no result and stay pending.
  pub fn abort(&mut self) -> Vec<ReducerEffect> {
    if self.state.is_terminal() {
      return Vec::new();
    }
    self.pending.clear();
    self.in_flight.clear();
    self.state = ReducerState::Aborted;
    vec![ReducerEffect::Ui(UiEvent::ChatStopped)]
  }

  fn session_turns<'c>(&self, conversation: &'c Conversation) -> &'c [Turn] {
    conversation
      .turns()
      .get(self.session_start..)
      .unwrap_or_default()
  }

  fn call_in_session(&self, conversation: &Conversation, call_id: &str) -> bool {
    self
      .session_turns(conversation)
      .iter()
      .any(|turn| turn.tool_call_ids().any(|id| id == call_id))
  }

  fn result_in_session(&self, conversation: &Conversation, call_id: &str) -> bool {
    self
      .session_turns(conversation)
      .iter()
      .flat_map(Turn::parts)
      .any(|part| part.result_call_id() == Some(call_id))
  }
}

fn call_chunk(id: &str, name: &str) -> ReducerEffect {
  ReducerEffect::Ui(UiEvent::ChatResponseChunk {
    message_type: MessageType::ToolCall,
    content: name.to_string(),
    metadata: json!({ "callId": id, "toolName": name }),
  })
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use proptest::prelude::*;
  use serde_json::json;

  use super::*;
  use crate::tools::context::ToolError;

  fn start(id: &str, name: &str) -> StreamEvent {
    StreamEvent::ToolCallStart {
      id: id.to_string(),
      name: name.to_string(),
    }
  }

  fn delta(id: &str, fragment: &str) -> StreamEvent {
    StreamEvent::ToolCallArgumentDelta {
      id: id.to_string(),
      delta: fragment.to_string(),
    }
  }

  fn complete(id: &str, name: &str, arguments: Value) -> StreamEvent {
    StreamEvent::ToolCallComplete {
      id: id.to_string(),
      name: name.to_string(),
      arguments,
    }
  }

  fn text(fragment: &str) -> StreamEvent {
    StreamEvent::TextDelta {
      delta: fragment.to_string(),
    }
  }

  fn dispatches(effects: &[ReducerEffect]) -> Vec<ToolCallRequest> {
    effects
      .iter()
      .filter_map(|effect| match effect {
        ReducerEffect::Dispatch(request) => Some(request.clone()),
        ReducerEffect::Ui(_) => None,
      })
      .collect()
  }

  fn setup() -> (Conversation, StreamReducer) {
    let mut conversation = Conversation::new();
    conversation.append(Turn::user("list files"));
    let reducer = StreamReducer::new(conversation.len());
    (conversation, reducer)
  }

  #[test]
  fn text_deltas_grow_one_assistant_turn() {
    let (mut conversation, mut reducer) = setup();
    reducer.apply(&mut conversation, text("Hel"));
    let effects = reducer.apply(&mut conversation, text("lo"));
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation.turns()[1].text(), "Hello");
    assert_eq!(
      effects,
      vec![ReducerEffect::Ui(UiEvent::ChatResponseChunk {
        message_type: MessageType::Text,
        content: "lo".to_string(),
        metadata: json!({ "turnIndex": 1 }),
      })]
    );
  }

  #[test]
  fn full_tool_round_produces_call_then_result() {
    let (mut conversation, mut reducer) = setup();
    reducer.begin_step();
    reducer.apply(&mut conversation, start("c1", "ls"));
    assert_eq!(reducer.state(), ReducerState::ToolPending);
    let updates = reducer.apply(&mut conversation, delta("c1", "{\"path\":\"."));
    assert_eq!(
      updates,
      vec![ReducerEffect::Ui(UiEvent::ChatToolUpdate {
        call_id: "c1".to_string(),
        partial_arguments: json!({ "path": "." }),
      })]
    );
    let effects = reducer.apply(&mut conversation, complete("c1", "ls", json!({ "path": "." })));
    let requests = dispatches(&effects);
    assert_eq!(requests.len(), 1);

    let result = ToolResult::success(json!({ "entries": ["a.txt"] }));
    let effects = reducer.apply_tool_result(&mut conversation, &requests[0], &result);
    assert!(matches!(
      &effects[..],
      [ReducerEffect::Ui(UiEvent::ChatToolResult { is_error: false, .. })]
    ));
    reducer.apply(&mut conversation, StreamEvent::Finish { reason: None });

    assert_eq!(reducer.state(), ReducerState::Finished);
    assert_eq!(conversation.len(), 3);
    assert!(conversation.find_result("c1").is_some());
    assert!(conversation.pending_calls().is_empty());
    assert_eq!(reducer.results_this_step(), 1);
  }

  #[test]
  fn complete_without_start_records_the_call_once() {
    let (mut conversation, mut reducer) = setup();
    let effects = reducer.apply(&mut conversation, complete("c9", "read", json!({ "path": "a" })));
    assert_eq!(effects.len(), 2);
    assert_eq!(conversation.turns()[1].tool_call_ids().collect::<Vec<_>>(), vec!["c9"]);

    let again = reducer.apply(&mut conversation, complete("c9", "read", json!({ "path": "a" })));
    assert!(again.is_empty());
    assert_eq!(conversation.turns()[1].tool_call_ids().count(), 1);
  }

  #[test]
  fn duplicate_start_does_not_duplicate_the_part() {
    let (mut conversation, mut reducer) = setup();
    reducer.apply(&mut conversation, start("c1", "ls"));
    assert!(reducer.apply(&mut conversation, start("c1", "ls")).is_empty());
    let effects = reducer.apply(&mut conversation, complete("c1", "ls", json!({})));
    assert_eq!(dispatches(&effects).len(), 1);
    assert_eq!(effects.len(), 1);
    assert_eq!(conversation.turns()[1].tool_call_ids().count(), 1);
  }

  #[test]
  fn delta_for_unknown_call_is_ignored() {
    let (mut conversation, mut reducer) = setup();
    assert!(reducer.apply(&mut conversation, delta("ghost", "{}")).is_empty());
    assert_eq!(conversation.len(), 1);
  }

  #[test]
  fn error_event_appends_error_turn_and_stops() {
    let (mut conversation, mut reducer) = setup();
    reducer.apply(&mut conversation, text("partial"));
    let effects = reducer.apply(
      &mut conversation,
      StreamEvent::Error {
        message: "rate limited".to_string(),
      },
    );
    assert_eq!(
      effects,
      vec![ReducerEffect::Ui(UiEvent::ChatError {
        message: "rate limited".to_string(),
      })]
    );
    assert_eq!(reducer.state(), ReducerState::Errored);
    assert!(conversation.turns()[2].is_error);
    assert!(reducer.apply(&mut conversation, text("late")).is_empty());
    assert_eq!(conversation.len(), 3);
  }

  #[test]
  fn abort_leaves_dispatched_calls_pending() {
    let (mut conversation, mut reducer) = setup();
    let effects = reducer.apply(&mut conversation, complete("c1", "bash", json!({ "command": "sleep 9" })));
    let request = dispatches(&effects).remove(0);

    assert_eq!(reducer.abort(), vec![ReducerEffect::Ui(UiEvent::ChatStopped)]);
    let late = ToolResult::failure(ToolError::execution("command was cancelled"));
    assert!(reducer.apply_tool_result(&mut conversation, &request, &late).is_empty());

    assert_eq!(reducer.state(), ReducerState::Aborted);
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation.pending_calls(), vec!["c1".to_string()]);
  }

  #[test]
  fn text_after_a_tool_call_opens_a_new_turn() {
    let (mut conversation, mut reducer) = setup();
    reducer.apply(&mut conversation, text("Checking."));
    reducer.apply(&mut conversation, start("c1", "ls"));
    reducer.apply(&mut conversation, text("More."));
    assert_eq!(conversation.len(), 3);
    assert_eq!(conversation.turns()[1].tool_call_ids().count(), 1);
    assert_eq!(conversation.turns()[2].text(), "More.");
  }

  fn chunked(source: &str, sizes: &[usize]) -> Vec<String> {
    let chars: Vec<char> = source.chars().collect();
    let mut out = Vec::new();
    let mut at = 0;
    let mut sizes = sizes.iter().cycle();
    while at < chars.len() {
      let size = sizes.next().copied().unwrap_or(1).max(1);
      let end = (at + size).min(chars.len());
      out.push(chars[at..end].iter().collect());
      at = end;
    }
    out
  }

  proptest! {
    #[test]
    fn final_arguments_do_not_depend_on_chunking(
      path in "[a-zA-Z0-9 ./é\"\\\\]{0,24}",
      count in 0u32..5000,
      flag in any::<bool>(),
      sizes in proptest::collection::vec(1usize..7, 1..8),
    ) {
      let arguments = json!({ "path": path, "count": count, "recursive": flag, "tags": ["a", "b"] });
      let encoded = arguments.to_string();
      let (mut conversation, mut reducer) = setup();

      reducer.apply(&mut conversation, start("c1", "grep"));
      let mut last_partial = None;
      for fragment in chunked(&encoded, &sizes) {
        for effect in reducer.apply(&mut conversation, delta("c1", &fragment)) {
          if let ReducerEffect::Ui(UiEvent::ChatToolUpdate { partial_arguments, .. }) = effect {
            last_partial = Some(partial_arguments);
          }
        }
      }
      prop_assert_eq!(last_partial.as_ref(), Some(&arguments));

      let effects = reducer.apply(&mut conversation, complete("c1", "grep", arguments.clone()));
      prop_assert_eq!(dispatches(&effects)[0].arguments.clone(), arguments.clone());
      let stored = conversation.turns()[1].parts().iter().find_map(|part| match part {
        ContentPart::ToolCall { arguments, .. } => Some(arguments.clone()),
        _ => None,
      });
      prop_assert_eq!(stored, Some(arguments));
    }
  }
}
