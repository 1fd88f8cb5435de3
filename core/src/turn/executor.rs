//! Turn executor: drives model streams through the reducer and dispatches
//! the tool calls it produces.

use std::sync::Arc;

use atelier_cancel::Cancelled;
use atelier_config::ModelsConfig;
use atelier_protocol::{ErrorAction, SessionOutcome, UiEvent};
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::conversation::Conversation;
use crate::model::{ModelError, ModelProvider, ModelRequest};
use crate::sandbox::SandboxContext;
use crate::tools::context::ToolInvocation;
use crate::tools::router::ToolRouter;

use super::reducer::{ReducerEffect, ReducerState, StreamReducer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnConfig {
  pub model: String,
  pub system_prompt: Option<String>,
  /// Upper bound on model streams opened for one query.
  pub max_steps: usize,
}

impl TurnConfig {
  pub fn from_config(config: &ModelsConfig) -> Self {
    Self {
      model: config.model.clone(),
      system_prompt: config.system_prompt.clone(),
      max_steps: config.max_steps.max(1),
    }
  }
}

enum Flow {
  Continue,
  Stop(SessionOutcome),
}

pub struct TurnExecutor {
  provider: Arc<dyn ModelProvider>,
  router: Arc<ToolRouter>,
  tx_event: mpsc::Sender<UiEvent>,
  config: TurnConfig,
  snapshots: Option<Arc<watch::Sender<Conversation>>>,
}

impl TurnExecutor {
  pub fn new(
    provider: Arc<dyn ModelProvider>,
    router: Arc<ToolRouter>,
    tx_event: mpsc::Sender<UiEvent>,
    config: TurnConfig,
  ) -> Self {
    Self {
      provider,
      router,
      tx_event,
      config,
      snapshots: None,
    }
  }

  /// Publish the transcript after every applied event and tool result.
  pub fn with_snapshots(mut self, snapshots: Arc<watch::Sender<Conversation>>) -> Self {
    self.snapshots = Some(snapshots);
    self
  }

  /// Runs one query whose user turn is already in `conversation` at index
  /// `session_start - 1`. Every failure ends up in the returned outcome.
  pub async fn run(
    &self,
    conversation: &mut Conversation,
    ctx: &SandboxContext,
    session_start: usize,
  ) -> SessionOutcome {
    info!(session_id = %ctx.session_id, provider = self.provider.id(), model = %self.config.model, "query started");
    let mut reducer = StreamReducer::new(session_start);
    self
      .emit(UiEvent::ChatStreamStart {
        session_id: ctx.session_id.clone(),
      })
      .await;

    let outcome = self.drive(&mut reducer, conversation, ctx).await;
    self.publish(conversation);
    match &outcome {
      SessionOutcome::Finished => {
        self.emit(UiEvent::ChatStreamEnd).await;
        info!(session_id = %ctx.session_id, "query finished");
      }
      SessionOutcome::Errored { message } => {
        warn!(session_id = %ctx.session_id, message = %message, "query failed");
      }
      SessionOutcome::Aborted => info!(session_id = %ctx.session_id, "query aborted"),
    }
    outcome
  }

  async fn drive(
    &self,
    reducer: &mut StreamReducer,
    conversation: &mut Conversation,
    ctx: &SandboxContext,
  ) -> SessionOutcome {
    let cancel = &ctx.cancel;

    for step in 0..self.config.max_steps {
      if cancel.is_cancelled() {
        return self.abort(reducer).await;
      }
      reducer.begin_step();

      let request = ModelRequest {
        model: self.config.model.clone(),
        system_prompt: self.config.system_prompt.clone(),
        messages: conversation.history_for_model(),
        tools: self.router.definitions(),
      };
      debug!(step, turns = request.messages.len(), "opening model stream");

      let mut stream = match cancel.run_until_cancelled(self.provider.stream(request)).await {
        Err(Cancelled) => return self.abort(reducer).await,
        Ok(Err(err)) => return self.fail(reducer, conversation, err).await,
        Ok(Ok(stream)) => stream,
      };

      loop {
        let event = match cancel.run_until_cancelled(stream.next()).await {
          Err(Cancelled) => return self.abort(reducer).await,
          Ok(Some(Ok(event))) => event,
          Ok(Some(Err(err))) => return self.fail(reducer, conversation, err).await,
          Ok(None) => break,
        };

        let effects = reducer.apply(conversation, event);
        self.publish(conversation);
        if let Flow::Stop(outcome) = self.perform(reducer, conversation, ctx, effects).await {
          return outcome;
        }
        match reducer.state() {
          ReducerState::Finished => return SessionOutcome::Finished,
          ReducerState::Errored => {
            return SessionOutcome::Errored {
              message: last_error(conversation),
            };
          }
          _ => {}
        }
      }

      if reducer.results_this_step() == 0 {
        let message = "model stream ended without finishing".to_string();
        self.emit_all(reducer.fail(conversation, message.clone(), Vec::new())).await;
        return SessionOutcome::Errored { message };
      }
      debug!(step, results = reducer.results_this_step(), "continuing after tool results");
    }

    let message = format!("stopped after {} model steps", self.config.max_steps);
    self.emit_all(reducer.fail(conversation, message.clone(), Vec::new())).await;
    SessionOutcome::Errored { message }
  }

  async fn perform(
    &self,
    reducer: &mut StreamReducer,
    conversation: &mut Conversation,
    ctx: &SandboxContext,
    effects: Vec<ReducerEffect>,
  ) -> Flow {
    for effect in effects {
      match effect {
        ReducerEffect::Ui(event) => self.emit(event).await,
        ReducerEffect::Dispatch(request) => {
          let invocation = ToolInvocation::new(
            request.call_id.clone(),
            request.name.clone(),
            request.arguments.clone(),
          );
          // The tool sees the same token; the shell escalates on its own.
          let result = self.router.dispatch(invocation, ctx).await;
          if ctx.cancel.is_cancelled() {
            debug!(call_id = %request.call_id, "tool result discarded after cancellation");
            return Flow::Stop(self.abort(reducer).await);
          }
          let follow_up = reducer.apply_tool_result(conversation, &request, &result);
          self.publish(conversation);
          self.emit_all(follow_up).await;
        }
      }
    }
    Flow::Continue
  }

  async fn fail(
    &self,
    reducer: &mut StreamReducer,
    conversation: &mut Conversation,
    err: ModelError,
  ) -> SessionOutcome {
    let actions = if err.is_auth() {
      vec![ErrorAction::configure_credentials()]
    } else {
      Vec::new()
    };
    let message = err.to_string();
    self
      .emit_all(reducer.fail(conversation, message.clone(), actions))
      .await;
    SessionOutcome::Errored { message }
  }

  async fn abort(&self, reducer: &mut StreamReducer) -> SessionOutcome {
    self.emit_all(reducer.abort()).await;
    SessionOutcome::Aborted
  }

  fn publish(&self, conversation: &Conversation) {
    if let Some(snapshots) = &self.snapshots {
      snapshots.send_replace(conversation.clone());
    }
  }

  async fn emit_all(&self, effects: Vec<ReducerEffect>) {
    for effect in effects {
      if let ReducerEffect::Ui(event) = effect {
        self.emit(event).await;
      }
    }
  }

  async fn emit(&self, event: UiEvent) {
    if self.tx_event.send(event).await.is_err() {
      debug!("ui event receiver dropped");
    }
  }
}

fn last_error(conversation: &Conversation) -> String {
  conversation
    .turns()
    .iter()
    .rev()
    .find(|turn| turn.is_error)
    .map(|turn| turn.text())
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use atelier_cancel::CancelToken;
  use atelier_config::Config;
  use atelier_protocol::{StreamEvent, Turn};
  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;
  use crate::model::providers::{ScriptStep, ScriptedProvider};
  use crate::tools::build_default_tools;

  struct Harness {
    _tmp: tempfile::TempDir,
    ctx: SandboxContext,
    router: Arc<ToolRouter>,
  }

  fn harness() -> Harness {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = std::fs::canonicalize(tmp.path()).expect("canonicalize");
    let (_registry, router) = build_default_tools(&Config::default()).expect("tools");
    Harness {
      _tmp: tmp,
      ctx: SandboxContext::new(root, "session-1", CancelToken::new()),
      router,
    }
  }

  fn config(max_steps: usize) -> TurnConfig {
    TurnConfig {
      model: "test".to_string(),
      system_prompt: None,
      max_steps,
    }
  }

  async fn run(
    harness: &Harness,
    provider: Arc<ScriptedProvider>,
    max_steps: usize,
  ) -> (SessionOutcome, Conversation, Vec<UiEvent>) {
    let (tx, mut rx) = mpsc::channel(256);
    let executor = TurnExecutor::new(provider, harness.router.clone(), tx, config(max_steps));
    let mut conversation = Conversation::new();
    conversation.append(Turn::user("hello"));
    let outcome = executor.run(&mut conversation, &harness.ctx, 1).await;
    drop(executor);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
      events.push(event);
    }
    (outcome, conversation, events)
  }

  #[tokio::test]
  async fn text_only_query_finishes() {
    let harness = harness();
    let provider = Arc::new(ScriptedProvider::new(vec![vec![
      StreamEvent::StepStart,
      StreamEvent::TextDelta { delta: "Hi".to_string() },
      StreamEvent::Finish { reason: Some("stop".to_string()) },
    ]]));

    let (outcome, conversation, events) = run(&harness, provider, 4).await;
    assert_eq!(outcome, SessionOutcome::Finished);
    assert_eq!(conversation.len(), 2);
    assert_eq!(
      events.first(),
      Some(&UiEvent::ChatStreamStart {
        session_id: "session-1".to_string(),
      })
    );
    assert_eq!(events.last(), Some(&UiEvent::ChatStreamEnd));
  }

  #[tokio::test]
  async fn tool_results_open_a_continuation_stream() {
    let harness = harness();
    std::fs::write(harness.ctx.root.join("a.txt"), "a").expect("write");
    let provider = Arc::new(ScriptedProvider::new(vec![
      vec![StreamEvent::ToolCallComplete {
        id: "c1".to_string(),
        name: "ls".to_string(),
        arguments: json!({}),
      }],
      vec![
        StreamEvent::TextDelta { delta: "One file.".to_string() },
        StreamEvent::Finish { reason: None },
      ],
    ]));

    let (outcome, conversation, _events) = run(&harness, provider.clone(), 4).await;
    assert_eq!(outcome, SessionOutcome::Finished);
    assert_eq!(conversation.len(), 4);

    let requests = provider.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].messages.len(), 3);
    assert_eq!(requests[0].tools.len(), 9);
  }

  #[tokio::test]
  async fn auth_failure_offers_credentials_action() {
    let harness = harness();
    let provider = Arc::new(ScriptedProvider::from_steps(vec![ScriptStep::Unauthorized(
      "OPENAI_API_KEY is not set".to_string(),
    )]));

    let (outcome, conversation, events) = run(&harness, provider, 4).await;
    assert!(matches!(outcome, SessionOutcome::Errored { .. }));
    assert!(conversation.turns()[1].is_error);
    assert!(events.iter().any(|event| matches!(
      event,
      UiEvent::ChatErrorWithActions { actions, .. }
        if actions == &vec![ErrorAction::configure_credentials()]
    )));
  }

  #[tokio::test]
  async fn transport_failure_is_an_error_outcome() {
    let harness = harness();
    let provider = Arc::new(ScriptedProvider::from_steps(vec![ScriptStep::Disconnect(
      vec![StreamEvent::TextDelta { delta: "par".to_string() }],
      "connection reset".to_string(),
    )]));

    let (outcome, conversation, events) = run(&harness, provider, 4).await;
    assert_eq!(
      outcome,
      SessionOutcome::Errored {
        message: "Streaming error: connection reset".to_string(),
      }
    );
    assert_eq!(conversation.len(), 3);
    assert!(matches!(events.last(), Some(UiEvent::ChatError { .. })));
  }

  #[tokio::test]
  async fn stream_ending_without_finish_or_results_is_an_error() {
    let harness = harness();
    let provider = Arc::new(ScriptedProvider::new(vec![vec![StreamEvent::TextDelta {
      delta: "cut".to_string(),
    }]]));

    let (outcome, _conversation, _events) = run(&harness, provider, 4).await;
    assert!(matches!(outcome, SessionOutcome::Errored { .. }));
  }

  #[tokio::test]
  async fn step_limit_ends_a_looping_model() {
    let harness = harness();
    let step = || {
      vec![StreamEvent::ToolCallComplete {
        id: uuid::Uuid::new_v4().to_string(),
        name: "ls".to_string(),
        arguments: json!({}),
      }]
    };
    let provider = Arc::new(ScriptedProvider::new(vec![step(), step(), step()]));

    let (outcome, _conversation, _events) = run(&harness, provider.clone(), 2).await;
    assert_eq!(
      outcome,
      SessionOutcome::Errored {
        message: "stopped after 2 model steps".to_string(),
      }
    );
    assert_eq!(provider.remaining().await, 1);
  }

  #[tokio::test]
  async fn cancellation_between_events_aborts_without_error() {
    let harness = harness();
    let provider = Arc::new(
      ScriptedProvider::new(vec![vec![
        StreamEvent::TextDelta { delta: "a".to_string() },
        StreamEvent::TextDelta { delta: "b".to_string() },
        StreamEvent::Finish { reason: None },
      ]])
      .with_event_delay(Duration::from_millis(200)),
    );

    let cancel = harness.ctx.cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(300)).await;
      cancel.cancel();
    });

    let (outcome, conversation, events) = run(&harness, provider, 4).await;
    assert_eq!(outcome, SessionOutcome::Aborted);
    assert_eq!(conversation.turns()[1].text(), "a");
    assert!(conversation.turns().iter().all(|turn| !turn.is_error));
    assert_eq!(events.last(), Some(&UiEvent::ChatStopped));
  }
}
