//! Scripted provider: replays fixed event scripts, one per stream opened.
//!
//! Used by tests and by `atelier replay`. The text format is JSON lines, one
//! [`StreamEvent`] per line; a blank line or a `---` line starts the next
//! step.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use atelier_protocol::StreamEvent;
use tokio::sync::Mutex;

use super::super::error::{ModelError, Result};
use super::super::provider::ModelProvider;
use super::super::{EventStream, ModelRequest};

/// What one stream opening produces.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
  /// Replay these events, then end the stream.
  Events(Vec<StreamEvent>),
  /// Replay these events, then fail the transport.
  Disconnect(Vec<StreamEvent>, String),
  /// Refuse to open the stream with an authentication failure.
  Unauthorized(String),
}

pub struct ScriptedProvider {
  id: String,
  steps: Mutex<VecDeque<ScriptStep>>,
  requests: Mutex<Vec<ModelRequest>>,
  event_delay: Option<Duration>,
}

impl ScriptedProvider {
  /// One event script per stream.
  pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
    Self::from_steps(scripts.into_iter().map(ScriptStep::Events).collect())
  }

  pub fn from_steps(steps: Vec<ScriptStep>) -> Self {
    Self {
      id: "scripted".to_string(),
      steps: Mutex::new(steps.into()),
      requests: Mutex::new(Vec::new()),
      event_delay: None,
    }
  }

  /// Parses the JSON-lines script format.
  pub fn from_script(text: &str) -> Result<Self> {
    Ok(Self::new(parse_script(text)?))
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    self.id = id.into();
    self
  }

  /// Pause before each event, to give cancellation a window in tests.
  pub fn with_event_delay(mut self, delay: Duration) -> Self {
    self.event_delay = Some(delay);
    self
  }

  /// Every request received so far, in order.
  pub async fn requests(&self) -> Vec<ModelRequest> {
    self.requests.lock().await.clone()
  }

  pub async fn remaining(&self) -> usize {
    self.steps.lock().await.len()
  }
}

/// Splits a script into steps of decoded events.
pub fn parse_script(text: &str) -> Result<Vec<Vec<StreamEvent>>> {
  let mut steps = Vec::new();
  let mut current = Vec::new();
  for (number, line) in text.lines().enumerate() {
    let line = line.trim();
    if line.is_empty() || line == "---" {
      if !current.is_empty() {
        steps.push(std::mem::take(&mut current));
      }
      continue;
    }
    let event: StreamEvent = serde_json::from_str(line).map_err(|err| {
      ModelError::Stream(format!("script line {}: {err}", number + 1))
    })?;
    current.push(event);
  }
  if !current.is_empty() {
    steps.push(current);
  }
  Ok(steps)
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
  fn id(&self) -> &str {
    &self.id
  }

  async fn stream(&self, request: ModelRequest) -> Result<EventStream> {
    self.requests.lock().await.push(request);
    let step = self
      .steps
      .lock()
      .await
      .pop_front()
      .ok_or_else(|| ModelError::ScriptExhausted(format!("{} has no steps left", self.id)))?;

    let (events, failure) = match step {
      ScriptStep::Unauthorized(message) => return Err(ModelError::Auth(message)),
      ScriptStep::Events(events) => (events, None),
      ScriptStep::Disconnect(events, message) => (events, Some(message)),
    };
    let delay = self.event_delay;

    Ok(Box::pin(async_stream::stream! {
      for event in events {
        if let Some(delay) = delay {
          tokio::time::sleep(delay).await;
        }
        yield Ok(event);
      }
      if let Some(message) = failure {
        yield Err(ModelError::Stream(message));
      }
    }))
  }
}
