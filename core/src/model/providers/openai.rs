//! OpenAI-compatible chat completions provider.
//!
//! Works against any endpoint speaking the `/chat/completions` streaming
//! dialect. Tool-call fragments arrive keyed by index and are reassembled
//! into start / argument-delta / complete events.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use atelier_config::ModelsConfig;
use atelier_protocol::{ContentPart, Role, StreamEvent, Turn};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::super::error::{ModelError, Result};
use super::super::provider::ModelProvider;
use super::super::streaming::{SseFrame, SseProcessor};
use super::super::{EventStream, ModelRequest};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiCompatibleProvider {
  id: String,
  client: Client,
  base_url: String,
  api_key: Option<String>,
  api_key_env: String,
}

impl OpenAiCompatibleProvider {
  pub fn new(
    id: impl Into<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    api_key_env: impl Into<String>,
  ) -> Self {
    Self {
      id: id.into(),
      client: create_client(Duration::from_secs(300)),
      base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
      api_key: api_key.filter(|key| !key.is_empty()),
      api_key_env: api_key_env.into(),
    }
  }

  /// Reads the API key from the environment variable named in the config.
  pub fn from_config(config: &ModelsConfig) -> Self {
    let api_key = std::env::var(&config.api_key_env).ok();
    Self::new(
      config.provider.clone(),
      config.base_url.clone(),
      api_key,
      config.api_key_env.clone(),
    )
  }

  fn endpoint(&self, path: &str) -> String {
    format!("{}/{}", self.base_url.trim_end_matches('/'), path)
  }
}

fn create_client(timeout: Duration) -> Client {
  Client::builder()
    .timeout(timeout)
    .build()
    .unwrap_or_else(|_| Client::new())
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
  fn id(&self) -> &str {
    &self.id
  }

  async fn stream(&self, request: ModelRequest) -> Result<EventStream> {
    let Some(api_key) = self.api_key.as_deref() else {
      return Err(ModelError::Auth(format!(
        "{} is not set",
        self.api_key_env
      )));
    };

    let url = self.endpoint("chat/completions");
    let body = build_request_body(&request);
    debug!(url = %url, model = %request.model, turns = request.messages.len(), "opening model stream");

    let response = self
      .client
      .post(&url)
      .bearer_auth(api_key)
      .header("Content-Type", "application/json")
      .json(&body)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
          ModelError::Auth(format!("HTTP {status}: {body}"))
        }
        _ => ModelError::Api(format!("HTTP {status}: {body}")),
      });
    }

    Ok(Box::pin(async_stream::stream! {
      let mut bytes = response.bytes_stream();
      let mut processor = SseProcessor::new();
      let mut assembler = ChunkAssembler::default();

      while let Some(item) = bytes.next().await {
        let chunk = match item {
          Ok(chunk) => chunk,
          Err(err) => {
            yield Err(ModelError::Stream(err.to_string()));
            return;
          }
        };
        for frame in processor.push_bytes(&chunk) {
          for event in assembler.on_frame(frame) {
            yield event;
          }
        }
      }
      for frame in processor.finish() {
        for event in assembler.on_frame(frame) {
          yield event;
        }
      }
      for event in assembler.finish() {
        yield Ok(event);
      }
    }))
  }
}

/// Chat-completions request body for a query.
pub fn build_request_body(request: &ModelRequest) -> Value {
  let mut messages = Vec::new();
  if let Some(prompt) = request.system_prompt.as_deref().filter(|p| !p.is_empty()) {
    messages.push(json!({ "role": "system", "content": prompt }));
  }
  for turn in &request.messages {
    messages.extend(turn_to_messages(turn));
  }

  let mut body = json!({
    "model": request.model,
    "messages": messages,
    "stream": true,
  });
  if !request.tools.is_empty() {
    body["tools"] = request
      .tools
      .iter()
      .map(|tool| {
        json!({
          "type": "function",
          "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
          },
        })
      })
      .collect();
  }
  body
}

fn turn_to_messages(turn: &Turn) -> Vec<Value> {
  match turn.role {
    Role::User => vec![json!({ "role": "user", "content": turn.text() })],
    Role::Assistant => {
      let tool_calls: Vec<Value> = turn
        .parts()
        .iter()
        .filter_map(|part| match part {
          ContentPart::ToolCall {
            id,
            name,
            arguments,
          } => Some(json!({
            "id": id,
            "type": "function",
            "function": { "name": name, "arguments": arguments.to_string() },
          })),
          _ => None,
        })
        .collect();
      let text = turn.text();
      let mut message = json!({
        "role": "assistant",
        "content": if text.is_empty() { Value::Null } else { Value::String(text) },
      });
      if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
      }
      vec![message]
    }
    Role::Tool => turn
      .parts()
      .iter()
      .filter_map(|part| match part {
        ContentPart::ToolResult {
          call_id, result, ..
        } => Some(json!({
          "role": "tool",
          "tool_call_id": call_id,
          "content": result.to_string(),
        })),
        _ => None,
      })
      .collect(),
  }
}

#[derive(Debug)]
struct AssembledCall {
  id: String,
  name: String,
  arguments: String,
}

/// Reassembles index-keyed tool-call fragments into [`StreamEvent`]s.
#[derive(Debug, Default)]
struct ChunkAssembler {
  calls: BTreeMap<u64, AssembledCall>,
  finished: bool,
}

impl ChunkAssembler {
  fn on_frame(&mut self, frame: SseFrame) -> Vec<Result<StreamEvent>> {
    match frame {
      SseFrame::Done => self.finish().into_iter().map(Ok).collect(),
      SseFrame::Data(data) => match serde_json::from_str::<Value>(&data) {
        Ok(value) => self.on_chunk(&value).into_iter().map(Ok).collect(),
        Err(err) => vec![Err(ModelError::Stream(format!(
          "malformed chunk: {err}"
        )))],
      },
    }
  }

  fn on_chunk(&mut self, value: &Value) -> Vec<StreamEvent> {
    if self.finished {
      return Vec::new();
    }
    if let Some(error) = value.get("error") {
      self.finished = true;
      let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| error.to_string());
      return vec![StreamEvent::Error { message }];
    }

    let Some(choice) = value
      .get("choices")
      .and_then(Value::as_array)
      .and_then(|choices| choices.first())
    else {
      return Vec::new();
    };

    let mut events = Vec::new();
    let delta = choice.get("delta").unwrap_or(&Value::Null);
    if let Some(text) = delta.get("content").and_then(Value::as_str) {
      if !text.is_empty() {
        events.push(StreamEvent::TextDelta {
          delta: text.to_string(),
        });
      }
    }

    if let Some(fragments) = delta.get("tool_calls").and_then(Value::as_array) {
      for fragment in fragments {
        self.on_tool_fragment(fragment, &mut events);
      }
    }

    if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
      let had_calls = !self.calls.is_empty();
      events.extend(self.complete_calls());
      self.finished = true;
      // Tool calls end a step, not the response; the caller continues.
      if had_calls || reason == "tool_calls" {
        events.push(StreamEvent::StepFinish {
          reason: Some(reason.to_string()),
        });
      } else {
        events.push(StreamEvent::Finish {
          reason: Some(reason.to_string()),
        });
      }
    }
    events
  }

  fn on_tool_fragment(&mut self, fragment: &Value, events: &mut Vec<StreamEvent>) {
    let index = fragment.get("index").and_then(Value::as_u64).unwrap_or(0);
    let function = fragment.get("function").unwrap_or(&Value::Null);
    let arguments = function
      .get("arguments")
      .and_then(Value::as_str)
      .unwrap_or_default();

    let call = self.calls.entry(index).or_insert_with(|| {
      let id = fragment
        .get("id")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("call_{index}"));
      let name = function
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
      events.push(StreamEvent::ToolCallStart {
        id: id.clone(),
        name: name.clone(),
      });
      AssembledCall {
        id,
        name,
        arguments: String::new(),
      }
    });

    if !arguments.is_empty() {
      call.arguments.push_str(arguments);
      events.push(StreamEvent::ToolCallArgumentDelta {
        id: call.id.clone(),
        delta: arguments.to_string(),
      });
    }
  }

  fn complete_calls(&mut self) -> Vec<StreamEvent> {
    std::mem::take(&mut self.calls)
      .into_values()
      .map(|call| {
        let arguments = if call.arguments.trim().is_empty() {
          Value::Object(Map::new())
        } else {
          serde_json::from_str(&call.arguments).unwrap_or_else(|err| {
            warn!(call_id = %call.id, error = %err, "tool call arguments are not valid JSON");
            Value::String(call.arguments.clone())
          })
        };
        StreamEvent::ToolCallComplete {
          id: call.id,
          name: call.name,
          arguments,
        }
      })
      .collect()
  }

  /// End of the HTTP stream. Completes dangling calls; a response with
  /// neither calls nor a finish reason is closed with `finish`.
  fn finish(&mut self) -> Vec<StreamEvent> {
    if self.finished {
      return Vec::new();
    }
    self.finished = true;
    let events = self.complete_calls();
    if events.is_empty() {
      vec![StreamEvent::Finish { reason: None }]
    } else {
      events
    }
  }
}
