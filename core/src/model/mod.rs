//! Model layer.
//!
//! The endpoint is an opaque source of [`StreamEvent`]s. Providers adapt a
//! concrete transport to that stream and are looked up through an explicit
//! [`ProviderRegistry`] handed to the session; there is no global provider.

pub mod error;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod streaming;

use std::pin::Pin;

use atelier_protocol::{StreamEvent, Turn};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::{ModelError, Result};
pub use provider::ModelProvider;
pub use registry::ProviderRegistry;
pub use streaming::SseProcessor;

/// Tool description advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
  pub name: String,
  pub description: String,
  pub parameters: Value,
}

/// One model query: the pruned history plus the tools on offer.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
  pub model: String,
  pub system_prompt: Option<String>,
  pub messages: Vec<Turn>,
  pub tools: Vec<ToolDefinition>,
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;
