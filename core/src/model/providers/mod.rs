//! Model provider implementations

use std::sync::Arc;

use atelier_config::Config;

use super::error::Result;
use super::registry::ProviderRegistry;

pub mod openai;
pub mod scripted;

pub use openai::OpenAiCompatibleProvider;
pub use scripted::{ScriptStep, ScriptedProvider, parse_script};

/// Registers the configured endpoint and makes it the default.
///
/// A missing API key is not an error here: the provider reports it as an
/// authentication failure when a stream is opened, so the host can offer
/// remediation.
pub async fn register_configured_provider(
  registry: &ProviderRegistry,
  config: &Config,
) -> Result<()> {
  let provider = OpenAiCompatibleProvider::from_config(&config.models);
  let id = config.models.provider.clone();
  registry.register(Arc::new(provider)).await;
  registry.set_default(&id).await
}
