//! Provider Registry
//!
//! Explicit registry of model providers, created by the host and passed by
//! reference into each session.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::ModelProvider;
use super::error::{ModelError, Result};

pub struct ProviderRegistry {
  providers: RwLock<HashMap<String, Arc<dyn ModelProvider>>>,
  default_provider: RwLock<Option<String>>,
}

impl Default for ProviderRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl ProviderRegistry {
  pub fn new() -> Self {
    Self {
      providers: RwLock::new(HashMap::new()),
      default_provider: RwLock::new(None),
    }
  }

  /// Register a provider under its own id, replacing any previous one.
  pub async fn register(&self, provider: Arc<dyn ModelProvider>) {
    let provider_id = provider.id().to_string();
    self.providers.write().await.insert(provider_id, provider);
  }

  pub async fn get(&self, provider_id: &str) -> Option<Arc<dyn ModelProvider>> {
    self.providers.read().await.get(provider_id).cloned()
  }

  /// The provider selected with [`Self::set_default`], or the only one
  /// registered.
  pub async fn get_default(&self) -> Result<Arc<dyn ModelProvider>> {
    let default_id = self.default_provider.read().await.clone();

    if let Some(id) = default_id {
      return self
        .get(&id)
        .await
        .ok_or(ModelError::ProviderNotFound(id));
    }

    let providers = self.providers.read().await;
    if providers.len() == 1 {
      if let Some(provider) = providers.values().next() {
        return Ok(provider.clone());
      }
    }
    Err(ModelError::NoDefaultProvider)
  }

  pub async fn set_default(&self, provider_id: &str) -> Result<()> {
    if !self.providers.read().await.contains_key(provider_id) {
      return Err(ModelError::ProviderNotFound(provider_id.to_string()));
    }

    *self.default_provider.write().await = Some(provider_id.to_string());
    Ok(())
  }

  /// Registered provider ids, sorted.
  pub async fn list_providers(&self) -> Vec<String> {
    let mut ids: Vec<String> = self.providers.read().await.keys().cloned().collect();
    ids.sort();
    ids
  }
}
