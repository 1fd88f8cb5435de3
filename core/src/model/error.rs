//! Model layer error types

use thiserror::Error;

/// Failures opening or consuming a model stream.
#[derive(Error, Debug)]
pub enum ModelError {
  /// Credentials missing or rejected by the endpoint
  #[error("Authentication failed: {0}")]
  Auth(String),

  /// Provider API error
  #[error("Provider API error: {0}")]
  Api(String),

  /// Network error
  #[error("Network error: {0}")]
  Network(#[from] reqwest::Error),

  /// JSON parse error
  #[error("JSON parse error: {0}")]
  Json(#[from] serde_json::Error),

  /// Malformed stream payload
  #[error("Streaming error: {0}")]
  Stream(String),

  /// Provider not found
  #[error("Provider not found: {0}")]
  ProviderNotFound(String),

  /// No default provider configured
  #[error("No default provider configured")]
  NoDefaultProvider,

  /// A scripted provider ran out of scripts
  #[error("Script exhausted: {0}")]
  ScriptExhausted(String),
}

impl ModelError {
  pub fn is_auth(&self) -> bool {
    matches!(self, Self::Auth(_))
  }
}

/// Alias for Result<T, ModelError>
pub type Result<T> = std::result::Result<T, ModelError>;
