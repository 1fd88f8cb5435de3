//! Model Provider trait
//!
//! This module defines the [ModelProvider] trait that every stream source implements.

use async_trait::async_trait;

use super::error::Result;
use super::{EventStream, ModelRequest};

/// Model Provider trait
///
/// A provider turns one [`ModelRequest`] into a stream of typed events. Opening
/// the stream may fail (credentials, transport); failures after that arrive as
/// `Err` items on the stream.
#[async_trait]
pub trait ModelProvider: Send + Sync {
  /// Returns the unique identifier for this provider
  fn id(&self) -> &str;

  /// Opens a streaming completion
  async fn stream(&self, request: ModelRequest) -> Result<EventStream>;
}
