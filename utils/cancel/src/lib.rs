// Utils - Cancel
// Cancellation coordinator shared by the reducer and in-flight tool invocations

use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Cancellation token created once per query.
///
/// Clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  inner: CancellationToken,
}

/// Returned by [`CancelToken::run_until_cancelled`] when the token fired first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("cancelled")
  }
}

impl std::error::Error for Cancelled {}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.inner.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.is_cancelled()
  }

  /// Resolves once the token is cancelled.
  pub async fn cancelled(&self) {
    self.inner.cancelled().await;
  }

  /// Drives `fut` unless the token fires first; cancellation wins ties.
  pub async fn run_until_cancelled<F>(&self, fut: F) -> Result<F::Output, Cancelled>
  where
    F: Future,
  {
    tokio::select! {
      biased;
      _ = self.inner.cancelled() => Err(Cancelled),
      out = fut => Ok(out),
    }
  }
}
