//! One conversation and the single query allowed to run against it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use atelier_cancel::CancelToken;
use atelier_config::Config;
use atelier_protocol::{SessionOutcome, Turn, UiEvent};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::conversation::Conversation;
use crate::model::ProviderRegistry;
use crate::sandbox::{PathPolicy, SandboxContext};
use crate::tools::build_default_tools;
use crate::tools::router::ToolRouter;
use crate::turn::{TurnConfig, TurnError, TurnExecutor};

pub struct Session {
  id: String,
  started_at: DateTime<Utc>,
  root: PathBuf,
  policy: Arc<PathPolicy>,
  providers: Arc<ProviderRegistry>,
  router: Arc<ToolRouter>,
  config: TurnConfig,
  /// Latest transcript; the running query publishes into it as it goes.
  transcript: Arc<watch::Sender<Conversation>>,
  in_flight: AtomicBool,
}

/// Clears the in-flight flag however the query ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl Session {
  /// `root` must already be prepared (existing and canonical).
  pub fn new(
    root: PathBuf,
    providers: Arc<ProviderRegistry>,
    router: Arc<ToolRouter>,
    config: TurnConfig,
  ) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      started_at: Utc::now(),
      root,
      policy: Arc::new(PathPolicy::default()),
      providers,
      router,
      config,
      transcript: Arc::new(watch::channel(Conversation::new()).0),
      in_flight: AtomicBool::new(false),
    }
  }

  /// Session with the built-in tools and deny patterns from `config`.
  pub fn from_config(
    root: PathBuf,
    config: &Config,
    providers: Arc<ProviderRegistry>,
  ) -> Result<Self, TurnError> {
    let (_registry, router) = build_default_tools(config)?;
    let policy = PathPolicy::new(&config.sandbox.deny_patterns)?;
    Ok(
      Self::new(root, providers, router, TurnConfig::from_config(&config.models))
        .with_policy(Arc::new(policy)),
    )
  }

  pub fn with_policy(mut self, policy: Arc<PathPolicy>) -> Self {
    self.policy = policy;
    self
  }

  /// Continue an existing transcript.
  pub fn with_conversation(mut self, conversation: Conversation) -> Self {
    self.transcript = Arc::new(watch::channel(conversation).0);
    self
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn started_at(&self) -> DateTime<Utc> {
    self.started_at
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn is_busy(&self) -> bool {
    self.in_flight.load(Ordering::Acquire)
  }

  /// A sandbox context for this session under `cancel`.
  pub fn sandbox(&self, cancel: CancelToken) -> SandboxContext {
    SandboxContext::new(self.root.clone(), self.id.clone(), cancel).with_policy(self.policy.clone())
  }

  pub fn router(&self) -> Arc<ToolRouter> {
    self.router.clone()
  }

  /// Snapshot of the transcript. Never waits for a running query; while one
  /// runs this reflects every event applied so far.
  pub fn conversation(&self) -> Conversation {
    self.transcript.borrow().clone()
  }

  fn claim(&self) -> Result<InFlight<'_>, TurnError> {
    self
      .in_flight
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .map_err(|_| TurnError::Busy)?;
    Ok(InFlight(&self.in_flight))
  }

  /// Runs one query. A second call while one is running fails with
  /// [`TurnError::Busy`] instead of queueing.
  pub async fn submit(
    &self,
    prompt: impl Into<String>,
    cancel: CancelToken,
    tx_event: mpsc::Sender<UiEvent>,
  ) -> Result<SessionOutcome, TurnError> {
    let _guard = self.claim()?;

    let provider = self.providers.get_default().await?;
    let executor = TurnExecutor::new(provider, self.router.clone(), tx_event, self.config.clone())
      .with_snapshots(self.transcript.clone());
    let ctx = self.sandbox(cancel);

    let mut conversation = self.conversation();
    conversation.append(Turn::user(prompt));
    let session_start = conversation.len();
    self.transcript.send_replace(conversation.clone());
    info!(session_id = %self.id, turns = session_start, "user turn appended");

    Ok(executor.run(&mut conversation, &ctx, session_start).await)
  }

  /// Removes an error turn from the transcript.
  pub fn dismiss_error(&self, index: usize) -> Result<Turn, TurnError> {
    let _guard = self.claim()?;
    let mut conversation = self.conversation();
    let removed = conversation.dismiss_error(index)?;
    self.transcript.send_replace(conversation);
    Ok(removed)
  }
}
