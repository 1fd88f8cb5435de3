//! Turn execution
//!
//! One query: a user turn, one or more model streams folded into the
//! conversation by the [`StreamReducer`], and the tool calls they produce.

pub mod executor;
pub mod partial;
pub mod reducer;

pub use executor::{TurnConfig, TurnExecutor};
pub use partial::{PartialDecoder, decode_partial};
pub use reducer::{ReducerEffect, ReducerState, StreamReducer, ToolCallRequest};

use thiserror::Error;

use crate::conversation::ConversationError;
use crate::exec::ExecError;
use crate::model::ModelError;
use crate::sandbox::SandboxError;

#[derive(Debug, Error)]
pub enum TurnError {
  #[error("a query is already running in this session")]
  Busy,
  #[error(transparent)]
  Model(#[from] ModelError),
  #[error(transparent)]
  Tools(#[from] ExecError),
  #[error(transparent)]
  Sandbox(#[from] SandboxError),
  #[error(transparent)]
  Conversation(#[from] ConversationError),
}
