// Atelier Core Library
//
// Streaming tool-call orchestration: the stream reducer folds model events
// into a conversation, tools run inside a path sandbox, and shell commands
// run under a bounded process lifetime.

pub mod conversation;
pub mod exec;
pub mod model;
pub mod sandbox;
pub mod session;
pub mod tools;
pub mod turn;

pub use conversation::{Conversation, ConversationError};
pub use sandbox::{PathPolicy, SandboxContext, SandboxError};
pub use session::Session;
pub use tools::build_default_tools;
pub use tools::context::{ErrorKind, ToolError, ToolInvocation, ToolResult};
pub use turn::{TurnConfig, TurnError, TurnExecutor};
