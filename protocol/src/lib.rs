// Atelier Protocol Layer
// Data shapes exchanged between the model stream, the orchestrator and the UI

pub mod conversation;
pub mod stream;
pub mod ui;

pub use conversation::{ContentPart, Role, Turn, TurnContent};
pub use stream::StreamEvent;
pub use ui::{ErrorAction, MessageType, SessionOutcome, UiEvent};
