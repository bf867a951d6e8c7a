//! Conversation state machine and the engine task that drives it.

pub mod engine;
pub mod state;

pub use engine::{Engine, EngineCommand, EngineConfig, EngineHandle, EngineStatus};
pub use state::ConversationState;
