//! Conversation state machine
//!
//! States are registered once in a [`definition::StateRegistry`]; each turn is run by the
//! [`Engine`], which dispatches to the current state's pure handler and
//! commits the outcome atomically.

pub mod confirmation;
pub mod definition;
pub mod engine;
pub mod state;
pub mod support;

#[cfg(test)]
mod proptests;

pub use engine::{Engine, EngineError};
pub use state::{Conversation, ConversationState, TurnResult};
