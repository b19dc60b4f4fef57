//! Turn execution
//!
//! One turn: look up the current state's definition, ask the completion
//! client for a structured result, let the state's handler interpret it, then
//! commit the transition and context writes in one step. Nothing is written
//! to the conversation unless the whole turn succeeds.

use super::definition::{HandlerError, StateDefinition, StateRegistry, TurnView};
use super::state::{Conversation, ConversationState, TurnResult};
use crate::llm::{CompletionClient, CompletionRequest, Exchange, LlmError, StructuredResult};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

/// Fixed reply for any turn requested once the conversation has ended
pub const CLOSING_REPLY: &str =
    "Goodbye! If you need further assistance, feel free to reach out again.";

/// Reply to an explicit quit/exit command; also the notice streamed after END
pub const ENDED_NOTICE: &str = "Conversation ended. Thank you!";

pub const APOLOGY_REPLY: &str =
    "I'm sorry, there was an error processing your request. Please try again.";

pub const FATAL_REPLY: &str = "This conversation cannot continue. Please restart the assistant.";

const EXIT_COMMANDS: &[&str] = &["quit", "exit"];

/// Errors from a single turn
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Current state or transition target has no definition
    #[error("State {0} is not registered")]
    UnknownState(ConversationState),

    #[error("Handler for {from} chose {to}, which is not a declared transition")]
    UndeclaredTransition {
        from: ConversationState,
        to: ConversationState,
    },

    #[error("Completion service failed: {0}")]
    Service(#[from] LlmError),

    #[error("Handler for {state} failed: {message}")]
    Handler {
        state: ConversationState,
        message: String,
    },
}

impl EngineError {
    /// Fatal errors leave the conversation unable to continue
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::UnknownState(_))
    }

    /// Text shown to the user in place of a reply
    pub fn user_reply(&self) -> &'static str {
        match self {
            EngineError::UnknownState(_) => FATAL_REPLY,
            EngineError::UndeclaredTransition { .. }
            | EngineError::Service(_)
            | EngineError::Handler { .. } => APOLOGY_REPLY,
        }
    }
}

/// Runs turns against a frozen state registry.
///
/// Not shared between threads: the bridge moves it onto its worker.
pub struct Engine {
    registry: StateRegistry,
    client: Arc<dyn CompletionClient>,
}

impl Engine {
    pub fn new(registry: StateRegistry, client: Arc<dyn CompletionClient>) -> Self {
        Self { registry, client }
    }

    /// Fresh conversation in the registry's initial state
    pub fn start_conversation(&self) -> Conversation {
        Conversation::new(self.registry.initial())
    }

    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        user_input: &str,
    ) -> Result<TurnResult, EngineError> {
        let state = conversation.state();
        tracing::debug!(
            conversation_id = %conversation.id(),
            state = %state,
            input_len = user_input.len(),
            "Running turn"
        );

        if state.is_terminal() {
            return Ok(TurnResult {
                reply_text: CLOSING_REPLY.to_string(),
                next_state: state,
                did_transition: false,
            });
        }

        if is_exit_command(user_input) {
            tracing::info!(from = %state, to = %ConversationState::End, "Exit command");
            conversation.commit(
                ConversationState::End,
                Vec::new(),
                exchange(user_input, ENDED_NOTICE),
            );
            return Ok(TurnResult {
                reply_text: ENDED_NOTICE.to_string(),
                next_state: ConversationState::End,
                did_transition: true,
            });
        }

        let definition = self
            .registry
            .get(state)
            .ok_or(EngineError::UnknownState(state))?;

        let request = CompletionRequest {
            state,
            prompt: conversation.context().render(&definition.prompt_template),
            user_input: user_input.to_string(),
            schema: definition.response_schema.clone(),
            transitions: definition.transitions.clone(),
            history: conversation.history().cloned().collect(),
        };

        let response = self.client.complete(&request).await.map_err(|e| {
            tracing::warn!(state = %state, error = %e, "Completion failed, staying in state");
            EngineError::Service(e)
        })?;

        let proposed = self.accept_proposal(definition, &response);
        let view = TurnView {
            context: conversation.context(),
            response: &response,
            proposed,
            user_input,
        };

        let outcome = match catch_unwind(AssertUnwindSafe(|| (definition.handler)(&view))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(HandlerError::Ambiguous { clarification })) => {
                tracing::debug!(state = %state, "Ambiguous response, asking again");
                conversation.commit(state, Vec::new(), exchange(user_input, &clarification));
                return Ok(TurnResult {
                    reply_text: clarification,
                    next_state: state,
                    did_transition: false,
                });
            }
            Ok(Err(e)) => {
                tracing::error!(state = %state, error = %e, "Handler failed");
                return Err(EngineError::Handler {
                    state,
                    message: e.to_string(),
                });
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(state = %state, panic = %message, "Handler panicked");
                return Err(EngineError::Handler { state, message });
            }
        };

        let (reply_text, chosen, updates) = outcome.into_parts();
        let next_state = match chosen {
            Some(to) if !definition.declares(to) => {
                tracing::error!(from = %state, to = %to, "Undeclared transition");
                return Err(EngineError::UndeclaredTransition { from: state, to });
            }
            Some(to) if !self.registry.contains(to) => {
                tracing::error!(from = %state, to = %to, "Transition to unregistered state");
                return Err(EngineError::UnknownState(to));
            }
            Some(to) => to,
            None => state,
        };

        let did_transition = next_state != state;
        if did_transition {
            tracing::info!(from = %state, to = %next_state, "Transition");
        }

        conversation.commit(next_state, updates, exchange(user_input, &reply_text));

        Ok(TurnResult {
            reply_text,
            next_state,
            did_transition,
        })
    }

    /// Keep the service's proposal only if it names a declared, registered state
    fn accept_proposal(
        &self,
        definition: &StateDefinition,
        response: &StructuredResult,
    ) -> Option<ConversationState> {
        let raw = response.next_state.as_deref()?;
        match raw.parse::<ConversationState>() {
            Ok(target) if definition.declares(target) && self.registry.contains(target) => {
                Some(target)
            }
            Ok(target) => {
                tracing::warn!(
                    from = %definition.key,
                    proposed = %target,
                    "Discarding proposal for an undeclared transition"
                );
                None
            }
            Err(e) => {
                tracing::warn!(from = %definition.key, error = %e, "Discarding proposal");
                None
            }
        }
    }
}

fn is_exit_command(input: &str) -> bool {
    let input = input.trim();
    EXIT_COMMANDS
        .iter()
        .any(|command| command.eq_ignore_ascii_case(input))
}

fn exchange(user: &str, reply: &str) -> Exchange {
    Exchange {
        user: user.to_string(),
        reply: reply.to_string(),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
