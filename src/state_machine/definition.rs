//! State definitions and the dispatch table they are registered in

use super::state::{ContextUpdate, ConversationContext, ConversationState};
use crate::llm::{SchemaDescriptor, StructuredResult, TransitionOption};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Per-state turn logic.
///
/// Handlers are pure: they read the context and the structured response and
/// describe the reply, transition, and context writes. The engine applies the
/// outcome only once the whole turn has succeeded.
pub type TurnHandler = fn(&TurnView<'_>) -> Result<HandlerOutcome, HandlerError>;

/// Everything a handler may look at during a turn
#[derive(Debug, Clone, Copy)]
pub struct TurnView<'a> {
    pub context: &'a ConversationContext,
    pub response: &'a StructuredResult,
    /// Transition proposed by the service, already checked against the declared transitions
    pub proposed: Option<ConversationState>,
    pub user_input: &'a str,
}

impl TurnView<'_> {
    /// Required string field from the response payload
    pub fn field(&self, key: &'static str) -> Result<&str, HandlerError> {
        self.response
            .str_field(key)
            .ok_or(HandlerError::MissingField(key))
    }
}

/// What a handler decided
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutcome {
    reply: String,
    next_state: Option<ConversationState>,
    updates: Vec<ContextUpdate>,
}

impl HandlerOutcome {
    /// Reply without a transition ("ask again")
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            reply: text.into(),
            next_state: None,
            updates: Vec::new(),
        }
    }

    #[must_use]
    pub fn set_next_state(mut self, state: ConversationState) -> Self {
        self.next_state = Some(state);
        self
    }

    #[must_use]
    pub fn set_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.updates.push(ContextUpdate::Set {
            key: key.into(),
            value,
        });
        self
    }

    #[must_use]
    pub fn remove_context(mut self, key: impl Into<String>) -> Self {
        self.updates.push(ContextUpdate::Remove { key: key.into() });
        self
    }

    #[allow(dead_code)] // Used by tests
    pub fn reply_text(&self) -> &str {
        &self.reply
    }

    #[allow(dead_code)] // Used by tests
    pub fn next_state(&self) -> Option<ConversationState> {
        self.next_state
    }

    pub(crate) fn into_parts(self) -> (String, Option<ConversationState>, Vec<ContextUpdate>) {
        (self.reply, self.next_state, self.updates)
    }
}

/// Handler-level failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Response did not match the expected polarity or format; ask again
    #[error("Ambiguous response")]
    Ambiguous { clarification: String },
    #[error("Response is missing field `{0}`")]
    MissingField(&'static str),
    #[error("Invalid response: {0}")]
    Invalid(String),
}

/// Static description of one conversation state
#[derive(Clone)]
pub struct StateDefinition {
    pub key: ConversationState,
    pub prompt_template: String,
    pub response_schema: SchemaDescriptor,
    pub transitions: Vec<TransitionOption>,
    pub handler: TurnHandler,
}

impl fmt::Debug for StateDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateDefinition")
            .field("key", &self.key)
            .field("prompt_template", &self.prompt_template)
            .field("response_schema", &self.response_schema.name)
            .field("transitions", &self.transitions)
            .finish_non_exhaustive()
    }
}

impl StateDefinition {
    pub fn new(
        key: ConversationState,
        prompt_template: impl Into<String>,
        response_schema: SchemaDescriptor,
        handler: TurnHandler,
    ) -> Self {
        Self {
            key,
            prompt_template: prompt_template.into(),
            response_schema,
            transitions: Vec::new(),
            handler,
        }
    }

    #[must_use]
    pub fn with_transition(mut self, target: ConversationState, condition: &'static str) -> Self {
        self.transitions.push(TransitionOption { target, condition });
        self
    }

    pub fn declares(&self, target: ConversationState) -> bool {
        self.transitions.iter().any(|t| t.target == target)
    }
}

/// Errors raised while building a registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("State {0} is already registered")]
    Duplicate(ConversationState),
    #[error("Initial state {0} is not registered")]
    MissingInitial(ConversationState),
}

/// Dispatch table from state key to definition; frozen once built
#[derive(Debug, Clone)]
pub struct StateRegistry {
    initial: ConversationState,
    definitions: BTreeMap<ConversationState, StateDefinition>,
}

impl StateRegistry {
    /// Build a registry from definitions.
    ///
    /// Transitions to unregistered states are allowed here and fail when taken.
    pub fn new(
        initial: ConversationState,
        definitions: impl IntoIterator<Item = StateDefinition>,
    ) -> Result<Self, RegistryError> {
        let mut map = BTreeMap::new();
        for definition in definitions {
            let key = definition.key;
            if map.insert(key, definition).is_some() {
                return Err(RegistryError::Duplicate(key));
            }
        }

        if !map.contains_key(&initial) {
            return Err(RegistryError::MissingInitial(initial));
        }

        let registry = Self {
            initial,
            definitions: map,
        };
        for (from, to) in registry.dangling_transitions() {
            tracing::warn!(from = %from, to = %to, "Transition targets an unregistered state");
        }
        Ok(registry)
    }

    pub fn initial(&self) -> ConversationState {
        self.initial
    }

    pub fn get(&self, state: ConversationState) -> Option<&StateDefinition> {
        self.definitions.get(&state)
    }

    pub fn contains(&self, state: ConversationState) -> bool {
        self.definitions.contains_key(&state)
    }

    /// Declared transitions whose target has no definition
    pub fn dangling_transitions(&self) -> Vec<(ConversationState, ConversationState)> {
        self.definitions
            .values()
            .flat_map(|d| d.transitions.iter().map(move |t| (d.key, t.target)))
            .filter(|(_, to)| !self.contains(*to))
            .collect()
    }
}
