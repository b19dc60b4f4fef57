//! Conversation state types

use crate::llm::Exchange;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

/// Number of past exchanges sent along with each completion request
pub const HISTORY_LIMIT: usize = 20;

// ============================================================================
// Conversation State
// ============================================================================

/// Named conversation states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationState {
    /// Collecting the user's identity
    Start,
    /// Waiting for the user to confirm captured details
    Confirm,
    /// Identified user, handling requests
    Identified,
    /// Conversation over (terminal)
    End,
}

impl ConversationState {
    pub const ALL: [ConversationState; 4] = [
        ConversationState::Start,
        ConversationState::Confirm,
        ConversationState::Identified,
        ConversationState::End,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConversationState::Start => "START",
            ConversationState::Confirm => "CONFIRM",
            ConversationState::Identified => "IDENTIFIED",
            ConversationState::End => "END",
        }
    }

    /// No transitions are defined out of a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, ConversationState::End)
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised state key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown conversation state: {0}")]
pub struct ParseStateError(pub String);

impl FromStr for ConversationState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStateError(s.to_string()))
    }
}

// ============================================================================
// Conversation Context
// ============================================================================

/// A single write produced by a handler
#[derive(Debug, Clone, PartialEq)]
pub enum ContextUpdate {
    Set { key: String, value: Value },
    Remove { key: String },
}

/// Key/value store scoped to one conversation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    values: BTreeMap<String, Value>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn apply(&mut self, updates: Vec<ContextUpdate>) {
        for update in updates {
            match update {
                ContextUpdate::Set { key, value } => {
                    self.values.insert(key, value);
                }
                ContextUpdate::Remove { key } => {
                    self.values.remove(&key);
                }
            }
        }
    }

    /// Replace `{key}` placeholders with string values from the context.
    ///
    /// Single pass over the template: substituted values are never rescanned,
    /// and placeholders without a string value are left as written.
    pub fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find(|c| c == '{' || c == '}') else {
                out.push_str(&rest[open..]);
                return out;
            };
            if after[close..].starts_with('{') {
                // Unmatched brace; resume at the next one
                out.push('{');
                rest = after;
                continue;
            }

            let key = &after[..close];
            match self.get_str(key) {
                Some(value) => out.push_str(value),
                None => out.push_str(&rest[open..open + close + 2]),
            }
            rest = &after[close + 1..];
        }

        out.push_str(rest);
        out
    }
}

// ============================================================================
// Conversation
// ============================================================================

/// One conversation instance: current state, context, and transcript.
///
/// Mutated only by the engine at the end of a successful turn.
#[derive(Debug, Clone)]
pub struct Conversation {
    id: String,
    state: ConversationState,
    context: ConversationContext,
    history: VecDeque<Exchange>,
}

impl Conversation {
    pub fn new(initial: ConversationState) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: initial,
            context: ConversationContext::new(),
            history: VecDeque::with_capacity(HISTORY_LIMIT),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn history(&self) -> impl Iterator<Item = &Exchange> {
        self.history.iter()
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_terminal()
    }

    pub(crate) fn commit(
        &mut self,
        next_state: ConversationState,
        updates: Vec<ContextUpdate>,
        exchange: Exchange,
    ) {
        self.context.apply(updates);
        self.state = next_state;
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(exchange);
    }
}

// ============================================================================
// Turn Result
// ============================================================================

/// Outcome of one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnResult {
    pub reply_text: String,
    pub next_state: ConversationState,
    pub did_transition: bool,
}

impl TurnResult {
    /// True when this turn moved the conversation into its terminal state
    pub fn ended_conversation(&self) -> bool {
        self.did_transition && self.next_state.is_terminal()
    }
}
