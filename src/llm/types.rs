//! Common types for structured completions

use super::LlmError;
use crate::state_machine::ConversationState;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// JSON schema the service must conform its response to
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDescriptor {
    pub name: &'static str,
    pub schema: Value,
}

impl SchemaDescriptor {
    pub fn new(name: &'static str, schema: Value) -> Self {
        Self { name, schema }
    }

    /// Object schema whose properties are all required strings
    pub fn strings(name: &'static str, fields: &[&str]) -> Self {
        let properties: serde_json::Map<String, Value> = fields
            .iter()
            .map(|field| ((*field).to_string(), json!({ "type": "string" })))
            .collect();
        Self::new(
            name,
            json!({
                "type": "object",
                "properties": properties,
                "required": fields,
                "additionalProperties": false
            }),
        )
    }

    /// Free-text reply schema
    pub fn default_response() -> Self {
        Self::strings("default_response", &["content"])
    }
}

/// A transition the service may propose, with its natural-language condition
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOption {
    pub target: ConversationState,
    pub condition: &'static str,
}

/// One past user input and the reply it produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub reply: String,
}

/// Structured completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub state: ConversationState,
    /// Rendered prompt template for the current state
    pub prompt: String,
    pub user_input: String,
    pub schema: SchemaDescriptor,
    pub transitions: Vec<TransitionOption>,
    pub history: Vec<Exchange>,
}

impl CompletionRequest {
    /// System instructions: the state prompt plus the transitions on offer
    pub fn instructions(&self) -> String {
        if self.transitions.is_empty() {
            return self.prompt.clone();
        }

        let options = self
            .transitions
            .iter()
            .map(|t| format!("- {}: {}", t.target, t.condition))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "{}\n\nSet `next_state` to one of the following states when its condition is met, \
             otherwise set it to null:\n{options}",
            self.prompt
        )
    }

    /// Envelope schema wrapping the state schema with a `next_state` proposal
    pub fn envelope_schema(&self) -> Value {
        let mut targets: Vec<Value> = self
            .transitions
            .iter()
            .map(|t| Value::String(t.target.as_str().to_string()))
            .collect();
        targets.push(Value::Null);

        json!({
            "type": "object",
            "properties": {
                "response": self.schema.schema,
                "next_state": {
                    "type": ["string", "null"],
                    "enum": targets
                }
            },
            "required": ["response", "next_state"],
            "additionalProperties": false
        })
    }
}

/// Structured result returned by the completion service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredResult {
    pub response: Value,
    /// Raw next-state proposal; the engine validates it against the declared transitions
    #[serde(default)]
    pub next_state: Option<String>,
}

impl StructuredResult {
    pub fn new(response: Value) -> Self {
        Self {
            response,
            next_state: None,
        }
    }

    pub fn proposing(mut self, state: ConversationState) -> Self {
        self.next_state = Some(state.as_str().to_string());
        self
    }

    /// Parse the envelope returned by the service
    pub fn from_envelope(text: &str) -> Result<Self, LlmError> {
        let result: Self = serde_json::from_str(text).map_err(|e| {
            LlmError::invalid_response(format!("Response did not match schema: {e}"))
        })?;
        if !result.response.is_object() {
            return Err(LlmError::invalid_response(
                "Response payload is not an object",
            ));
        }
        Ok(result)
    }

    /// Read a string field from the response payload
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.response.get(key).and_then(Value::as_str)
    }
}
