//! Offline completion client for demo mode
//!
//! Produces plausible structured results for the support topology without
//! network access, after a randomised "thinking" delay.

use super::types::{CompletionRequest, StructuredResult};
use super::{CompletionClient, LlmError};
use crate::state_machine::support::is_farewell;
use crate::state_machine::ConversationState;
use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use std::time::Duration;

const MODEL_ID: &str = "scripted-demo";

/// Words that never count as a name on their own
const FILLER_WORDS: &[&str] = &[
    "the", "and", "hello", "hey", "hi", "name", "my", "its", "im", "am", "is", "this",
    "call", "me",
];

pub struct ScriptedClient {
    min_delay: Duration,
    max_delay: Duration,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
        }
    }

    /// No artificial latency
    #[allow(dead_code)] // Used by tests
    pub fn instant() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        rand::thread_rng().gen_range(self.min_delay..self.max_delay)
    }

    fn respond(request: &CompletionRequest) -> StructuredResult {
        let input = request.user_input.trim();
        match request.state {
            ConversationState::Start => match extract_name(input) {
                Some(name) => StructuredResult::new(json!({ "user_name": name }))
                    .proposing(ConversationState::Confirm),
                None => StructuredResult::new(json!({ "user_name": "" })),
            },
            ConversationState::Confirm => StructuredResult::new(json!({ "confirmation": input })),
            ConversationState::Identified if is_farewell(input) => StructuredResult::new(json!({
                "content": "Thank you for contacting us! Have a great day!"
            }))
            .proposing(ConversationState::End),
            ConversationState::Identified => StructuredResult::new(json!({
                "content": "I understand your concern. Is there anything else I can help you with today?"
            })),
            ConversationState::End => StructuredResult::new(json!({ "content": "Goodbye!" })),
        }
    }
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<StructuredResult, LlmError> {
        let delay = self.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(Self::respond(request))
    }

    fn model_id(&self) -> &str {
        MODEL_ID
    }
}

/// Pull a name out of free text: "my name is Ada", "I'm Ada", or the first plausible word
fn extract_name(input: &str) -> Option<String> {
    let words: Vec<&str> = input.split_whitespace().collect();
    let lowered: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();

    let marker = lowered
        .iter()
        .position(|w| matches!(w.as_str(), "is" | "am" | "i'm" | "im"));
    if let Some(index) = marker {
        let name: Vec<String> = words
            .iter()
            .skip(index + 1)
            .map(|w| clean_word(w))
            .take_while(|w| !w.is_empty() && !FILLER_WORDS.contains(&w.to_lowercase().as_str()))
            .take(2)
            .collect();
        if !name.is_empty() {
            return Some(name.join(" "));
        }
    }

    words
        .iter()
        .map(|w| clean_word(w))
        .find(|w| w.chars().count() > 2 && !FILLER_WORDS.contains(&w.to_lowercase().as_str()))
}

fn clean_word(word: &str) -> String {
    word.chars().filter(|c| c.is_alphabetic()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::SchemaDescriptor;

    fn request(state: ConversationState, input: &str) -> CompletionRequest {
        CompletionRequest {
            state,
            prompt: String::new(),
            user_input: input.to_string(),
            schema: SchemaDescriptor::default_response(),
            transitions: vec![],
            history: vec![],
        }
    }

    #[test]
    fn test_extract_name() {
        assert_eq!(extract_name("My name is Ada Lovelace"), Some("Ada Lovelace".to_string()));
        assert_eq!(extract_name("I'm Grace"), Some("Grace".to_string()));
        assert_eq!(extract_name("hello, Alan here"), Some("Alan".to_string()));
        assert_eq!(extract_name("hi"), None);
        assert_eq!(extract_name(""), None);
    }

    #[test]
    fn test_start_proposes_confirm_when_name_found() {
        let result = ScriptedClient::respond(&request(ConversationState::Start, "I am Ada"));
        assert_eq!(result.str_field("user_name"), Some("Ada"));
        assert_eq!(result.next_state.as_deref(), Some("CONFIRM"));

        let result = ScriptedClient::respond(&request(ConversationState::Start, "hi"));
        assert_eq!(result.str_field("user_name"), Some(""));
        assert!(result.next_state.is_none());
    }

    #[test]
    fn test_identified_farewell_proposes_end() {
        let result =
            ScriptedClient::respond(&request(ConversationState::Identified, "ok, goodbye"));
        assert_eq!(result.next_state.as_deref(), Some("END"));

        let result =
            ScriptedClient::respond(&request(ConversationState::Identified, "my printer jams"));
        assert!(result.next_state.is_none());
    }

    #[tokio::test]
    async fn test_instant_client_completes() {
        let client = ScriptedClient::instant();
        let result = client
            .complete(&request(ConversationState::Confirm, " yes "))
            .await
            .unwrap();
        assert_eq!(result.str_field("confirmation"), Some("yes"));
    }
}
