//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::confirmation::{classify, Polarity, NEGATIVE_INDICATORS, POSITIVE_INDICATORS};
use super::engine::CLOSING_REPLY;
use super::state::HISTORY_LIMIT;
use super::support::support_registry;
use super::*;
use crate::llm::{LlmError, StructuredResult};
use crate::testing::MockCompletionClient;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

const FILLER: &[&str] = &["the", "details", "are", "my", "name", "is", "ok", "please", "thanks"];

/// Positive words that have a matching "not ..." negative phrase
const NEGATED_BY_NOT: &[&str] = &["correct", "right", "true", "accurate"];

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

fn engine_with(client: &Arc<MockCompletionClient>) -> Engine {
    Engine::new(support_registry().unwrap(), client.clone())
}

fn is_exit(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "quit" | "exit")
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_filler() -> impl Strategy<Value = Vec<&'static str>> {
    proptest::collection::vec(proptest::sample::select(FILLER), 0..5)
}

fn arb_negative() -> impl Strategy<Value = &'static str> {
    proptest::sample::select(NEGATIVE_INDICATORS)
}

fn arb_positive() -> impl Strategy<Value = &'static str> {
    proptest::sample::select(POSITIVE_INDICATORS)
}

fn arb_live_state() -> impl Strategy<Value = ConversationState> {
    prop_oneof![
        Just(ConversationState::Start),
        Just(ConversationState::Confirm),
        Just(ConversationState::Identified),
    ]
}

fn arb_input() -> impl Strategy<Value = String> {
    "[a-zA-Z ]{0,30}"
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    // A negative indicator anywhere means the reply is never positive
    #[test]
    fn prop_negative_never_positive(
        before in arb_filler(),
        negative in arb_negative(),
        after in arb_filler(),
        positive in proptest::option::of(arb_positive()),
    ) {
        let mut words = before.clone();
        words.push(negative);
        if let Some(positive) = positive {
            words.push(positive);
        }
        words.extend(after.iter().copied());
        let text = words.join(" ");
        prop_assert_ne!(classify(&text), Polarity::Positive, "classified {:?} as positive", text);
    }

    // Negative phrases that contain a positive word stay negative on their own
    #[test]
    fn prop_negative_superset_is_negative(
        positive in proptest::sample::select(NEGATED_BY_NOT),
        filler in arb_filler(),
    ) {
        let phrase = format!("not {positive}");
        let text = format!("{} {phrase}", filler.join(" "));
        prop_assert_eq!(classify(&text), Polarity::Negative);
    }

    #[test]
    fn prop_positive_alone_is_positive(
        before in arb_filler(),
        positive in arb_positive(),
        after in arb_filler(),
    ) {
        let text = format!("{} {positive} {}", before.join(" "), after.join(" "));
        prop_assert_eq!(classify(&text), Polarity::Positive);
    }

    // END answers every input with the closing reply and never calls the client
    #[test]
    fn prop_end_is_idempotent(inputs in proptest::collection::vec(arb_input(), 1..5)) {
        let client = Arc::new(MockCompletionClient::new("mock"));
        let engine = engine_with(&client);
        let mut conversation = Conversation::new(ConversationState::End);

        for input in &inputs {
            let turn = block_on(engine.run_turn(&mut conversation, input)).unwrap();
            prop_assert_eq!(turn.reply_text.as_str(), CLOSING_REPLY);
            prop_assert_eq!(turn.next_state, ConversationState::End);
            prop_assert!(!turn.did_transition);
        }
        prop_assert!(client.recorded_requests().is_empty());
    }

    // A failed completion never moves the conversation
    #[test]
    fn prop_service_failure_keeps_state(state in arb_live_state(), input in arb_input()) {
        prop_assume!(!is_exit(&input));
        let client = Arc::new(MockCompletionClient::new("mock"));
        client.queue_error(LlmError::server_error("unavailable"));
        let engine = engine_with(&client);
        let mut conversation = Conversation::new(state);

        let result = block_on(engine.run_turn(&mut conversation, &input));
        prop_assert!(matches!(result, Err(EngineError::Service(_))));
        prop_assert_eq!(conversation.state(), state);
        prop_assert_eq!(conversation.history().count(), 0);
    }

    // The transcript sent to the service stays bounded
    #[test]
    fn prop_history_bounded(turns in 1usize..40) {
        let client = Arc::new(MockCompletionClient::new("mock"));
        let engine = engine_with(&client);
        let mut conversation = Conversation::new(ConversationState::Identified);

        block_on(async {
            for i in 0..turns {
                client.queue_result(StructuredResult::new(json!({ "content": format!("reply {i}") })));
                engine.run_turn(&mut conversation, "help me").await.unwrap();
            }
        });

        prop_assert_eq!(conversation.history().count(), turns.min(HISTORY_LIMIT));
        let last = client.recorded_requests().pop().unwrap();
        prop_assert!(last.history.len() <= HISTORY_LIMIT);
    }
}
