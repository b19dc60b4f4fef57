//! Customer support topology
//!
//! START -> CONFIRM -> IDENTIFIED -> END, with CONFIRM looping back to START
//! when the user rejects the captured details.

use super::confirmation::{classify, normalize_reply, Polarity};
use super::definition::{
    HandlerError, HandlerOutcome, RegistryError, StateDefinition, StateRegistry, TurnView,
};
use super::engine::CLOSING_REPLY;
use super::ConversationState;
use crate::llm::SchemaDescriptor;
use serde_json::json;

pub const WELCOME_MESSAGE: &str =
    "Hello! Welcome to support. I'm here to help you. May I please have your name?";

const CLARIFY_CONFIRMATION: &str = "I didn't understand your response. Please reply with 'yes' \
     if the information is correct, or 'no' if it needs to be changed.";

/// Context key holding the name captured in START, awaiting confirmation
pub const PENDING_USER_KEY: &str = "pending_user";
/// Context key holding the confirmed identity
pub const VERIFIED_USER_KEY: &str = "verified_user";
/// Context key holding the confirmed name as a plain string, for prompt templates
pub const USER_NAME_KEY: &str = "user_name";

/// Whole replies that close the conversation on their own
const FAREWELL_REPLIES: &[&str] = &[
    "bye",
    "bye bye",
    "goodbye",
    "ok bye",
    "ok goodbye",
    "thanks bye",
    "thank you bye",
    "that's all",
    "that is all",
    "that's all thanks",
    "that's all thank you",
    "nothing else",
    "no thanks",
];

/// Is the entire input a farewell.
///
/// Requests that merely mention "done" or "quit" do not count; the service's
/// END proposal is the main signal and this only backs it up.
pub fn is_farewell(input: &str) -> bool {
    let reply = normalize_reply(input).join(" ");
    FAREWELL_REPLIES.contains(&reply.as_str())
}

/// Build the support dispatch table
pub fn support_registry() -> Result<StateRegistry, RegistryError> {
    StateRegistry::new(
        ConversationState::Start,
        [
            StateDefinition::new(
                ConversationState::Start,
                "You are a customer support bot. Your first task is to ask the user for their \
                 name. Please ensure the user provides their name before proceeding.",
                SchemaDescriptor::strings("user_identification", &["user_name"]),
                start_state,
            )
            .with_transition(ConversationState::Confirm, "Once the user provides their name"),
            StateDefinition::new(
                ConversationState::Confirm,
                "Please confirm the information you provided. Reply with 'yes' or 'no'. \
                 Copy the user's answer into `confirmation`.",
                SchemaDescriptor::strings("confirmation", &["confirmation"]),
                confirm_state,
            )
            .with_transition(
                ConversationState::Identified,
                "If the user confirms the details are correct",
            )
            .with_transition(
                ConversationState::Start,
                "If the user indicates the details are incorrect",
            ),
            StateDefinition::new(
                ConversationState::Identified,
                "You are assisting {user_name}, who has identified themselves. Help with their \
                 request and ask whether there is anything else you can help with.",
                SchemaDescriptor::default_response(),
                identified_state,
            )
            .with_transition(
                ConversationState::End,
                "When the user indicates the conversation is over",
            ),
            StateDefinition::new(
                ConversationState::End,
                "Thank you! Goodbye.",
                SchemaDescriptor::default_response(),
                end_state,
            ),
        ],
    )
}

fn start_state(view: &TurnView<'_>) -> Result<HandlerOutcome, HandlerError> {
    let name = view.field("user_name")?.trim();
    tracing::debug!(
        captured = !name.is_empty(),
        proposed = ?view.proposed,
        "START turn"
    );

    if name.is_empty() || view.proposed != Some(ConversationState::Confirm) {
        return Ok(HandlerOutcome::reply(
            "Please provide your name to get started.",
        ));
    }

    Ok(HandlerOutcome::reply(format!(
        "Thank you! You provided the following details:\nName: {name}\n\
         Is this information correct? (yes/no)"
    ))
    .set_next_state(ConversationState::Confirm)
    .set_context(PENDING_USER_KEY, json!({ "user_name": name })))
}

fn confirm_state(view: &TurnView<'_>) -> Result<HandlerOutcome, HandlerError> {
    let answer = view.field("confirmation")?;
    let polarity = match classify(answer) {
        Polarity::Unmatched => classify(view.user_input),
        polarity => polarity,
    };
    tracing::debug!(?polarity, "CONFIRM turn");

    match polarity {
        Polarity::Positive => {
            let pending = view
                .context
                .get(PENDING_USER_KEY)
                .cloned()
                .ok_or_else(|| HandlerError::Invalid("No details awaiting confirmation".into()))?;
            let name = pending
                .get("user_name")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(HandlerOutcome::reply(
                "Thank you for confirming your details. How can I help you?",
            )
            .set_next_state(ConversationState::Identified)
            .set_context(VERIFIED_USER_KEY, pending)
            .set_context(USER_NAME_KEY, json!(name))
            .remove_context(PENDING_USER_KEY))
        }
        Polarity::Negative => Ok(HandlerOutcome::reply(
            "Let's try again. Please provide your name.",
        )
        .set_next_state(ConversationState::Start)
        .remove_context(PENDING_USER_KEY)),
        Polarity::Ambiguous | Polarity::Unmatched => Err(HandlerError::Ambiguous {
            clarification: CLARIFY_CONFIRMATION.to_string(),
        }),
    }
}

fn identified_state(view: &TurnView<'_>) -> Result<HandlerOutcome, HandlerError> {
    tracing::debug!(proposed = ?view.proposed, "IDENTIFIED turn");

    if view.proposed == Some(ConversationState::End) || is_farewell(view.user_input) {
        return Ok(HandlerOutcome::reply("Thank you! Have a great day!")
            .set_next_state(ConversationState::End));
    }

    let content = view.response.str_field("content").unwrap_or_default().trim();
    if content.is_empty() {
        Ok(HandlerOutcome::reply(
            "You have been identified successfully. How can I assist you further?",
        ))
    } else {
        Ok(HandlerOutcome::reply(content))
    }
}

fn end_state(_view: &TurnView<'_>) -> Result<HandlerOutcome, HandlerError> {
    Ok(HandlerOutcome::reply(CLOSING_REPLY))
}
