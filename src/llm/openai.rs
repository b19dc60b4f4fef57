//! `OpenAI` structured-output provider implementation

use super::types::{CompletionRequest, StructuredResult};
use super::{CompletionClient, LlmError};
use crate::config::{ConfigError, Credentials, SupportConfig, TIMEOUT_VAR};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chat completions client that constrains replies with `response_format = json_schema`
pub struct OpenAiClient {
    client: Client,
    credentials: Credentials,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(credentials: Credentials, config: &SupportConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                key: TIMEOUT_VAR,
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            credentials,
            model: config.model.clone(),
            base_url: config.base_url.clone(),
        })
    }

    fn translate_request(&self, request: &CompletionRequest) -> OpenAIRequest {
        let mut messages = Vec::with_capacity(request.history.len() * 2 + 2);

        messages.push(OpenAIMessage {
            role: "system".to_string(),
            content: request.instructions(),
        });

        for exchange in &request.history {
            messages.push(OpenAIMessage {
                role: "user".to_string(),
                content: exchange.user.clone(),
            });
            messages.push(OpenAIMessage {
                role: "assistant".to_string(),
                content: exchange.reply.clone(),
            });
        }

        messages.push(OpenAIMessage {
            role: "user".to_string(),
            content: request.user_input.clone(),
        });

        OpenAIRequest {
            model: self.model.clone(),
            messages,
            response_format: ResponseFormat {
                r#type: "json_schema".to_string(),
                json_schema: JsonSchemaFormat {
                    name: request.schema.name.to_string(),
                    strict: true,
                    schema: request.envelope_schema(),
                },
            },
        }
    }

    fn normalize_response(resp: OpenAIResponse) -> Result<StructuredResult, LlmError> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::invalid_response("No choices in response"))?;

        if let Some(refusal) = choice.message.refusal {
            return Err(LlmError::invalid_response(format!("Model refused: {refusal}")));
        }

        let content = choice
            .message
            .content
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| LlmError::invalid_response("Empty response content"))?;

        StructuredResult::from_envelope(&content)
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<StructuredResult, LlmError> {
        let openai_request = self.translate_request(request);

        let mut builder = self
            .client
            .post(&self.base_url)
            .header(
                "Authorization",
                format!("Bearer {}", self.credentials.api_key()),
            )
            .header("Content-Type", "application/json");
        if let Some(organization) = self.credentials.organization() {
            builder = builder.header("OpenAI-Organization", organization);
        }

        let response = builder.json(&openai_request).send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::network(format!("Request timeout: {e}"))
            } else if e.is_connect() {
                LlmError::network(format!("Connection failed: {e}"))
            } else {
                LlmError::unknown(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(status_error(status.as_u16(), &body, retry_after));
        }

        let openai_response: OpenAIResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::invalid_response(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        Self::normalize_response(openai_response)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// `Retry-After` in delta-seconds; HTTP-date values are ignored
fn parse_retry_after(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn status_error(status: u16, body: &str, retry_after: Option<Duration>) -> LlmError {
    let message = serde_json::from_str::<OpenAIErrorResponse>(body)
        .map_or_else(|_| body.to_string(), |resp| resp.error.message);
    let err = LlmError::from_status(status, &message);
    match retry_after {
        Some(delay) if status == 429 => err.with_retry_after(delay),
        _ => err,
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
    json_schema: JsonSchemaFormat,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    name: String,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}
