//! OpenAI-style chat completions client.
//!
//! Wire shape: POST `{api_base}/chat/completions` with bearer auth; the
//! assistant message carries structured tool calls in `tool_calls` (current)
//! or `function_call` (legacy). Any OpenAI-compatible gateway that speaks
//! this dialect works, not just the upstream API.

use std::env;

use async_trait::async_trait;
use chatwarden_core::config::AppConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::message::ChatMessage;
use crate::parser::{self, ProviderResult, ToolIntent};
use crate::provider::{
    build_http_client, preview, run_command_tool, trimmed_base, LlmProvider, ProviderError,
};

const PROVIDER: &str = "openai";
const TOOL_DESCRIPTION: &str =
    "Execute a server command. Use only when an in-game action requires a /command.";

pub struct OpenAiProvider {
    api_base: String,
    api_key: Option<SecretString>,
    model: String,
    allow_tools: bool,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    tool_choice: &'a str,
    messages: &'a [ChatMessage],
}

impl OpenAiProvider {
    pub fn new(config: &AppConfig) -> Result<Self, ProviderError> {
        // Explicit key wins; otherwise fall back to the conventional env var.
        let api_key = config.openai.api_key.clone().or_else(|| {
            env::var("OPENAI_API_KEY")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(SecretString::from)
        });

        Ok(Self {
            api_base: trimmed_base(&config.openai.api_base),
            api_key,
            model: config.openai.model.clone(),
            allow_tools: config.chat.allow_run_commands,
            client: build_http_client(&config.http)?,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: u32,
    ) -> Result<ProviderResult, ProviderError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            temperature,
            max_tokens: (max_tokens > 0).then_some(max_tokens),
            tools: self.allow_tools.then(|| vec![run_command_tool(TOOL_DESCRIPTION)]),
            tool_choice: if self.allow_tools { "auto" } else { "none" },
            messages,
        };

        debug!(
            provider = PROVIDER,
            model = %self.model,
            message_count = messages.len(),
            tools_enabled = self.allow_tools,
            "dispatching chat request"
        );

        let mut call = self.client.post(format!("{}/chat/completions", self.api_base)).json(&request);
        if let Some(api_key) = &self.api_key {
            call = call.bearer_auth(api_key.expose_secret());
        }

        let response = call.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
                message: preview(&message),
            });
        }

        let raw = response.text().await?;
        debug!(provider = PROVIDER, body = %preview(&raw), "raw response");

        let body: Value = serde_json::from_str(&raw)
            .map_err(|err| ProviderError::Envelope(format!("invalid response JSON: {err}")))?;
        parse_envelope(&body, self.allow_tools)
    }
}

/// Normalize one chat-completions envelope.
fn parse_envelope(body: &Value, allow_tools: bool) -> Result<ProviderResult, ProviderError> {
    let message = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| ProviderError::Envelope("missing choices[0].message".to_string()))?;

    let text = message.get("content").and_then(Value::as_str).unwrap_or("").to_string();

    let tool = if allow_tools {
        tool_from_tool_calls(message)
            .or_else(|| tool_from_function_call(message))
            .or_else(|| parser::scan_text_for_tool(&text))
    } else {
        None
    };

    Ok(ProviderResult { text, tool })
}

/// Structured `tool_calls` array on the assistant message.
fn tool_from_tool_calls(message: &Value) -> Option<ToolIntent> {
    let first = message.get("tool_calls")?.as_array()?.first()?;
    let function = first.get("function")?.as_object()?;

    let name = function.get("name").and_then(Value::as_str).unwrap_or("");
    let command = function
        .get("arguments")
        .and_then(parser::argument_object)
        .and_then(|arguments| parser::command_argument(&arguments));

    accept(name, command)
}

/// Legacy single `function_call` field on the assistant message.
fn tool_from_function_call(message: &Value) -> Option<ToolIntent> {
    let function = message.get("function_call")?.as_object()?;

    let name = function.get("name").and_then(Value::as_str).unwrap_or("");
    let command = function
        .get("arguments")
        .and_then(parser::argument_object)
        .and_then(|arguments| parser::command_argument(&arguments));

    accept(name, command)
}

/// A call counts as run_command when the function name says so, or when the
/// name is unclear but a non-blank command argument is present (the single
/// supported kind is inferred).
fn accept(name: &str, command: Option<String>) -> Option<ToolIntent> {
    let named = name.to_ascii_lowercase().contains(parser::RUN_COMMAND);
    let has_command = command.as_deref().is_some_and(|value| !value.trim().is_empty());

    if named || has_command {
        Some(ToolIntent::run_command(command))
    } else {
        None
    }
}
