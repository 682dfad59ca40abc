//! Ollama-style chat client.
//!
//! Wire shape: POST `{base_url}/api/chat` with `stream: false`; sampling
//! parameters ride in an `options` object. Structured tool calls may hang
//! off the message object or the top-level envelope depending on the build,
//! and their arguments may carry an explicit `tool` kind.

use async_trait::async_trait;
use chatwarden_core::config::AppConfig;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::message::ChatMessage;
use crate::parser::{self, ProviderResult, ToolIntent};
use crate::provider::{
    build_http_client, preview, run_command_tool, trimmed_base, LlmProvider, ProviderError,
};

const PROVIDER: &str = "ollama";
const TOOL_DESCRIPTION: &str =
    "Execute a server command. Use sparingly and only when an action requires a /command.";

pub struct OllamaProvider {
    base_url: String,
    model: String,
    allow_tools: bool,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    // Most builds ignore unknown fields; where supported, "none" disables
    // tool calls outright.
    tool_choice: &'a str,
    messages: &'a [ChatMessage],
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl OllamaProvider {
    pub fn new(config: &AppConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: trimmed_base(&config.ollama.base_url),
            model: config.ollama.model.clone(),
            allow_tools: config.chat.allow_run_commands,
            client: build_http_client(&config.http)?,
        })
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: u32,
    ) -> Result<ProviderResult, ProviderError> {
        let request = OllamaChatRequest {
            model: &self.model,
            stream: false,
            tools: self.allow_tools.then(|| vec![run_command_tool(TOOL_DESCRIPTION)]),
            tool_choice: if self.allow_tools { "auto" } else { "none" },
            messages,
            options: OllamaOptions {
                temperature,
                num_predict: (max_tokens > 0).then_some(max_tokens),
            },
        };

        debug!(
            provider = PROVIDER,
            model = %self.model,
            message_count = messages.len(),
            tools_enabled = self.allow_tools,
            "dispatching chat request"
        );

        let response =
            self.client.post(format!("{}/api/chat", self.base_url)).json(&request).send().await?;
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
        Ok(parse_envelope(&body, self.allow_tools))
    }
}

/// Normalize one `/api/chat` envelope. Unlike the OpenAI dialect there is no
/// hard required path: a missing message yields an empty reply rather than
/// an error, matching how permissive the endpoint is in practice.
fn parse_envelope(body: &Value, allow_tools: bool) -> ProviderResult {
    // Primary shape: { "message": { "content": "..." } }
    let mut text = body
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .unwrap_or("");

    // Some responses use a top-level "response" field instead.
    if text.trim().is_empty() {
        if let Some(fallback) = body.get("response").and_then(Value::as_str) {
            text = fallback;
        }
    }

    let tool = if allow_tools {
        tool_from_tool_calls(body).or_else(|| parser::scan_text_for_tool(text))
    } else {
        None
    };

    ProviderResult { text: text.to_string(), tool }
}

/// Structured tool calls, attached to the message object or the top-level
/// envelope. The arguments may name the kind explicitly via a `tool` field;
/// an argument-only payload infers the single supported kind.
fn tool_from_tool_calls(body: &Value) -> Option<ToolIntent> {
    let calls = body
        .get("message")
        .and_then(|message| message.get("tool_calls"))
        .and_then(Value::as_array)
        .or_else(|| body.get("tool_calls").and_then(Value::as_array))?;

    let function = calls.first()?.get("function")?;
    let arguments = function.get("arguments").and_then(parser::argument_object)?;

    let kind = arguments
        .get("tool")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    let command = parser::command_argument(&arguments);

    match kind {
        Some(kind) => Some(ToolIntent { kind, command }),
        None if command.as_deref().is_some_and(|value| !value.trim().is_empty()) => {
            Some(ToolIntent::run_command(command))
        }
        None => None,
    }
}
