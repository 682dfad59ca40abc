use std::time::Duration;

use async_trait::async_trait;
use chatwarden_core::config::{AppConfig, HttpConfig, ProviderKind};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::message::ChatMessage;
use crate::ollama::OllamaProvider;
use crate::openai::OpenAiProvider;
use crate::parser::ProviderResult;

/// One provider call: serialize the transcript, perform the HTTP exchange,
/// normalize the response. Implementations never retry and never stream.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: u32,
    ) -> Result<ProviderResult, ProviderError>;
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{provider} returned status {status}: {message}")]
    Status { provider: &'static str, status: u16, message: String },
    #[error("malformed provider response: {0}")]
    Envelope(String),
}

/// Build the provider selected by configuration.
pub fn provider_from_config(config: &AppConfig) -> Result<Box<dyn LlmProvider>, ProviderError> {
    match config.provider {
        ProviderKind::OpenAi => {
            debug!(
                provider = "openai",
                api_base = %config.openai.api_base,
                model = %config.openai.model,
                "building provider client"
            );
            Ok(Box::new(OpenAiProvider::new(config)?))
        }
        ProviderKind::Ollama => {
            debug!(
                provider = "ollama",
                base_url = %config.ollama.base_url,
                model = %config.ollama.model,
                "building provider client"
            );
            Ok(Box::new(OllamaProvider::new(config)?))
        }
    }
}

/// Apply configured timeouts. Non-positive connect/read values fall back to
/// the client defaults; a non-positive call deadline means no deadline.
/// reqwest exposes no distinct write timeout, so writes are bounded by the
/// call deadline; the config field exists for surface compatibility.
pub(crate) fn build_http_client(http: &HttpConfig) -> Result<reqwest::Client, ProviderError> {
    let mut builder = reqwest::Client::builder();

    if http.connect_timeout_secs > 0 {
        builder = builder.connect_timeout(Duration::from_secs(http.connect_timeout_secs as u64));
    }
    if http.read_timeout_secs > 0 {
        builder = builder.read_timeout(Duration::from_secs(http.read_timeout_secs as u64));
    }
    if http.call_timeout_secs > 0 {
        builder = builder.timeout(Duration::from_secs(http.call_timeout_secs as u64));
    }

    Ok(builder.build()?)
}

/// The single advertised tool definition, shared by both dialects.
pub(crate) fn run_command_tool(description: &str) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": crate::parser::RUN_COMMAND,
            "description": description,
            "parameters": {
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The server command to run, with or without a leading slash."
                    }
                },
                "required": ["command"],
                "additionalProperties": false
            }
        }
    })
}

/// Strip a trailing slash so path joining stays predictable.
pub(crate) fn trimmed_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Short preview of a raw body for debug logging.
pub(crate) fn preview(body: &str) -> String {
    const LIMIT: usize = 500;
    if body.chars().count() <= LIMIT {
        body.to_string()
    } else {
        let head: String = body.chars().take(LIMIT).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use chatwarden_core::config::{AppConfig, ProviderKind};

    use super::{preview, provider_from_config, run_command_tool, trimmed_base};

    #[test]
    fn factory_builds_the_configured_dialect() {
        let mut config = AppConfig::default();
        config.provider = ProviderKind::Ollama;
        assert!(provider_from_config(&config).is_ok());

        config.provider = ProviderKind::OpenAi;
        assert!(provider_from_config(&config).is_ok());
    }

    #[test]
    fn tool_definition_requires_the_command_argument() {
        let tool = run_command_tool("Execute a server command.");
        assert_eq!(tool["function"]["name"], "run_command");
        assert_eq!(tool["function"]["parameters"]["required"][0], "command");
        assert_eq!(tool["function"]["parameters"]["additionalProperties"], false);
    }

    #[test]
    fn base_urls_lose_trailing_slashes() {
        assert_eq!(trimmed_base("http://localhost:11434/"), "http://localhost:11434");
        assert_eq!(trimmed_base("https://api.openai.com/v1"), "https://api.openai.com/v1");
    }

    #[test]
    fn preview_truncates_long_bodies() {
        let long = "x".repeat(600);
        let shown = preview(&long);
        assert!(shown.chars().count() <= 501);
        assert!(shown.ends_with('…'));
        assert_eq!(preview("short"), "short");
    }
}
