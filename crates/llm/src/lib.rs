//! LLM provider clients - dual-dialect chat with optional tool extraction
//!
//! This crate turns an ordered chat transcript into one normalized
//! [`ProviderResult`], whichever wire dialect the configured backend speaks:
//!
//! - **OpenAI-style** (`openai`) - `/chat/completions`, bearer auth,
//!   `tool_calls` on the assistant message plus the legacy `function_call`
//! - **Ollama-style** (`ollama`) - `/api/chat`, `tool_calls` on the message
//!   or the top-level envelope
//!
//! Both clients implement the same [`provider::LlmProvider`] contract and
//! share the text-embedded-JSON fallback in [`parser`]. New dialects are
//! added by implementing the trait, never by extending a hierarchy.
//!
//! # Tool model
//!
//! Exactly one tool exists: `run_command`, carrying a single string
//! argument. When tool use is disabled by configuration the clients tell
//! the backend not to call tools and the parser never yields an intent,
//! even if the raw body contains one.

pub mod message;
pub mod ollama;
pub mod openai;
pub mod parser;
pub mod provider;

pub use message::{ChatMessage, Role};
pub use parser::{ProviderResult, ToolIntent, RUN_COMMAND};
pub use provider::{provider_from_config, LlmProvider, ProviderError};
