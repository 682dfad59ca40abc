//! Shared tool-intent extraction.
//!
//! The provider-specific *location* of structured tool calls lives with each
//! client (`openai`, `ollama`); everything dialect-independent is here: the
//! normalized result shape, argument-payload decoding, and the
//! JSON-embedded-in-text fallback scan.

use serde_json::{Map, Value};

/// The single supported tool kind.
pub const RUN_COMMAND: &str = "run_command";

/// A model-proposed request to perform the one privileged action we support.
///
/// `command` may be absent or blank; the gate downstream decides what to do
/// with that. `kind` is kept verbatim so the dispatcher can reject unknown
/// kinds instead of the parser guessing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolIntent {
    pub kind: String,
    pub command: Option<String>,
}

impl ToolIntent {
    pub fn run_command(command: Option<String>) -> Self {
        Self { kind: RUN_COMMAND.to_string(), command }
    }

    pub fn is_run_command(&self) -> bool {
        self.kind.eq_ignore_ascii_case(RUN_COMMAND)
    }
}

/// Normalized outcome of one provider call, regardless of wire dialect.
///
/// `text` is always present (possibly empty) even when a tool intent was
/// also found, so callers can surface accompanying commentary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderResult {
    pub text: String,
    pub tool: Option<ToolIntent>,
}

impl ProviderResult {
    pub fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into(), tool: None }
    }
}

/// Fallback extraction: scan a plain-text reply for an embedded tool object.
///
/// Span heuristic: first occurrence of `{"tool"` through the *last* `}` in
/// the whole text. Known fragility: replies containing several JSON-like
/// fragments or literal closing braces after the object will fail to parse
/// and are treated as "no tool". Kept as-is; existing prompts depend on it.
///
/// Accepts only the `run_command` kind (case-insensitive) with a non-blank
/// `command`. Malformed JSON, a wrong kind, or a blank command all yield
/// `None`, never an error.
pub fn scan_text_for_tool(text: &str) -> Option<ToolIntent> {
    let start = text.find("{\"tool\"")?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }

    let candidate = &text[start..=end];
    let value: Value = serde_json::from_str(candidate).ok()?;
    let object = value.as_object()?;

    let kind = object.get("tool")?.as_str()?;
    if !kind.eq_ignore_ascii_case(RUN_COMMAND) {
        return None;
    }

    let command = object.get("command")?.as_str()?;
    if command.trim().is_empty() {
        return None;
    }

    Some(ToolIntent::run_command(Some(command.to_string())))
}

/// Decode a function-arguments payload that may be a JSON object or a
/// JSON-encoded string (both occur in the wild, per dialect and model).
pub(crate) fn argument_object(arguments: &Value) -> Option<Map<String, Value>> {
    match arguments {
        Value::Object(object) => Some(object.clone()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw).ok()? {
            Value::Object(object) => Some(object),
            _ => None,
        },
        _ => None,
    }
}

/// The command argument, under its canonical name or the `cmd` alias.
pub(crate) fn command_argument(arguments: &Map<String, Value>) -> Option<String> {
    arguments
        .get("command")
        .or_else(|| arguments.get("cmd"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
