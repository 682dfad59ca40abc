use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

/// Immutable configuration snapshot.
///
/// Built once by [`AppConfig::load`] and shared read-only. The agent crate
/// swaps in a fresh snapshot on reload; nothing mutates a snapshot in place.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub provider: ProviderKind,
    pub openai: OpenAiConfig,
    pub ollama: OllamaConfig,
    pub chat: ChatConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_base: String,
    /// Bearer credential. When absent the provider falls back to the
    /// `OPENAI_API_KEY` environment variable at call time.
    pub api_key: Option<SecretString>,
    pub model: String,
}

#[derive(Clone, Debug)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Re-prepended fresh on every turn; never stored in history.
    pub system_prompt: String,
    /// Global tool-permission flag. When false no provider advertises the
    /// run_command tool and the parser never yields a tool intent.
    pub allow_run_commands: bool,
    /// Permitted command prefixes. Empty means unrestricted.
    pub command_allowlist: Vec<String>,
    /// Per-identity cooldown. Zero or negative disables rate limiting.
    pub cooldown_secs: i64,
    /// Bound on stored history, counted in user+assistant exchanges.
    pub max_exchanges: usize,
    pub temperature: f64,
    /// Max completion tokens; zero means "let the provider decide".
    pub max_tokens: u32,
}

/// HTTP timeouts in seconds. A non-positive value means "use the client
/// default", except `call_timeout_secs` where it means "no deadline".
#[derive(Clone, Copy, Debug)]
pub struct HttpConfig {
    pub connect_timeout_secs: i64,
    pub read_timeout_secs: i64,
    pub write_timeout_secs: i64,
    pub call_timeout_secs: i64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub provider: Option<ProviderKind>,
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub ollama_base_url: Option<String>,
    pub ollama_model: Option<String>,
    pub allow_run_commands: Option<bool>,
    pub cooldown_secs: Option<i64>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            openai: OpenAiConfig {
                api_base: "https://api.openai.com/v1".to_string(),
                api_key: None,
                model: "gpt-4o-mini".to_string(),
            },
            ollama: OllamaConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "llama3.1:8b".to_string(),
            },
            chat: ChatConfig {
                system_prompt: "You are the helpful in-game assistant of this multiplayer \
                                server. If a request requires running a server command, use \
                                the included tool `run_command`. Otherwise answer normally. \
                                Keep answers short and conversational; avoid markdown."
                    .to_string(),
                allow_run_commands: false,
                command_allowlist: Vec::new(),
                cooldown_secs: 5,
                max_exchanges: 10,
                temperature: 0.4,
                max_tokens: 512,
            },
            // Tuned for an on-LAN model host; raise read/call for slow models.
            http: HttpConfig {
                connect_timeout_secs: 10,
                read_timeout_secs: 120,
                write_timeout_secs: 120,
                call_timeout_secs: 300,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("chatwarden.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(provider) = patch.provider {
            self.provider = provider;
        }

        if let Some(openai) = patch.openai {
            if let Some(api_base) = openai.api_base {
                self.openai.api_base = api_base;
            }
            if let Some(api_key_value) = openai.api_key {
                self.openai.api_key = Some(secret_value(api_key_value));
            }
            if let Some(model) = openai.model {
                self.openai.model = model;
            }
        }

        if let Some(ollama) = patch.ollama {
            if let Some(base_url) = ollama.base_url {
                self.ollama.base_url = base_url;
            }
            if let Some(model) = ollama.model {
                self.ollama.model = model;
            }
        }

        if let Some(chat) = patch.chat {
            if let Some(system_prompt) = chat.system_prompt {
                self.chat.system_prompt = system_prompt;
            }
            if let Some(allow_run_commands) = chat.allow_run_commands {
                self.chat.allow_run_commands = allow_run_commands;
            }
            if let Some(command_allowlist) = chat.command_allowlist {
                self.chat.command_allowlist = command_allowlist;
            }
            if let Some(cooldown_secs) = chat.cooldown_secs {
                self.chat.cooldown_secs = cooldown_secs;
            }
            if let Some(max_exchanges) = chat.max_exchanges {
                self.chat.max_exchanges = max_exchanges;
            }
            if let Some(temperature) = chat.temperature {
                self.chat.temperature = temperature;
            }
            if let Some(max_tokens) = chat.max_tokens {
                self.chat.max_tokens = max_tokens;
            }
        }

        if let Some(http) = patch.http {
            if let Some(connect_timeout_secs) = http.connect_timeout_secs {
                self.http.connect_timeout_secs = connect_timeout_secs;
            }
            if let Some(read_timeout_secs) = http.read_timeout_secs {
                self.http.read_timeout_secs = read_timeout_secs;
            }
            if let Some(write_timeout_secs) = http.write_timeout_secs {
                self.http.write_timeout_secs = write_timeout_secs;
            }
            if let Some(call_timeout_secs) = http.call_timeout_secs {
                self.http.call_timeout_secs = call_timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CHATWARDEN_PROVIDER") {
            self.provider = value.parse()?;
        }

        if let Some(value) = read_env("CHATWARDEN_OPENAI_API_BASE") {
            self.openai.api_base = value;
        }
        if let Some(value) = read_env("CHATWARDEN_OPENAI_API_KEY") {
            self.openai.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CHATWARDEN_OPENAI_MODEL") {
            self.openai.model = value;
        }

        if let Some(value) = read_env("CHATWARDEN_OLLAMA_BASE_URL") {
            self.ollama.base_url = value;
        }
        if let Some(value) = read_env("CHATWARDEN_OLLAMA_MODEL") {
            self.ollama.model = value;
        }

        if let Some(value) = read_env("CHATWARDEN_SYSTEM_PROMPT") {
            self.chat.system_prompt = value;
        }
        if let Some(value) = read_env("CHATWARDEN_ALLOW_RUN_COMMANDS") {
            self.chat.allow_run_commands = parse_bool("CHATWARDEN_ALLOW_RUN_COMMANDS", &value)?;
        }
        if let Some(value) = read_env("CHATWARDEN_COOLDOWN_SECS") {
            self.chat.cooldown_secs = parse_i64("CHATWARDEN_COOLDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("CHATWARDEN_MAX_EXCHANGES") {
            self.chat.max_exchanges = parse_usize("CHATWARDEN_MAX_EXCHANGES", &value)?;
        }

        let log_level =
            read_env("CHATWARDEN_LOGGING_LEVEL").or_else(|| read_env("CHATWARDEN_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CHATWARDEN_LOGGING_FORMAT").or_else(|| read_env("CHATWARDEN_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(provider) = overrides.provider {
            self.provider = provider;
        }
        if let Some(openai_api_key) = overrides.openai_api_key {
            self.openai.api_key = Some(secret_value(openai_api_key));
        }
        if let Some(openai_model) = overrides.openai_model {
            self.openai.model = openai_model;
        }
        if let Some(ollama_base_url) = overrides.ollama_base_url {
            self.ollama.base_url = ollama_base_url;
        }
        if let Some(ollama_model) = overrides.ollama_model {
            self.ollama.model = ollama_model;
        }
        if let Some(allow_run_commands) = overrides.allow_run_commands {
            self.chat.allow_run_commands = allow_run_commands;
        }
        if let Some(cooldown_secs) = overrides.cooldown_secs {
            self.chat.cooldown_secs = cooldown_secs;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_openai(&self.openai)?;
        validate_ollama(&self.ollama)?;
        validate_chat(&self.chat)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("chatwarden.toml"), PathBuf::from("config/chatwarden.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_openai(openai: &OpenAiConfig) -> Result<(), ConfigError> {
    let api_base = openai.api_base.trim();
    if !api_base.starts_with("http://") && !api_base.starts_with("https://") {
        return Err(ConfigError::Validation(
            "openai.api_base must start with http:// or https://".to_string(),
        ));
    }

    if openai.model.trim().is_empty() {
        return Err(ConfigError::Validation("openai.model must not be empty".to_string()));
    }

    if let Some(api_key) = &openai.api_key {
        if api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "openai.api_key is set but blank; omit it to fall back to OPENAI_API_KEY"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_ollama(ollama: &OllamaConfig) -> Result<(), ConfigError> {
    let base_url = ollama.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "ollama.base_url must start with http:// or https://".to_string(),
        ));
    }

    if ollama.model.trim().is_empty() {
        return Err(ConfigError::Validation("ollama.model must not be empty".to_string()));
    }

    Ok(())
}

fn validate_chat(chat: &ChatConfig) -> Result<(), ConfigError> {
    if chat.max_exchanges == 0 {
        return Err(ConfigError::Validation(
            "chat.max_exchanges must be greater than zero".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&chat.temperature) {
        return Err(ConfigError::Validation(
            "chat.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if chat.command_allowlist.iter().any(|prefix| prefix.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "chat.command_allowlist must not contain blank prefixes".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    provider: Option<ProviderKind>,
    openai: Option<OpenAiPatch>,
    ollama: Option<OllamaPatch>,
    chat: Option<ChatPatch>,
    http: Option<HttpPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiPatch {
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OllamaPatch {
    base_url: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatPatch {
    system_prompt: Option<String>,
    allow_run_commands: Option<bool>,
    command_allowlist: Option<Vec<String>>,
    cooldown_secs: Option<i64>,
    max_exchanges: Option<usize>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct HttpPatch {
    connect_timeout_secs: Option<i64>,
    read_timeout_secs: Option<i64>,
    write_timeout_secs: Option<i64>,
    call_timeout_secs: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
