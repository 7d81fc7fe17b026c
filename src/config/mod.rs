pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;

use self::validation::validate_config;
use crate::interceptor::InterceptorRegistry;

/// Default config path when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Which markup interceptor a backend uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum InterceptorSetting {
    /// Pick the first registered interceptor whose URL match succeeds.
    #[default]
    Auto,
    None,
    Named(String),
}

impl From<String> for InterceptorSetting {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Self::Auto,
            "none" | "off" => Self::None,
            name => Self::Named(name.to_string()),
        }
    }
}

impl From<InterceptorSetting> for String {
    fn from(value: InterceptorSetting) -> Self {
        value.to_string()
    }
}

impl fmt::Display for InterceptorSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterceptorSetting::Auto => write!(f, "auto"),
            InterceptorSetting::None => write!(f, "none"),
            InterceptorSetting::Named(name) => write!(f, "{name}"),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
}

fn default_port() -> u16 {
    5281
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Deserialize)]
struct ServerConfigWire {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default)]
    runtime_worker_threads: Option<RuntimeThreadsSetting>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuntimeThreadsSetting {
    Fixed(usize),
    Auto(()),
}

impl<'de> Deserialize<'de> for ServerConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = ServerConfigWire::deserialize(deserializer)?;
        Ok(Self {
            port: wire.port,
            host: wire.host,
            // missing or explicit null => one worker per core
            runtime_worker_threads: match wire.runtime_worker_threads {
                Some(RuntimeThreadsSetting::Fixed(threads)) => Some(threads),
                Some(RuntimeThreadsSetting::Auto(())) | None => None,
            },
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            runtime_worker_threads: None,
        }
    }
}

/// An `OpenAI`-compatible backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL up to (not including) `/chat/completions`.
    pub base_url: String,
    /// Sent as the bearer token; the client's own key is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Replaces the model name the client sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub interceptor: InterceptorSetting,
}

impl BackendConfig {
    /// `{base_url}/chat/completions`
    #[must_use]
    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// An Anthropic endpoint that answers `count_tokens` in place of the
/// local estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountTokensConfig {
    /// Base URL up to (not including) `/v1/messages/count_tokens`.
    pub base_url: String,
    /// Sent as `x-api-key`.
    pub api_key: String,
    /// Replaces the model name the client sent.
    pub model: String,
}

impl CountTokensConfig {
    /// `{base_url}/v1/messages/count_tokens`
    #[must_use]
    pub fn count_tokens_url(&self) -> String {
        format!("{}/v1/messages/count_tokens", self.base_url)
    }
}

/// Log line rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Rounds kept verbatim; older turns are compressed. `0` disables.
    #[serde(default)]
    pub keep_rounds: usize,
    /// Rounds kept when a request is routed to the vision backend.
    #[serde(default = "default_vision_keep_rounds")]
    pub vision_keep_rounds: usize,
    /// Multiplier applied to every reported token count.
    #[serde(default = "default_token_scale")]
    pub token_scale: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ultrathink_prompt: Option<String>,
}

fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_vision_keep_rounds() -> usize {
    1
}
fn default_token_scale() -> f64 {
    1.0
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Text,
            keep_rounds: 0,
            vision_keep_rounds: default_vision_keep_rounds(),
            token_scale: default_token_scale(),
            ultrathink_prompt: None,
        }
    }
}

impl FeaturesConfig {
    /// The ultrathink prompt, `None` when unset or blank.
    #[must_use]
    pub fn ultrathink_prompt(&self) -> Option<&str> {
        self.ultrathink_prompt
            .as_deref()
            .map(str::trim)
            .filter(|prompt| !prompt.is_empty())
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub backend: BackendConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_backend: Option<BackendConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_tokens: Option<CountTokensConfig>,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AppConfig {
    fn normalize(&mut self) {
        for backend in std::iter::once(&mut self.backend).chain(self.vision_backend.as_mut()) {
            let trimmed = backend.base_url.trim().trim_end_matches('/').to_string();
            backend.base_url = trimmed;
        }
        if let Some(count_tokens) = self.count_tokens.as_mut() {
            count_tokens.base_url = count_tokens.base_url.trim().trim_end_matches('/').to_string();
        }
    }
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails, or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let mut config: AppConfig = serde_yaml::from_str(contents)?;
    config.normalize();
    let registry = InterceptorRegistry::builtin();
    validate_config(&config, &registry)?;
    Ok(config)
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}
