//! Configuration loading, validation, and management for coact.
//!
//! Loads configuration from `~/.coact/config.toml` with environment
//! variable overrides. Validates all settings before any run starts.

use coact_core::category::{Category, CategoryRegistry, default_catalog};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default endpoint for the OpenAI-compatible backend.
pub const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1";

/// The root configuration structure.
///
/// Maps directly to `~/.coact/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for HTTP backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Which backend drives the agent
    #[serde(default)]
    pub backend: BackendKind,

    /// Model name; each backend has its own default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per agent reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Base URL for the OpenAI-compatible backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Turn loop settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Custom category catalog; empty means the stock catalog
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<Category>,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_url", &self.api_url)
            .field("engine", &self.engine)
            .field("categories", &self.categories)
            .finish()
    }
}

/// Available agent backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Any OpenAI-compatible chat-completions endpoint
    #[default]
    #[serde(alias = "openrouter")]
    Openai,
    /// The `claude` command-line client
    ClaudeCli,
}

impl BackendKind {
    /// Model used when none is configured.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Openai => "anthropic/claude-sonnet-4",
            Self::ClaudeCli => "haiku",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Openai => "openai",
            Self::ClaudeCli => "claude-cli",
        })
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "openrouter" => Ok(Self::Openai),
            "claude-cli" | "claude_cli" | "claude" => Ok(Self::ClaudeCli),
            other => Err(ConfigError::ValidationError(format!(
                "unknown backend '{other}' (expected 'openai' or 'claude-cli')"
            ))),
        }
    }
}

/// Turn loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Turn budget per run
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Declaring this category ends a run
    #[serde(default = "default_done_category")]
    pub done_category: String,

    /// Same-category streak that triggers a nudge (0 disables)
    #[serde(default = "default_repetition_threshold")]
    pub repetition_threshold: usize,

    /// Ask for an up-front plan before the first turn
    #[serde(default)]
    pub planning: bool,
}

fn default_max_turns() -> u32 {
    20
}
fn default_done_category() -> String {
    "done".into()
}
fn default_repetition_threshold() -> usize {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            done_category: default_done_category(),
            repetition_threshold: default_repetition_threshold(),
            planning: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.coact/config.toml).
    ///
    /// Environment overrides:
    /// - `COACT_API_KEY`, then `OPENROUTER_API_KEY`, then `OPENAI_API_KEY`
    ///   (only when the file sets no key)
    /// - `COACT_BACKEND`
    /// - `COACT_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.api_key.is_none() {
            self.api_key = ["COACT_API_KEY", "OPENROUTER_API_KEY", "OPENAI_API_KEY"]
                .into_iter()
                .find_map(|key| lookup(key).filter(|v| !v.is_empty()));
        }

        if let Some(backend) = lookup("COACT_BACKEND") {
            self.backend = backend.parse()?;
        }

        if let Some(model) = lookup("COACT_MODEL").filter(|m| !m.is_empty()) {
            self.model = Some(model);
        }

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs_home().join(".coact")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.engine.done_category.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "engine.done_category must not be empty".into(),
            ));
        }

        if let Some(category) = self.categories.iter().find(|c| c.name.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "category with description '{}' has an empty name",
                category.description
            )));
        }

        self.category_registry().map(|_| ())
    }

    /// The configured catalog, or the stock one when none is configured.
    pub fn category_registry(&self) -> Result<CategoryRegistry, ConfigError> {
        if self.categories.is_empty() {
            return Ok(default_catalog());
        }
        CategoryRegistry::from_categories(self.categories.iter().cloned())
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// The configured model, or the backend's default.
    pub fn effective_model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.backend.default_model())
    }

    pub fn effective_api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Render this configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        Self::default().to_toml().unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            backend: BackendKind::default(),
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_url: None,
            engine: EngineConfig::default(),
            categories: Vec::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for coact_core::Error {
    fn from(e: ConfigError) -> Self {
        Self::Config {
            message: e.to_string(),
        }
    }
}
