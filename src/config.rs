//! YAML configuration file.

use std::env;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::context::{ContextSettings, ContextStrategy};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const API_KEY_ENV_VAR: &str = "CHATBOT_LITE_API_KEY";

const DEFAULT_API_BASE: &str = "http://localhost:11434/v1";
const DEFAULT_API_KEY: &str = "ollama";
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";
const DEFAULT_HISTORY_DIR: &str = "~/.chatbot-lite/history";
const DEFAULT_LOG_DIR: &str = "~/.chatbot-lite/logs";

/// Which completion backend serves the conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    #[value(name = "openai")]
    OpenAi,
    Mock,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Mock => "mock",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub llm: LlmConfig,
    #[serde(default)]
    pub app: AppConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    pub model: String,
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Honor `HTTP_PROXY`/`HTTPS_PROXY`; off so local servers are reached directly.
    #[serde(default)]
    pub use_env_proxy: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub context_strategy: ContextStrategy,
    #[serde(default = "default_compress_threshold")]
    pub compress_threshold: f64,
    #[serde(default = "default_compress_summary_tokens")]
    pub compress_summary_tokens: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            history_dir: default_history_dir(),
            log_dir: None,
            context_strategy: ContextStrategy::default(),
            compress_threshold: default_compress_threshold(),
            compress_summary_tokens: default_compress_summary_tokens(),
        }
    }
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_api_key() -> String {
    DEFAULT_API_KEY.to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_timeout_sec() -> u64 {
    60
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_history_dir() -> PathBuf {
    PathBuf::from(DEFAULT_HISTORY_DIR)
}

fn default_compress_threshold() -> f64 {
    0.85
}

fn default_compress_summary_tokens() -> usize {
    300
}

/// One invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}; copy config.yaml.example to config.yaml and edit it", .path.display())]
    NotFound { path: PathBuf },

    #[error("I/O error while {operation} at {}: {source}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {}", join_field_errors(.0))]
    Invalid(Vec<FieldError>),
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Config {
    /// Reads, validates and prepares the configuration at `path`.
    ///
    /// Applies environment overrides, expands `~` in directory settings and
    /// creates the history directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let path = absolute_path(path);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(ConfigError::NotFound { path });
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    operation: "reading config file",
                    path,
                    source,
                });
            }
        };

        let mut config = Self::from_yaml(&text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.apply_overrides(|key| env::var(key).ok());
        config.expand_paths();

        let errors = config.validate();
        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }

        fs::create_dir_all(&config.app.history_dir).map_err(|source| ConfigError::Io {
            operation: "creating history directory",
            path: config.app.history_dir.clone(),
            source,
        })?;

        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Applies overrides from a variable lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_key) = lookup(API_KEY_ENV_VAR).filter(|value| !value.trim().is_empty()) {
            self.llm.api_key = api_key;
        }
    }

    /// Every invalid field, not just the first one.
    #[must_use]
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let llm = &self.llm;
        let app = &self.app;

        if llm.model.trim().is_empty() {
            errors.push(FieldError::new("llm.model", "must not be empty"));
        }
        if llm.provider == ProviderKind::OpenAi && llm.api_base.trim().is_empty() {
            errors.push(FieldError::new("llm.api_base", "must not be empty"));
        }
        if !(0.0..=2.0).contains(&llm.temperature) {
            errors.push(FieldError::new(
                "llm.temperature",
                format!("must be between 0.0 and 2.0, got {}", llm.temperature),
            ));
        }
        if llm.max_tokens == 0 {
            errors.push(FieldError::new("llm.max_tokens", "must be greater than 0"));
        }
        if llm.timeout_sec == 0 {
            errors.push(FieldError::new("llm.timeout_sec", "must be greater than 0"));
        }
        if app.history_dir.as_os_str().is_empty() {
            errors.push(FieldError::new("app.history_dir", "must not be empty"));
        }
        if !(0.0..=1.0).contains(&app.compress_threshold) {
            errors.push(FieldError::new(
                "app.compress_threshold",
                format!("must be between 0.0 and 1.0, got {}", app.compress_threshold),
            ));
        }
        if app.compress_summary_tokens == 0 {
            errors.push(FieldError::new(
                "app.compress_summary_tokens",
                "must be greater than 0",
            ));
        }

        errors
    }

    /// Context policy derived from the `llm` and `app` sections.
    #[must_use]
    pub fn context_settings(&self) -> ContextSettings {
        ContextSettings {
            max_tokens: self.llm.max_tokens,
            compress_threshold: self.app.compress_threshold,
            compress_summary_tokens: self.app.compress_summary_tokens,
            strategy: self.app.context_strategy,
        }
    }

    /// Log directory, falling back to `~/.chatbot-lite/logs`.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.app
            .log_dir
            .clone()
            .unwrap_or_else(|| expand_tilde(Path::new(DEFAULT_LOG_DIR)))
    }

    fn expand_paths(&mut self) {
        self.app.history_dir = expand_tilde(&self.app.history_dir);
        if let Some(log_dir) = self.app.log_dir.as_mut() {
            *log_dir = expand_tilde(log_dir);
        }
    }
}

/// Replaces a leading `~` with the home directory when one is known.
#[must_use]
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use pretty_assertions::assert_eq;

    use super::{expand_tilde, Config, ConfigError, ProviderKind, API_KEY_ENV_VAR};
    use crate::context::{ContextSettings, ContextStrategy};

    const FULL: &str = r#"
llm:
  provider: openai
  api_base: http://localhost:11434/v1
  model: qwen3:8b
  api_key: ollama
  temperature: 0.7
  max_tokens: 2000
  timeout_sec: 60
  system_prompt: You are a helpful AI assistant.
  use_env_proxy: true
app:
  history_dir: /tmp/chatbot-lite/history
  log_dir: /tmp/chatbot-lite/logs
  context_strategy: sliding_window
  compress_threshold: 0.85
  compress_summary_tokens: 300
"#;

    #[test]
    fn parses_full_document() {
        let config = Config::from_yaml(FULL).expect("config should parse");
        assert_eq!(config.llm.provider, ProviderKind::OpenAi);
        assert_eq!(config.llm.model, "qwen3:8b");
        assert_eq!(config.llm.max_tokens, 2000);
        assert!(config.llm.use_env_proxy);
        assert_eq!(config.app.context_strategy, ContextStrategy::SlidingWindow);
        assert_eq!(config.log_dir(), PathBuf::from("/tmp/chatbot-lite/logs"));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn shipped_example_is_valid() {
        let config = Config::from_yaml(include_str!("../config.yaml.example"))
            .expect("example config should parse");
        assert!(config.validate().is_empty());
        assert_eq!(config.context_settings().threshold(), 1700);
    }

    #[test]
    fn minimal_document_uses_defaults() {
        let config = Config::from_yaml("llm:\n  model: llama3\n").expect("config should parse");
        assert_eq!(config.llm.api_base, "http://localhost:11434/v1");
        assert_eq!(config.llm.api_key, "ollama");
        assert_eq!(config.llm.temperature, 0.7);
        assert_eq!(config.llm.timeout_sec, 60);
        assert_eq!(config.llm.system_prompt, "You are a helpful AI assistant.");
        assert!(!config.llm.use_env_proxy);
        assert_eq!(config.app.context_strategy, ContextStrategy::LazyCompress);
        assert_eq!(config.app.compress_threshold, 0.85);
        assert_eq!(config.app.compress_summary_tokens, 300);
        assert!(config.app.log_dir.is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = Config::from_yaml("llm:\n  model: m\n  temprature: 0.5\n")
            .expect_err("typo should be rejected");
        assert!(error.to_string().contains("temprature"));
    }

    #[test]
    fn missing_model_is_a_parse_error() {
        assert!(Config::from_yaml("llm:\n  api_base: http://x\n").is_err());
    }

    #[test]
    fn validate_reports_every_invalid_field() {
        let yaml = r#"
llm:
  model: " "
  temperature: 2.5
  max_tokens: 0
  timeout_sec: 0
app:
  compress_threshold: 1.5
  compress_summary_tokens: 0
"#;
        let config = Config::from_yaml(yaml).expect("config should parse");
        let fields: Vec<&str> = config.validate().iter().map(|error| error.field).collect();
        assert_eq!(
            fields,
            vec![
                "llm.model",
                "llm.temperature",
                "llm.max_tokens",
                "llm.timeout_sec",
                "app.compress_threshold",
                "app.compress_summary_tokens",
            ]
        );
    }

    #[test]
    fn api_key_override_wins_when_set() {
        let mut config = Config::from_yaml(FULL).expect("config should parse");
        config.apply_overrides(|key| (key == API_KEY_ENV_VAR).then(|| "sk-live".to_string()));
        assert_eq!(config.llm.api_key, "sk-live");

        config.apply_overrides(|_| Some("  ".to_string()));
        assert_eq!(config.llm.api_key, "sk-live");
    }

    #[test]
    fn load_missing_file_names_absolute_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        match Config::load(&path).expect_err("missing file") {
            ConfigError::NotFound { path: reported } => {
                assert_eq!(reported, path);
                assert!(reported.is_absolute());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn load_creates_history_dir_and_reports_invalid_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = dir.path().join("history");
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            format!("llm:\n  model: m\napp:\n  history_dir: {}\n", history.display()),
        )
        .expect("write config");

        let config = Config::load(&path).expect("config should load");
        assert!(history.is_dir());
        assert_eq!(config.app.history_dir, history);

        std::fs::write(&path, "llm:\n  model: m\n  max_tokens: 0\n").expect("write config");
        match Config::load(&path).expect_err("invalid config") {
            ConfigError::Invalid(errors) => assert_eq!(errors[0].field, "llm.max_tokens"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn tilde_expands_to_home() {
        let expanded = expand_tilde(Path::new("~/.chatbot-lite/history"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join(".chatbot-lite/history"));
        }
        assert_eq!(expand_tilde(Path::new("/abs")), PathBuf::from("/abs"));
    }
}
