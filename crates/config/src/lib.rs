//! Configuration loading, validation, and management for VoxChat.
//!
//! Loads configuration from `~/.voxchat/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.voxchat/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default text-generation provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per generated reply
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Speech (ASR + TTS) backend
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Conversation pipeline behavior
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// History and character storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Bearer tokens accepted by the gateway
    #[serde(default)]
    pub auth: AuthConfig,

    /// Characters inserted at startup when missing
    #[serde(default = "default_characters")]
    pub characters: Vec<CharacterSeed>,
}

fn default_provider() -> String {
    "qiniu".into()
}
fn default_model() -> String {
    "deepseek-v3".into()
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

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("providers", &self.providers)
            .field("speech", &self.speech)
            .field("pipeline", &self.pipeline)
            .field("storage", &self.storage)
            .field("gateway", &self.gateway)
            .field("auth", &self.auth)
            .field("characters", &self.characters.len())
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Speech backend settings. The key falls back to the top-level `api_key`.
#[derive(Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// "qiniu" or "none"
    #[serde(default = "default_speech_provider")]
    pub provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Encoding requested from TTS (mp3, wav, ...)
    #[serde(default = "default_encoding")]
    pub encoding: String,

    #[serde(default = "default_speed_ratio")]
    pub speed_ratio: f32,

    /// Per-call HTTP timeout
    #[serde(default = "default_speech_timeout")]
    pub timeout_secs: u64,
}

fn default_speech_provider() -> String {
    "qiniu".into()
}
fn default_encoding() -> String {
    "mp3".into()
}
fn default_speed_ratio() -> f32 {
    1.0
}
fn default_speech_timeout() -> u64 {
    30
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            provider: default_speech_provider(),
            api_key: None,
            api_url: None,
            encoding: default_encoding(),
            speed_ratio: default_speed_ratio(),
            timeout_secs: default_speech_timeout(),
        }
    }
}

impl std::fmt::Debug for SpeechConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechConfig")
            .field("provider", &self.provider)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("encoding", &self.encoding)
            .field("speed_ratio", &self.speed_ratio)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// What happens to a request when speech synthesis fails after a reply
/// was generated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsFailurePolicy {
    /// The request fails with an upstream TTS error
    #[default]
    Fail,
    /// The reply is returned without audio and a warning is recorded
    TextOnly,
}

/// Whether anonymous callers get session-scoped conversations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeMode {
    /// Anonymous callers are keyed by a session token
    #[default]
    Open,
    /// Every request must carry a verified identity
    AuthenticatedOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Budget for one whole pipeline run, in seconds
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    #[serde(default)]
    pub tts_failure: TtsFailurePolicy,

    /// Voice used when neither the caller nor the character picks one
    #[serde(default = "default_fallback_voice")]
    pub fallback_voice: String,

    #[serde(default)]
    pub scope_mode: ScopeMode,

    /// Longest accepted text input, in characters
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

fn default_deadline_secs() -> u64 {
    60
}
fn default_fallback_voice() -> String {
    "qiniu_zh_female_tmjxxy".into()
}
fn default_max_input_chars() -> usize {
    2000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
            tts_failure: TtsFailurePolicy::default(),
            fallback_voice: default_fallback_voice(),
            scope_mode: ScopeMode::default(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// SQLite file; defaults to `~/.voxchat/voxchat.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl StorageConfig {
    /// The database file to open.
    pub fn database_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => PathBuf::from(p),
            None => AppConfig::config_dir().join("voxchat.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// CORS origins; empty allows any origin
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Requests per minute per caller; 0 disables limiting
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

fn default_port() -> u16 {
    8080
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_rate_limit() -> u32 {
    60
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allowed_origins: vec![],
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

/// Static bearer tokens: token → user id.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut users: Vec<&str> = self.tokens.values().map(String::as_str).collect();
        users.sort_unstable();
        f.debug_struct("AuthConfig")
            .field("tokens", &format!("[REDACTED x{}]", self.tokens.len()))
            .field("users", &users)
            .finish()
    }
}

/// A character to insert at startup if its id is not yet stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSeed {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub default_voice: String,
}

fn default_characters() -> Vec<CharacterSeed> {
    vec![
        CharacterSeed {
            id: "1".into(),
            name: "哈利·波特".into(),
            description: "霍格沃茨魔法学校的学生，擅长黑魔法防御术。".into(),
            system_prompt: "你是一个15岁的哈利·波特，住在霍格沃茨。你的语气充满好奇和正义感，对黑魔法和伏地魔充满警惕。你的回答中应包含魔法元素。".into(),
            default_voice: String::new(),
        },
        CharacterSeed {
            id: "2".into(),
            name: "苏格拉底".into(),
            description: "古希腊哲学家，以提问的方式引导思考。".into(),
            system_prompt: "你是一个古希腊哲学家苏格拉底，专注于通过不断提问（苏格拉底式提问）来引导用户进行自我反思和思考。你的回答应该简短且富有哲理。".into(),
            default_voice: String::new(),
        },
    ]
}

impl AppConfig {
    /// Load configuration from the default path (~/.voxchat/config.toml).
    ///
    /// Environment overrides:
    /// - `VOXCHAT_API_KEY`, then `QINIU_LLM_KEY`, then `OPENAI_API_KEY`
    /// - `VOXCHAT_PROVIDER`, `VOXCHAT_MODEL`
    /// - `VOXCHAT_DATABASE` (SQLite path), `VOXCHAT_PORT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
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

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.api_key.is_none() {
            self.api_key = lookup("VOXCHAT_API_KEY")
                .or_else(|| lookup("QINIU_LLM_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(provider) = lookup("VOXCHAT_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("VOXCHAT_MODEL") {
            self.default_model = model;
        }

        if let Some(db) = lookup("VOXCHAT_DATABASE") {
            self.storage.backend = StorageBackend::Sqlite;
            self.storage.path = Some(db);
        }

        if let Some(port) = lookup("VOXCHAT_PORT") {
            self.gateway.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("VOXCHAT_PORT is not a valid port: {port}"))
            })?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".voxchat")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.pipeline.deadline_secs == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.deadline_secs must be > 0".into(),
            ));
        }

        if self.pipeline.max_input_chars == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.max_input_chars must be > 0".into(),
            ));
        }

        if self.speech.speed_ratio <= 0.0 {
            return Err(ConfigError::ValidationError(
                "speech.speed_ratio must be > 0".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for seed in &self.characters {
            if seed.id.trim().is_empty() || seed.system_prompt.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "character '{}' needs a non-empty id and system_prompt",
                    seed.name
                )));
            }
            if !seen.insert(seed.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate character id '{}'",
                    seed.id
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            providers: HashMap::new(),
            speech: SpeechConfig::default(),
            pipeline: PipelineConfig::default(),
            storage: StorageConfig::default(),
            gateway: GatewayConfig::default(),
            auth: AuthConfig::default(),
            characters: default_characters(),
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

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
