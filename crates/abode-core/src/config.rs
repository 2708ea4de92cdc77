use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AbodeError, Result};

/// Top-level configuration for the Abode service.
///
/// Loaded from `abode.toml` by default, then overlaid with the recognised
/// environment variables. Read once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AbodeConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

impl AbodeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AbodeConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Overlay the process environment onto this configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Overlay values returned by `lookup` for each recognised key.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("LLM_API_KEY") {
            let key = key.trim().to_string();
            self.llm.api_key = if key.is_empty() { None } else { Some(key) };
        }
        if let Some(url) = lookup("LLM_API_URL") {
            self.llm.api_url = url;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }
        override_parsed(&lookup, "LLM_MAX_TOKENS", &mut self.llm.max_tokens);
        override_parsed(&lookup, "LLM_TEMPERATURE", &mut self.llm.temperature);
        override_parsed(&lookup, "SESSION_TTL_HOURS", &mut self.chat.session_ttl_hours);
        override_parsed(&lookup, "MAX_HISTORY_TURNS", &mut self.chat.max_history_turns);
        override_parsed(
            &lookup,
            "MAX_LISTINGS_IN_PROMPT",
            &mut self.chat.max_listings_in_prompt,
        );
        override_parsed(&lookup, "FAST_PATH_ENABLED", &mut self.chat.fast_path_enabled);
        override_parsed(&lookup, "ABODE_PORT", &mut self.general.port);
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!(key, value = %raw, "Ignoring unparsable configuration override"),
        }
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// HTTP port the API listens on.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            log_level: "info".to_string(),
            port: 8080,
        }
    }
}

/// Remote chat-completion endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Bearer token. When absent the client fails fast with `llm_unconfigured`.
    pub api_key: Option<String>,
    /// Full chat-completion URL.
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Hard per-request timeout.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 500,
            temperature: 0.7,
            timeout_secs: 30,
        }
    }
}

/// Assisted query pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Sliding session window.
    pub session_ttl_hours: u32,
    /// Turns of history passed to the LLM.
    pub max_history_turns: usize,
    /// Listings summarised in the LLM prompt.
    pub max_listings_in_prompt: usize,
    /// When false every message takes the LLM path.
    pub fast_path_enabled: bool,
    /// Overall per-message deadline.
    pub request_deadline_secs: u64,
    /// Maximum accepted message length in characters.
    pub max_message_length: usize,
    /// Emit a canned assistant turn when a session is created.
    pub welcome_message: bool,
    /// Hours between expired-session purge cycles.
    pub purge_interval_hours: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: 24,
            max_history_turns: 5,
            max_listings_in_prompt: 3,
            fast_path_enabled: true,
            request_deadline_secs: 45,
            max_message_length: 2000,
            welcome_message: true,
            purge_interval_hours: 6,
        }
    }
}
