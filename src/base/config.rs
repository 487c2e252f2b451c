//! Load configuration via `config` crate with env-override support.

use std::{ops::Deref, sync::Arc, time::Duration};

use serde::Deserialize;

use crate::base::prompts;

use super::types::{Res, Void};

/// Default base URL for the Gemini OpenAI-compatible endpoint.
fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
}

/// Default text-only chat model.
fn default_text_model() -> String {
    "gemini-2.0-flash".to_string()
}

/// Default image-capable model.
fn default_vision_model() -> String {
    "gemini-2.0-flash".to_string()
}

/// Default sampling temperature.
fn default_temperature() -> f32 {
    0.7
}

/// Default max output tokens.
fn default_max_tokens() -> u32 {
    8192
}

/// Default system directive for the text chat model.
fn default_system_directive() -> String {
    prompts::SYSTEM_DIRECTIVE.to_string()
}

/// Default prompt for image attachments without text.
fn default_image_prompt() -> String {
    prompts::DEFAULT_IMAGE_PROMPT.to_string()
}

/// Default placeholder reply.
fn default_placeholder_text() -> String {
    prompts::PLACEHOLDER.to_string()
}

/// Default minimum interval between edits of a streaming reply.
fn default_edit_interval_ms() -> u64 {
    1000
}

/// Default timeout for opening a completion stream.
fn default_request_timeout_secs() -> u64 {
    120
}

/// Default cap on downloaded attachment size (20 MiB, the inline image limit).
fn default_max_attachment_bytes() -> u64 {
    20 * 1024 * 1024
}

/// The chat platform the bot connects to.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatPlatform {
    /// Discord, through the gateway.
    #[default]
    Discord,
    /// Slack, through Socket Mode.
    Slack,
}

/// Configuration for the relay-bot application.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// The shared configuration values.
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl From<ConfigInner> for Config {
    fn from(inner: ConfigInner) -> Self {
        Self { inner: Arc::new(inner) }
    }
}

/// Configuration values, as deserialized from the sources.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConfigInner {
    /// Chat platform to connect to (`PLATFORM`): `discord` or `slack`.
    #[serde(default)]
    pub platform: ChatPlatform,
    /// Discord application ID (`APP_ID`).
    #[serde(default)]
    pub app_id: Option<String>,
    /// Discord guild or Slack team to restrict the bot to (`GUILD_ID`).
    #[serde(default)]
    pub guild_id: Option<String>,
    /// Discord bot token (`DISCORD_TOKEN`).
    #[serde(default)]
    pub discord_token: Option<String>,
    /// Slack app token (`SLACK_APP_TOKEN`).
    #[serde(default)]
    pub slack_app_token: Option<String>,
    /// Slack bot token (`SLACK_BOT_TOKEN`).
    #[serde(default)]
    pub slack_bot_token: Option<String>,
    /// Generative API key (`API_KEY`).
    pub api_key: String,
    /// Base URL of the OpenAI-compatible generative API (`API_BASE`).
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Model used for text chat (`TEXT_MODEL`).
    #[serde(default = "default_text_model")]
    pub text_model: String,
    /// Model used for image attachments (`VISION_MODEL`).
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    /// Sampling temperature (`TEMPERATURE`).
    /// Value between 0 and 2. Higher values like 0.8 make output more random,
    /// while lower values like 0.2 make it more focused and deterministic.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Max output tokens (`MAX_TOKENS`).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// System directive for text chat (`SYSTEM_DIRECTIVE`); empty disables it.
    #[serde(default = "default_system_directive")]
    pub system_directive: String,
    /// Prompt sent with an image when the message has no text (`DEFAULT_IMAGE_PROMPT`).
    #[serde(default = "default_image_prompt")]
    pub default_image_prompt: String,
    /// Placeholder reply posted before streaming starts (`PLACEHOLDER_TEXT`).
    #[serde(default = "default_placeholder_text")]
    pub placeholder_text: String,
    /// Minimum milliseconds between edits of one reply (`EDIT_INTERVAL_MS`).
    #[serde(default = "default_edit_interval_ms")]
    pub edit_interval_ms: u64,
    /// Timeout in seconds for opening a completion stream (`REQUEST_TIMEOUT_SECS`).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Largest attachment the bot will download (`MAX_ATTACHMENT_BYTES`).
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,
}

impl ConfigInner {
    /// The guild filter, treating an empty value as unset.
    pub fn guild_filter(&self) -> Option<&str> {
        self.guild_id.as_deref().filter(|g| !g.is_empty())
    }

    /// The edit throttle as a `Duration`.
    pub fn edit_interval(&self) -> Duration {
        Duration::from_millis(self.edit_interval_ms)
    }

    /// The stream-open timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load configuration from `.env`, `RELAY_BOT_*` environment variables, and a TOML file.
    ///
    /// The unprefixed `APP_ID`, `GUILD_ID`, `DISCORD_TOKEN` and `API_KEY` are read as fallbacks.
    pub fn load(explicit_path: Option<&std::path::Path>) -> Res<Self> {
        // A missing `.env` is fine; anything else about it is not.
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let mut cfg = config::Config::builder();

        for (key, value) in legacy_env(|name| std::env::var(name).ok()) {
            cfg = cfg.set_default(key, value)?;
        }

        cfg = cfg.add_source(config::Environment::default().prefix("RELAY_BOT"));

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        let result = Config {
            inner: Arc::new(cfg.build()?.try_deserialize()?),
        };

        result.validate()?;

        Ok(result)
    }

    /// Check value ranges and that the selected platform has its credentials.
    pub fn validate(&self) -> Void {
        if self.api_key.is_empty() {
            return Err(anyhow::anyhow!("A generative API key is required."));
        }

        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(anyhow::anyhow!("Temperature must be between 0 and 2."));
        }

        if self.max_tokens < 1 || self.max_tokens > 128000 {
            return Err(anyhow::anyhow!("Max tokens must be between 1 and 128000."));
        }

        let missing = |value: &Option<String>| value.as_deref().is_none_or(str::is_empty);

        match self.platform {
            ChatPlatform::Discord => {
                if missing(&self.discord_token) {
                    return Err(anyhow::anyhow!("A Discord token is required when the platform is `discord`."));
                }
            }
            ChatPlatform::Slack => {
                if missing(&self.slack_app_token) || missing(&self.slack_bot_token) {
                    return Err(anyhow::anyhow!("Slack app and bot tokens are required when the platform is `slack`."));
                }
            }
        }

        Ok(())
    }
}

/// Unprefixed variable names accepted for the basic Discord setup, and the keys they fill.
const LEGACY_ENV: [(&str, &str); 4] = [("APP_ID", "app_id"), ("GUILD_ID", "guild_id"), ("DISCORD_TOKEN", "discord_token"), ("API_KEY", "api_key")];

/// Collect the legacy variables that are set.
///
/// These become defaults, so `RELAY_BOT_*` variables and the config file still win.
fn legacy_env(lookup: impl Fn(&str) -> Option<String>) -> Vec<(&'static str, String)> {
    LEGACY_ENV.iter().filter_map(|(name, key)| lookup(name).map(|value| (*key, value))).collect()
}

// Tests.
