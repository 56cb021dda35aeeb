use std::env;
use std::path::Path;

use ib_core::SEEN_CAPACITY;
use serde::Deserialize;

use crate::error::{Result, StoreError};
use crate::fsutil::read_optional;

/// Contents of `bot.toml`. Every key has a default; credentials can also come
/// from `IB_CLIENT_ID`, `IB_CLIENT_SECRET`, `IB_USERNAME`, `IB_PASSWORD`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub reddit: RedditSettings,
    pub bot: BotSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedditSettings {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
    pub auth_base: String,
    pub api_base: String,
    pub request_timeout_secs: u64,
}

impl Default for RedditSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            username: String::new(),
            password: String::new(),
            user_agent: concat!("immaginibot/", env!("CARGO_PKG_VERSION")).to_string(),
            auth_base: "https://www.reddit.com".to_string(),
            api_base: "https://oauth.reddit.com".to_string(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    /// Multireddit to watch; the account's first one when unset.
    pub multireddit: Option<String>,
    /// Recipient of forwarded messages; the first moderator when unset.
    pub admin: Option<String>,
    pub seen_capacity: usize,
    pub comment_pause_after: u32,
    pub inbox_pause_after: u32,
    pub poll_delay_ms: u64,
    pub reconnect_delay_secs: u64,
    pub export_title: String,
    pub full_export_title: String,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            multireddit: None,
            admin: None,
            seen_capacity: SEEN_CAPACITY,
            comment_pause_after: 2,
            inbox_pause_after: 0,
            poll_delay_ms: 1000,
            reconnect_delay_secs: 5,
            export_title: "Istruzioni".to_string(),
            full_export_title: "Export full".to_string(),
        }
    }
}

impl Settings {
    pub fn parse(content: &str, origin: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| StoreError::TomlDecode(origin.to_path_buf(), e))
    }

    /// Load `path` (defaults if absent), then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = match read_optional(path)? {
            Some(content) => Self::parse(&content, path)?,
            None => Self::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    fn apply_env(&mut self) {
        let overrides = [
            ("IB_CLIENT_ID", &mut self.reddit.client_id),
            ("IB_CLIENT_SECRET", &mut self.reddit.client_secret),
            ("IB_USERNAME", &mut self.reddit.username),
            ("IB_PASSWORD", &mut self.reddit.password),
        ];
        for (var, slot) in overrides {
            if let Ok(value) = env::var(var)
                && !value.is_empty()
            {
                *slot = value;
            }
        }
    }

    /// Credentials needed to log in; error names the first missing one.
    pub fn require_credentials(&self) -> Result<()> {
        let r = &self.reddit;
        for (name, value) in [
            ("client_id", &r.client_id),
            ("client_secret", &r.client_secret),
            ("username", &r.username),
            ("password", &r.password),
        ] {
            if value.trim().is_empty() {
                return Err(StoreError::InvalidData(format!(
                    "missing reddit.{name} in bot.toml"
                )));
            }
        }
        Ok(())
    }
}
