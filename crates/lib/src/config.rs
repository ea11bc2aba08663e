//! Configuration types and loading.
//!
//! Config is loaded once at startup from a JSON file (default `/etc/telegram-smpp/conf.json`)
//! plus a couple of environment overrides for secrets. Each component copies the fields it
//! needs when the bridge is wired up.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/etc/telegram-smpp/conf.json";
pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_ENQUIRE_LINK_SECS: u64 = 10;

/// Top-level bridge config. Keys are lowercase; the capitalised spellings of older
/// configuration files are accepted as aliases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct Config {
    /// Program name, only used in the startup log line.
    #[serde(default, alias = "Name")]
    pub name: String,

    /// Bot identifier (e.g. "bot123456"). A missing "bot" prefix is added when building the URL.
    #[serde(default, alias = "Botid")]
    pub botid: String,

    /// Bot key (the part after the colon in a BotFather token). Overridden by TELEGRAM_BOT_KEY env.
    #[serde(default, alias = "Botkey")]
    pub botkey: String,

    /// "topic" to post into a forum topic (see `chattopic`); anything else posts to the chat itself.
    #[serde(default, alias = "Chattype")]
    pub chattype: String,

    /// Destination chat id.
    #[serde(default, alias = "Chatid")]
    pub chatid: String,

    /// Topic (thread) message id, used only when `chattype` is "topic".
    #[serde(default, alias = "Chattopic")]
    pub chattopic: String,

    /// HTTP listen address for the submission endpoint (e.g. "127.0.0.1:8080").
    #[serde(default, alias = "Address")]
    pub address: String,

    /// SMSC address (host:port).
    #[serde(default, alias = "Smpp")]
    pub smpp: String,

    /// SMPP system_id.
    #[serde(default, alias = "Username")]
    pub username: String,

    /// SMPP password. Overridden by SMPP_PASSWORD env.
    #[serde(default, alias = "Password")]
    pub password: String,

    /// Debug verbosity: 0-1 full detail, 2 relay requests only, 3+ quiet.
    #[serde(default, alias = "Debug")]
    pub debug: i32,

    /// Telegram Bot API base URL (for tests or self-hosted Bot API servers).
    #[serde(default, alias = "Telegramapi")]
    pub telegramapi: Option<String>,

    /// SMPP system_type sent on bind.
    #[serde(default, alias = "Systemtype")]
    pub systemtype: String,

    /// Seconds between enquire_link keep-alives (default 10).
    #[serde(default, alias = "Enquirelink")]
    pub enquirelink: Option<u64>,
}

/// How the relay addresses the destination chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    Chat,
    Topic,
}

/// Diagnostic logging tier derived from `Config::debug`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Raw PDUs, extracted fields, decoded text and relay requests.
    Full,
    /// Relay requests only.
    Requests,
    Quiet,
}

impl Verbosity {
    pub fn from_level(level: i32) -> Self {
        match level {
            i32::MIN..=1 => Verbosity::Full,
            2 => Verbosity::Requests,
            _ => Verbosity::Quiet,
        }
    }

    /// True when inbound message internals should be logged.
    pub fn messages(self) -> bool {
        self == Verbosity::Full
    }

    /// True when outgoing relay requests should be logged.
    pub fn requests(self) -> bool {
        self <= Verbosity::Requests
    }
}

impl Config {
    pub fn chat_mode(&self) -> ChatMode {
        if self.chattype.trim().eq_ignore_ascii_case("topic") {
            ChatMode::Topic
        } else {
            ChatMode::Chat
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_level(self.debug)
    }

    pub fn telegram_api_base(&self) -> String {
        self.telegramapi
            .as_deref()
            .map(|s| s.trim().trim_end_matches('/'))
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_TELEGRAM_API_BASE)
            .to_string()
    }

    pub fn enquire_link_interval(&self) -> Duration {
        Duration::from_secs(
            self.enquirelink
                .filter(|s| *s > 0)
                .unwrap_or(DEFAULT_ENQUIRE_LINK_SECS),
        )
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Apply TELEGRAM_BOT_KEY and SMPP_PASSWORD env overrides.
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(key) = env_override("TELEGRAM_BOT_KEY") {
        config.botkey = key;
    }
    if let Some(password) = env_override("SMPP_PASSWORD") {
        config.password = password;
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SMSBRIDGE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Parse a config from JSON text.
pub fn parse_config(s: &str) -> Result<Config> {
    let config: Config = serde_json::from_str(s)?;
    Ok(config)
}

/// Load config from `path` (or SMSBRIDGE_CONFIG_PATH / the default path) and apply env overrides.
/// A missing or unparsable file is an error: the bridge never runs partially configured.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let s = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let mut config =
        parse_config(&s).with_context(|| format!("parsing config from {}", path.display()))?;
    apply_env_overrides(&mut config);
    log::info!(
        "program name: {}, bot id: {}, chat id: {}, listen address: {}, smpp address: {}",
        config.name,
        config.botid,
        config.chatid,
        config.address,
        config.smpp
    );
    Ok((config, path))
}
