//! Telegram relay: sendMessage via Bot API as a multipart form.

use crate::channels::{Relay, RelayError};
use crate::config::{ChatMode, Config, Verbosity};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::path::PathBuf;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Field values starting with this marker are attached as a file read from the given path.
const FILE_MARKER: char = '@';

/// One multipart form field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    Text(String),
    File(PathBuf),
}

impl FormValue {
    /// Interpret a configured value: "@/path/to/file" becomes a file attachment.
    pub fn parse(value: &str) -> Self {
        match value.strip_prefix(FILE_MARKER) {
            Some(path) if !path.is_empty() => FormValue::File(PathBuf::from(path)),
            _ => FormValue::Text(value.to_string()),
        }
    }
}

async fn build_form(fields: Vec<(&'static str, FormValue)>) -> Result<Form, RelayError> {
    let mut form = Form::new();
    for (key, value) in fields {
        form = match value {
            FormValue::Text(text) => form.text(key, text),
            FormValue::File(path) => {
                let data = tokio::fs::read(&path)
                    .await
                    .map_err(|source| RelayError::Attachment {
                        path: path.display().to_string(),
                        source,
                    })?;
                let part = Part::bytes(data).file_name(path.display().to_string());
                form.part(key, part)
            }
        };
    }
    Ok(form)
}

/// Relays text lines to one fixed chat (optionally a forum topic).
pub struct TelegramRelay {
    api_base: String,
    bot_id: String,
    bot_key: String,
    chat_id: String,
    topic: Option<String>,
    verbosity: Verbosity,
    client: reqwest::Client,
}

impl TelegramRelay {
    pub fn new(config: &Config) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let topic = match config.chat_mode() {
            ChatMode::Topic => Some(config.chattopic.clone()),
            ChatMode::Chat => None,
        };
        Ok(Self {
            api_base: config.telegram_api_base(),
            bot_id: config.botid.trim().to_string(),
            bot_key: config.botkey.trim().to_string(),
            chat_id: config.chatid.clone(),
            topic,
            verbosity: config.verbosity(),
            client,
        })
    }

    /// Bot path segment: "bot<id>:<key>". Ids configured with or without the "bot" prefix both work.
    fn bot_path(&self, key: &str) -> String {
        if self.bot_id.starts_with("bot") {
            format!("{}:{}", self.bot_id, key)
        } else {
            format!("bot{}:{}", self.bot_id, key)
        }
    }

    fn send_message_url(&self) -> String {
        format!("{}/{}/sendMessage", self.api_base, self.bot_path(&self.bot_key))
    }

    /// Form fields for sendMessage. The message text is always sent verbatim, never as a file.
    fn form_fields(&self, text: &str) -> Vec<(&'static str, FormValue)> {
        let mut fields = vec![
            ("disable_web_page_preview", FormValue::Text("true".to_string())),
            ("parse_mode", FormValue::Text("HTML".to_string())),
            ("chat_id", FormValue::parse(&self.chat_id)),
        ];
        if let Some(ref topic) = self.topic {
            fields.push(("reply_to_message_id", FormValue::parse(topic)));
        }
        fields.push(("text", FormValue::Text(text.to_string())));
        fields
    }

    /// Send one message. Errors are returned so callers and tests can inspect them.
    pub async fn send_message(&self, text: &str) -> Result<(), RelayError> {
        let fields = self.form_fields(text);
        if self.verbosity.requests() {
            log::info!(
                "Telegram API request to URL {}/{}/sendMessage with fields: {:?}",
                self.api_base,
                self.bot_path("***"),
                fields
            );
        }
        let form = build_form(fields).await?;
        let res = self
            .client
            .post(self.send_message_url())
            .multipart(form)
            .send()
            .await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(RelayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Relay for TelegramRelay {
    async fn relay(&self, text: &str) {
        if let Err(e) = self.send_message(text).await {
            log::warn!("can't send message to Telegram: {}", e);
        }
    }
}
