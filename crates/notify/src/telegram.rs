//! Telegram Bot API notifier with MarkdownV2 formatting.
//!
//! The channel value is the chat id; the bot token comes from
//! configuration.

use crate::traits::{Alert, Notifier, TransportError};

/// Escapes special characters for Telegram MarkdownV2 parse mode.
///
/// Telegram requires these characters to be escaped with a preceding backslash
/// when using MarkdownV2: `_`, `*`, `[`, `]`, `(`, `)`, `~`, `` ` ``, `>`,
/// `#`, `+`, `-`, `=`, `|`, `{`, `}`, `.`, `!`
pub fn escape_markdown_v2(text: &str) -> String {
    let special = ['_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\'];
    let mut result = String::with_capacity(text.len() * 2);
    for ch in text.chars() {
        if special.contains(&ch) {
            result.push('\\');
        }
        result.push(ch);
    }
    result
}

/// Sends alerts via the Telegram Bot API.
#[derive(Debug)]
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    /// Creates a new `TelegramNotifier`.
    ///
    /// If `bot_token` is of the form `${VAR}`, it is resolved from the
    /// environment. Returns [`TransportError::Config`] if the token or the
    /// chat id is empty, or the variable is missing.
    pub fn from_config(
        bot_token: &str,
        chat_id: &str,
        client: reqwest::Client,
    ) -> Result<Self, TransportError> {
        let resolved_token = if bot_token.starts_with("${") {
            let var_name = bot_token
                .strip_prefix("${")
                .and_then(|s| s.strip_suffix('}'))
                .ok_or_else(|| TransportError::Config(format!("Malformed env var reference: {bot_token}")))?;
            std::env::var(var_name)
                .map_err(|_| TransportError::Config(format!("Environment variable '{var_name}' is not set")))?
        } else {
            bot_token.to_string()
        };

        if resolved_token.is_empty() {
            return Err(TransportError::Config("Telegram bot token must not be empty".to_string()));
        }
        let chat_id = chat_id.trim();
        if chat_id.is_empty() {
            return Err(TransportError::Config("Telegram chat id must not be empty".to_string()));
        }

        Ok(Self {
            bot_token: resolved_token,
            chat_id: chat_id.to_string(),
            api_base: "https://api.telegram.org".to_string(),
            client,
        })
    }

    /// Point at a different Bot API server.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn text(alert: &Alert) -> String {
        format!("*{}*\n\n{}", escape_markdown_v2(&alert.subject), escape_markdown_v2(alert.body.trim_end()))
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), TransportError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": Self::text(alert),
            "parse_mode": "MarkdownV2",
        });

        tracing::debug!(chat_id = %self.chat_id, "Sending Telegram alert");

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        let resp_body: serde_json::Value = response.json().await?;

        if resp_body.get("ok") == Some(&serde_json::Value::Bool(true)) {
            return Ok(());
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp_body
                .get("parameters")
                .and_then(|p| p.get("retry_after"))
                .and_then(|v| v.as_u64())
                .unwrap_or(30);
            return Err(TransportError::RateLimited { retry_after_secs: retry_after });
        }

        let description = resp_body
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown Telegram API error");

        Err(TransportError::Rejected {
            status: status.as_u16(),
            body: description.to_string(),
        })
    }

    fn channel_name(&self) -> &str {
        "telegram"
    }
}
