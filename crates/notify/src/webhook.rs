//! Generic HTTP webhook notifier.
//!
//! A webhook channel's value is either a bare URL or a JSON object with
//! `url`, optional `method`, `headers` and `body_template`. Without a body
//! template the whole [`Alert`] is posted as JSON.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::templating::TemplateRenderer;
use crate::traits::{Alert, Notifier, TransportError};

/// Structured webhook channel value.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSpec {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body_template: Option<String>,
}

impl WebhookSpec {
    /// Parse a channel value: a JSON object or a plain URL.
    pub fn parse(value: &str) -> Result<Self, TransportError> {
        let trimmed = value.trim();
        if trimmed.starts_with('{') {
            return serde_json::from_str(trimmed)
                .map_err(|e| TransportError::Config(format!("invalid webhook config: {e}")));
        }
        if trimmed.is_empty() {
            return Err(TransportError::Config("webhook URL must not be empty".to_string()));
        }
        Ok(Self {
            url: trimmed.to_string(),
            method: None,
            headers: HashMap::new(),
            body_template: None,
        })
    }
}

/// Delivers alerts over HTTP to a configured endpoint.
///
/// Environment variable references (`${VAR_NAME}`) in the URL and header
/// values are resolved at construction time.
#[derive(Debug)]
pub struct WebhookNotifier {
    url: String,
    method: reqwest::Method,
    headers: HashMap<String, String>,
    /// When set, rendered against the alert context and sent as the body;
    /// otherwise the alert is serialized as JSON.
    body_template: Option<String>,
    renderer: Arc<TemplateRenderer>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Create a new webhook notifier.
    ///
    /// `method` defaults to `POST` when `None`.
    pub fn new(
        url: String,
        method: Option<reqwest::Method>,
        headers: HashMap<String, String>,
        body_template: Option<String>,
        renderer: Arc<TemplateRenderer>,
        client: reqwest::Client,
    ) -> Result<Self, TransportError> {
        let resolved_url = resolve_env_vars(&url)?;
        if !resolved_url.starts_with("http://") && !resolved_url.starts_with("https://") {
            return Err(TransportError::Config(format!("not an http(s) URL: {resolved_url}")));
        }

        let mut resolved_headers = HashMap::with_capacity(headers.len());
        for (key, value) in &headers {
            resolved_headers.insert(key.clone(), resolve_env_vars(value)?);
        }

        if let Some(ref tmpl) = body_template {
            renderer
                .validate(tmpl)
                .map_err(|e| TransportError::Config(format!("invalid body template: {e}")))?;
        }

        Ok(Self {
            url: resolved_url,
            method: method.unwrap_or(reqwest::Method::POST),
            headers: resolved_headers,
            body_template,
            renderer,
            client,
        })
    }

    /// Construct from a channel value (URL or JSON config).
    pub fn from_channel_value(
        value: &str,
        renderer: Arc<TemplateRenderer>,
        client: reqwest::Client,
    ) -> Result<Self, TransportError> {
        let spec = WebhookSpec::parse(value)?;
        let method = match spec.method {
            Some(m) => Some(
                m.to_uppercase()
                    .parse::<reqwest::Method>()
                    .map_err(|_| TransportError::Config(format!("invalid HTTP method: {m}")))?,
            ),
            None => None,
        };
        Self::new(spec.url, method, spec.headers, spec.body_template, renderer, client)
    }

    fn body(&self, alert: &Alert) -> Result<(String, &'static str), TransportError> {
        match &self.body_template {
            Some(tmpl) => Ok((self.renderer.render(tmpl, &alert.context)?, "text/plain; charset=utf-8")),
            None => serde_json::to_string(alert)
                .map(|b| (b, "application/json"))
                .map_err(|e| TransportError::Config(format!("failed to serialize alert: {e}"))),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), TransportError> {
        let (body, content_type) = self.body(alert)?;

        let mut request = self.client.request(self.method.clone(), &self.url);
        if self.method != reqwest::Method::GET {
            request = request
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(body);
        }
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(30);
            return Err(TransportError::RateLimited { retry_after_secs: retry_after });
        }

        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(url = %self.url, %status, "webhook returned non-2xx status");
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body: truncate(&body_text, 200),
            });
        }

        tracing::debug!(url = %self.url, method = %self.method, %status, "webhook alert delivered");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

/// Build the shared HTTP client used by webhook and Telegram notifiers.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("deadman/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

/// Resolve `${VAR_NAME}` patterns in a string using `std::env::var`.
///
/// Returns an error if a referenced variable is not set.
fn resolve_env_vars(input: &str) -> Result<String, TransportError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if !closed {
                return Err(TransportError::Config(format!("unclosed env var reference in: {input}")));
            }
            let value = std::env::var(&var_name)
                .map_err(|_| TransportError::Config(format!("env var not found: {var_name}")))?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}
