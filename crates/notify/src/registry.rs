//! Builds a [`Notifier`] for a stored channel.

use std::sync::Arc;
use std::time::Duration;

use deadman_core::config::{SmtpConfig, TelegramConfig};
use deadman_core::{Channel, ChannelKind};

use crate::email::EmailNotifier;
use crate::telegram::TelegramNotifier;
use crate::templating::TemplateRenderer;
use crate::traits::{Notifier, TransportError};
use crate::webhook::{http_client, WebhookNotifier};

/// Maps a channel to the transport that delivers to it.
///
/// A channel whose configuration cannot produce a notifier yields a
/// [`TransportError`], recorded like any failed delivery.
pub trait TransportRegistry: Send + Sync {
    fn notifier_for(&self, channel: &Channel) -> Result<Arc<dyn Notifier>, TransportError>;
}

/// Registry backed by process configuration.
pub struct ConfigRegistry {
    smtp: SmtpConfig,
    telegram: TelegramConfig,
    renderer: Arc<TemplateRenderer>,
    client: reqwest::Client,
}

impl ConfigRegistry {
    pub fn new(
        smtp: SmtpConfig,
        telegram: TelegramConfig,
        renderer: Arc<TemplateRenderer>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            smtp,
            telegram,
            renderer,
            client: http_client(request_timeout),
        }
    }
}

impl TransportRegistry for ConfigRegistry {
    fn notifier_for(&self, channel: &Channel) -> Result<Arc<dyn Notifier>, TransportError> {
        match channel.kind {
            ChannelKind::Webhook => Ok(Arc::new(WebhookNotifier::from_channel_value(
                &channel.value,
                Arc::clone(&self.renderer),
                self.client.clone(),
            )?)),
            ChannelKind::Email => Ok(Arc::new(EmailNotifier::from_config(&self.smtp, &channel.value)?)),
            ChannelKind::Telegram => {
                let token = self
                    .telegram
                    .bot_token
                    .as_deref()
                    .ok_or_else(|| TransportError::Config("Telegram bot token is not configured".to_string()))?;
                Ok(Arc::new(TelegramNotifier::from_config(
                    token,
                    &channel.value,
                    self.client.clone(),
                )?))
            }
        }
    }
}
