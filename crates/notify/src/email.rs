//! SMTP email notifier via `lettre` with TLS support.
//!
//! The channel value is the recipient address; the server, port, TLS mode
//! and sender come from [`SmtpConfig`].

use deadman_core::config::SmtpConfig;
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};

use crate::traits::{Alert, Notifier, TransportError};

/// Sends alerts as emails via SMTP.
#[derive(Debug)]
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    /// Build an `EmailNotifier` for one recipient.
    ///
    /// Port 465 uses implicit TLS; other ports use STARTTLS unless TLS is
    /// disabled. SMTP credentials are read from the `SMTP_USERNAME` and
    /// `SMTP_PASSWORD` environment variables when both are set.
    pub fn from_config(smtp: &SmtpConfig, to: &str) -> Result<Self, TransportError> {
        let host = smtp
            .host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TransportError::Config("SMTP host is not configured".to_string()))?;

        let from: Mailbox = smtp
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| TransportError::Config(e.to_string()))?;
        let to: Mailbox = to
            .trim()
            .parse()
            .map_err(|e: lettre::address::AddressError| TransportError::Config(format!("invalid recipient: {e}")))?;

        let port = smtp.port.unwrap_or(587);
        let mut builder = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| TransportError::Config(e.to_string()))?
                .port(port)
        } else if smtp.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| TransportError::Config(e.to_string()))?
                .port(port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(port)
        };

        if let (Ok(username), Ok(password)) = (std::env::var("SMTP_USERNAME"), std::env::var("SMTP_PASSWORD")) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), TransportError> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(&alert.subject)
            .body(alert.body.clone())
            .map_err(|e| TransportError::Smtp(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| TransportError::Smtp(e.to_string()))?;

        tracing::debug!(channel = "email", to = %self.to, subject = %alert.subject, "alert delivered");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}
