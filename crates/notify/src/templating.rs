//! Minijinja template rendering for alert messages.
//!
//! Alerts are rendered from a subject and a body template with access to the
//! check snapshot and the flip being reported. Webhook channels may carry
//! their own body template, rendered against the same [`AlertContext`].
//!
//! Templates are arbitrary strings (not pre-registered), so a fresh
//! [`minijinja::Environment`] is created per render call.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use deadman_core::{Check, Flip};

use crate::traits::{Alert, TransportError};

pub const DEFAULT_SUBJECT: &str = "{{ check.name }} is {{ flip.new_status | upper }}";

pub const DEFAULT_BODY: &str = "\
The check \"{{ check.name }}\" is {{ flip.new_status | upper }} ({{ flip.reason_text }}).
Previous status: {{ flip.old_status }}
Schedule: {{ check.schedule }}{% if check.kind == \"cron\" %} ({{ check.tz }}){% endif %}
Last ping: {{ check.last_ping or \"never\" }}
Total pings: {{ check.n_pings }}
{% if check.tags %}Tags: {{ check.tags | join(\", \") }}
{% endif %}";

/// Context data available to alert templates.
#[derive(Debug, Clone, Serialize)]
pub struct AlertContext {
    pub check: CheckContext,
    pub flip: FlipContext,
    /// Render time in RFC 3339.
    pub now: String,
}

/// Check snapshot exposed to templates.
#[derive(Debug, Clone, Serialize)]
pub struct CheckContext {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub kind: String,
    /// Period for simple checks, cron expression for cron checks.
    pub schedule: String,
    pub tz: String,
    pub status: String,
    pub last_ping: Option<String>,
    pub n_pings: u64,
}

/// The transition being reported.
#[derive(Debug, Clone, Serialize)]
pub struct FlipContext {
    pub id: String,
    pub old_status: String,
    pub new_status: String,
    pub reason: String,
    pub reason_text: String,
    pub created: String,
}

impl AlertContext {
    pub fn new(check: &Check, flip: &Flip, now: DateTime<Utc>) -> Self {
        Self {
            check: CheckContext {
                id: check.id.to_string(),
                name: check.name.clone(),
                tags: check.tags.clone(),
                kind: check.kind.to_string(),
                schedule: check.schedule_label(),
                tz: check.tz.clone(),
                status: check.status.to_string(),
                last_ping: check.last_ping.map(rfc3339),
                n_pings: check.n_pings,
            },
            flip: FlipContext {
                id: flip.id.to_string(),
                old_status: flip.old_status.to_string(),
                new_status: flip.new_status.to_string(),
                reason: flip.reason.to_string(),
                reason_text: flip.reason.describe().to_string(),
                created: rfc3339(flip.created),
            },
            now: rfc3339(now),
        }
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Renders alert templates using minijinja.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    subject: String,
    body: String,
}

impl TemplateRenderer {
    /// A renderer using the built-in subject and body templates.
    pub fn new() -> Self {
        Self {
            subject: DEFAULT_SUBJECT.to_string(),
            body: DEFAULT_BODY.to_string(),
        }
    }

    /// A renderer with custom alert templates, validated up front.
    pub fn with_templates(subject: impl Into<String>, body: impl Into<String>) -> Result<Self, TransportError> {
        let renderer = Self {
            subject: subject.into(),
            body: body.into(),
        };
        renderer.validate(&renderer.subject)?;
        renderer.validate(&renderer.body)?;
        Ok(renderer)
    }

    /// Build a configured minijinja environment with custom filters and globals.
    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();

        // `lower` and `upper` are built-in with the "builtins" feature,
        // but we register explicit versions to guarantee availability.
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);

        env.add_function("env", env_function);

        env
    }

    /// Render the alert subject and body for `ctx`.
    pub fn render_alert(&self, ctx: &AlertContext) -> Result<Alert, TransportError> {
        Ok(Alert {
            subject: self.render(&self.subject, ctx)?.trim().to_string(),
            body: self.render(&self.body, ctx)?,
            context: ctx.clone(),
        })
    }

    /// Render a template string with the given context.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Template`] if the template is invalid or
    /// rendering fails.
    pub fn render(&self, template_str: &str, ctx: &AlertContext) -> Result<String, TransportError> {
        let env = Self::build_env();
        env.render_str(template_str, ctx)
            .map_err(|e| TransportError::Template(e.to_string()))
    }

    /// Validate that a template string parses without errors.
    pub fn validate(&self, template_str: &str) -> Result<(), TransportError> {
        let env = Self::build_env();
        env.template_from_str(template_str)
            .map_err(|e| TransportError::Template(e.to_string()))?;
        Ok(())
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

/// Global function: read an environment variable by name.
///
/// Returns an empty string (and logs a warning) when the variable is unset.
fn env_function(name: String) -> String {
    match std::env::var(&name) {
        Ok(val) => val,
        Err(_) => {
            tracing::warn!(var = %name, "Environment variable not found, returning empty string");
            String::new()
        }
    }
}
