use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub postgres: PostgresConfig,
    pub smtp: SmtpConfig,
    pub telegram: TelegramConfig,
    pub dispatch: DispatchConfig,
    pub sweep: SweepConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `DEADMAN_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("DEADMAN_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            smtp: SmtpConfig::from_env_profiled(p),
            telegram: TelegramConfig::from_env_profiled(p),
            dispatch: DispatchConfig::from_env_profiled(p),
            sweep: SweepConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:    {}:{}", self.server.host, self.server.port);
        tracing::info!("  postgres:  host={}, db={}, configured={}", self.postgres.host, self.postgres.database, self.postgres.is_configured());
        tracing::info!("  smtp:      host={}, from={}", self.smtp.host.as_deref().unwrap_or("(none)"), self.smtp.from);
        tracing::info!("  telegram:  configured={}", self.telegram.bot_token.is_some());
        tracing::info!(
            "  dispatch:  timeout={}s, attempts={}, failure_threshold={:?}",
            self.dispatch.send_timeout_secs,
            self.dispatch.max_attempts,
            self.dispatch.failure_threshold,
        );
        tracing::info!(
            "  sweep:     interval={}s, recovery_grace={}s, concurrency={}",
            self.sweep.interval_secs,
            self.sweep.recovery_grace_secs,
            self.sweep.concurrency,
        );
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port },
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "configured": self.postgres.is_configured(),
            },
            "smtp": {
                "host": self.smtp.host,
                "port": self.smtp.port,
                "from": self.smtp.from,
            },
            "telegram": { "configured": self.telegram.bot_token.is_some() },
            "dispatch": self.dispatch,
            "sweep": self.sweep,
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_parse(p, "PORT", 8000),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
        }
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_parse(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "deadman"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_parse(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── SMTP (email channels) ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: bool,
    pub from: String,
}

impl SmtpConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_opt(p, "SMTP_HOST"),
            port: profiled_env_opt(p, "SMTP_PORT").and_then(|v| v.parse().ok()),
            tls: profiled_env_or(p, "SMTP_TLS", "true") == "true",
            from: profiled_env_or(p, "SMTP_FROM", "alerts@localhost"),
        }
    }
}

// ── Telegram ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(skip_serializing)]
    pub bot_token: Option<String>,
}

impl TelegramConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            bot_token: profiled_env_opt(p, "TELEGRAM_BOT_TOKEN"),
        }
    }
}

// ── Dispatch policy ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Per-attempt send timeout.
    pub send_timeout_secs: u64,
    /// Attempts per channel per dispatch, including the first.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub retry_backoff_ms: u64,
    /// Consecutive failures after which a channel is skipped. `None` disables
    /// circuit breaking.
    pub failure_threshold: Option<u32>,
    /// How long a tripped channel is skipped before one probe attempt.
    pub circuit_cooldown_secs: u64,
    /// Dispatch lease on a flip.
    pub claim_lease_secs: u64,
}

impl DispatchConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            send_timeout_secs: profiled_env_parse(p, "DISPATCH_SEND_TIMEOUT_SECS", 10),
            max_attempts: profiled_env_parse(p, "DISPATCH_MAX_ATTEMPTS", 2),
            retry_backoff_ms: profiled_env_parse(p, "DISPATCH_RETRY_BACKOFF_MS", 1_000),
            failure_threshold: profiled_env_opt(p, "DISPATCH_FAILURE_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .filter(|n: &u32| *n > 0),
            circuit_cooldown_secs: profiled_env_parse(p, "DISPATCH_CIRCUIT_COOLDOWN_SECS", 3_600),
            claim_lease_secs: profiled_env_parse(p, "DISPATCH_CLAIM_LEASE_SECS", 120),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_timeout_secs: 10,
            max_attempts: 2,
            retry_backoff_ms: 1_000,
            failure_threshold: None,
            circuit_cooldown_secs: 3_600,
            claim_lease_secs: 120,
        }
    }
}

// ── Sweeps ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Interval between deadline sweeps.
    pub interval_secs: u64,
    /// Unprocessed flips younger than this are left to their own dispatch.
    pub recovery_grace_secs: u64,
    /// Checks evaluated in parallel per sweep.
    pub concurrency: usize,
}

impl SweepConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            interval_secs: profiled_env_parse(p, "SWEEP_INTERVAL_SECS", 10),
            recovery_grace_secs: profiled_env_parse(p, "SWEEP_RECOVERY_GRACE_SECS", 60),
            concurrency: profiled_env_parse(p, "SWEEP_CONCURRENCY", 16),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            recovery_grace_secs: 60,
            concurrency: 16,
        }
    }
}
