//! Wiring: store, transports, engine, dispatcher and monitor from config.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use deadman_core::Config;
use deadman_monitor::StatusEngine;
use deadman_notify::{AlertDispatcher, ConfigRegistry, DispatchPolicy, TemplateRenderer};
use deadman_store::{MemoryStore, PgStore, Store};

use crate::pipeline::Monitor;
use crate::seed::SeedFile;

/// The assembled pipeline and the name of the store backing it.
pub struct Runtime {
    pub monitor: Arc<Monitor>,
    pub backend: &'static str,
}

/// Connect to PostgreSQL when configured, otherwise keep state in memory.
pub async fn open_store(config: &Config) -> anyhow::Result<(Arc<dyn Store>, &'static str)> {
    if config.postgres.is_configured() {
        let store = PgStore::connect(&config.postgres).await?;
        Ok((Arc::new(store), "postgres"))
    } else {
        info!("PostgreSQL not configured, using in-memory store");
        Ok((Arc::new(MemoryStore::new()), "memory"))
    }
}

pub fn build_monitor(config: &Config, store: Arc<dyn Store>) -> Arc<Monitor> {
    let renderer = Arc::new(TemplateRenderer::new());
    let registry = Arc::new(ConfigRegistry::new(
        config.smtp.clone(),
        config.telegram.clone(),
        Arc::clone(&renderer),
        Duration::from_secs(config.dispatch.send_timeout_secs.max(1)),
    ));
    let dispatcher = AlertDispatcher::new(Arc::clone(&store), registry, renderer)
        .with_policy(DispatchPolicy::from(&config.dispatch));
    let engine = StatusEngine::new(store);
    Arc::new(Monitor::new(Arc::new(engine), Arc::new(dispatcher), &config.sweep))
}

pub async fn init(config: &Config, seed: Option<&Path>) -> anyhow::Result<Runtime> {
    let (store, backend) = open_store(config).await?;
    let monitor = build_monitor(config, store);

    if let Some(path) = seed {
        info!("Applying seed file {}", path.display());
        SeedFile::load(path)?.apply(&monitor, Utc::now()).await?;
    }

    Ok(Runtime { monitor, backend })
}
