use std::sync::Arc;

use crate::pipeline::Monitor;
use crate::reporting::Reporting;

pub struct AppState {
    pub monitor: Arc<Monitor>,
    pub reporting: Reporting,
    /// `memory` or `postgres`.
    pub backend: &'static str,
    /// Redacted configuration, safe to return from the API.
    pub config_summary: serde_json::Value,
}

impl AppState {
    pub fn new(monitor: Arc<Monitor>, backend: &'static str, config_summary: serde_json::Value) -> Self {
        let reporting = Reporting::new(Arc::clone(monitor.store()));
        Self {
            monitor,
            reporting,
            backend,
            config_summary,
        }
    }
}
