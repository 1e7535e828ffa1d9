//! Admin API endpoints.
//!
//! Read-only listings over the reporting model plus the resend action.
//! Shared error shape lives here.

mod channels;
mod checks;
mod health;
mod ledger;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use deadman_monitor::EngineError;
use deadman_notify::DispatchError;
use deadman_store::StoreError;

use crate::pipeline::MonitorError;

// ── Shared types ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: message.into() }))
}

pub(crate) fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound { .. } => error(StatusCode::NOT_FOUND, e.to_string()),
        other => {
            tracing::error!(error = %other, "Store query failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

pub(crate) fn monitor_error(e: MonitorError) -> ApiError {
    match e {
        MonitorError::Engine(EngineError::NotFound(_))
        | MonitorError::Dispatch(DispatchError::NotFound { .. }) => error(StatusCode::NOT_FOUND, e.to_string()),
        MonitorError::Dispatch(DispatchError::Busy(_)) => error(StatusCode::CONFLICT, e.to_string()),
        MonitorError::Engine(EngineError::Configuration(_)) => error(StatusCode::BAD_REQUEST, e.to_string()),
        other => {
            tracing::error!(error = %other, "Admin action failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

// ── Re-exports ───────────────────────────────────────────────────

pub use channels::channels_list;
pub use checks::{checks_get, checks_list, checks_resend, checks_resend_many};
pub use health::{config, health};
pub use ledger::{flips_list, notifications_list, pings_list};
