//! Check listings and the resend action.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::reporting::{CheckFilter, CheckRow};
use crate::state::AppState;

use super::{monitor_error, store_error, ApiError};

pub async fn checks_list(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<CheckFilter>,
) -> Result<Json<Vec<CheckRow>>, ApiError> {
    state.reporting.checks(&filter).await.map(Json).map_err(store_error)
}

pub async fn checks_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CheckRow>, ApiError> {
    state.reporting.check(id).await.map(Json).map_err(store_error)
}

#[derive(Debug, Serialize)]
pub struct ResendResponse {
    /// Checks resent successfully.
    pub checks: usize,
    /// Channels attempted across all checks.
    pub attempted: usize,
    /// Checks that could not be resent.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<ResendFailure>,
}

#[derive(Debug, Serialize)]
pub struct ResendFailure {
    pub check_id: Uuid,
    pub error: String,
}

/// Re-send the current alert for one check.
pub async fn checks_resend(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResendResponse>, ApiError> {
    let attempted = state.monitor.resend(id, Utc::now()).await.map_err(monitor_error)?;
    info!(check_id = %id, attempted, "Alert resent from admin API");
    Ok(Json(ResendResponse {
        checks: 1,
        attempted,
        failed: Vec::new(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ResendRequest {
    pub check_ids: Vec<Uuid>,
}

/// Re-send the current alert for several checks.
///
/// Every check is attempted; the ones that fail are listed in the response
/// next to the totals for those that went through.
pub async fn checks_resend_many(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResendRequest>,
) -> Result<Json<ResendResponse>, ApiError> {
    let now = Utc::now();
    let mut response = ResendResponse {
        checks: 0,
        attempted: 0,
        failed: Vec::new(),
    };
    for id in &req.check_ids {
        match state.monitor.resend(*id, now).await {
            Ok(attempted) => {
                response.checks += 1;
                response.attempted += attempted;
            }
            Err(e) => {
                warn!(check_id = %id, error = %e, "Resend failed");
                response.failed.push(ResendFailure {
                    check_id: *id,
                    error: e.to_string(),
                });
            }
        }
    }
    info!(
        checks = response.checks,
        failed = response.failed.len(),
        attempted = response.attempted,
        "Alerts resent from admin API"
    );
    Ok(Json(response))
}
