//! Notification ledger, flip log and ping listings.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;

use crate::reporting::{FlipFilter, FlipRow, NotificationFilter, NotificationRow, PingFilter, PingRow};
use crate::state::AppState;

use super::{store_error, ApiError};

pub async fn notifications_list(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<NotificationFilter>,
) -> Result<Json<Vec<NotificationRow>>, ApiError> {
    state.reporting.notifications(&filter).await.map(Json).map_err(store_error)
}

pub async fn flips_list(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<FlipFilter>,
) -> Result<Json<Vec<FlipRow>>, ApiError> {
    state.reporting.flips(&filter).await.map(Json).map_err(store_error)
}

pub async fn pings_list(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<PingFilter>,
) -> Result<Json<Vec<PingRow>>, ApiError> {
    state.reporting.pings(&filter).await.map(Json).map_err(store_error)
}
