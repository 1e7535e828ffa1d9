use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;

use crate::reporting::{ChannelFilter, ChannelRow};
use crate::state::AppState;

use super::{store_error, ApiError};

pub async fn channels_list(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ChannelFilter>,
) -> Result<Json<Vec<ChannelRow>>, ApiError> {
    state.reporting.channels(&filter).await.map(Json).map_err(store_error)
}
