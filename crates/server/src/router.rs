//! HTTP router construction.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::api;
use crate::state::AppState;

/// Build the admin API router.
///
/// `cors_origin` of `*` allows any origin.
pub fn build_router(state: Arc<AppState>, cors_origin: &str) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/api/config", get(api::config))
        .route("/api/checks", get(api::checks_list))
        // /resend MUST precede /{id} to avoid "resend" being captured
        .route("/api/checks/resend", post(api::checks_resend_many))
        .route("/api/checks/{id}", get(api::checks_get))
        .route("/api/checks/{id}/resend", post(api::checks_resend))
        .route("/api/channels", get(api::channels_list))
        .route("/api/notifications", get(api::notifications_list))
        .route("/api/flips", get(api::flips_list))
        .route("/api/pings", get(api::pings_list))
        .layer(cors(cors_origin))
        .with_state(state)
}

fn cors(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origin.parse::<HeaderValue>() {
        Ok(value) if origin != "*" => layer.allow_origin(value),
        _ => layer.allow_origin(Any),
    }
}
