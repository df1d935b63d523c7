mod auth_handlers;
mod referral_handlers;

use axum::routing::{get, post};
use axum::Json;
use axum::Router;

use crate::dto::HealthResponse;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/register", post(auth_handlers::register))
        .route("/login", post(auth_handlers::login))
        .route("/forgot-password", post(auth_handlers::forgot_password))
        .route("/reset-password/{token}", post(auth_handlers::reset_password))
        .route("/referral-link", get(referral_handlers::referral_link))
        .route("/referral-stats", get(referral_handlers::referral_stats))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
