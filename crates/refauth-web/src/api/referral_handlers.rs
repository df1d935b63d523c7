use axum::extract::State;
use axum::Json;

use crate::auth::middleware::AuthUser;
use crate::dto::{ReferralLinkResponse, ReferralStatsResponse};
use crate::error::AppError;
use crate::state::AppState;

pub async fn referral_link(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Json<ReferralLinkResponse> {
    Json(ReferralLinkResponse {
        referral_link: state.flow.referral_link(&user),
    })
}

pub async fn referral_stats(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<ReferralStatsResponse>, AppError> {
    let referrals_count = state.flow.referral_stats(&user).await?;
    Ok(Json(ReferralStatsResponse { referrals_count }))
}
