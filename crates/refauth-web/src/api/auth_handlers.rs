use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use refauth_core::{PasswordReset, Registration, Session};

use crate::auth::cookie::access_token_cookie;
use crate::auth::middleware::ClientAddr;
use crate::dto::*;
use crate::error::AppError;
use crate::state::AppState;

/// Token body plus the mirrored `access_token` cookie, which expires with
/// the token.
fn session_response(status: StatusCode, message: &'static str, session: Session) -> Response {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let max_age = session.token.expires_at.saturating_sub(now);
    let cookie = access_token_cookie(&session.token.token, max_age);
    let body = TokenResponse {
        message,
        access_token: session.token.token,
    };

    let mut response = (status, Json(body)).into_response();
    if let Some(cookie) = cookie {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

pub async fn register(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = body?;
    let session = state
        .flow
        .register(
            &client,
            Registration {
                email: body.email,
                username: body.username,
                password: body.password,
                referral_code: body.referral_code,
            },
        )
        .await?;

    Ok(session_response(
        StatusCode::CREATED,
        "User created successfully",
        session,
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = body?;
    let email = body.email.unwrap_or_default();
    let password = body.password.unwrap_or_default();

    let session = state
        .flow
        .login(&client, &email, &password)
        .await?;

    Ok(session_response(
        StatusCode::OK,
        "Login successful",
        session,
    ))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    body: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(body) = body?;
    state.flow.forgot_password(body.email.as_deref()).await?;
    Ok(Json(MessageResponse {
        message: "If an account with that email exists, a password reset link has been sent.",
    }))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(body) = body?;
    state
        .flow
        .reset_password(PasswordReset {
            token,
            username: body.username,
            new_password: body.new_password,
            confirm_password: body.confirm_password,
        })
        .await?;
    Ok(Json(MessageResponse {
        message: "Password reset successful.",
    }))
}
