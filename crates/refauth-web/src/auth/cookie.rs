use axum::http::HeaderValue;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// `Set-Cookie` value mirroring a bearer token, expiring with it.
pub fn access_token_cookie(token: &str, max_age_secs: u64) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{ACCESS_TOKEN_COOKIE}={token}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={max_age_secs}"
    ))
    .ok()
}
