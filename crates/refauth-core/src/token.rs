//! Bearer tokens and password-reset tokens.
//!
//! Both are HS256 JWTs signed with the same secret. A reset token carries a
//! fingerprint of the user's current credential state, so it stops
//! verifying as soon as the password changes or the user logs in again.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::model::User;

const RESET_PURPOSE: &str = "password_reset";

/// Three days, matching the usual web-framework default for reset links.
pub const DEFAULT_RESET_MAX_AGE: Duration = Duration::from_secs(3 * 24 * 3600);

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub jti: String,
    pub iat: u64,
    pub exp: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResetClaims {
    sub: String,
    purpose: String,
    fp: String,
    iat: u64,
    exp: u64,
}

/// A freshly signed bearer token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: u64,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    reset_max_age: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, access_ttl: Duration, reset_max_age: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
            reset_max_age,
        }
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation
    }

    pub fn issue_access(&self, user_id: Uuid) -> CoreResult<IssuedToken> {
        let now = now_secs();
        let expires_at = now.saturating_add(self.access_ttl.as_secs());
        let claims = Claims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: expires_at,
        };

        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| CoreError::Crypto(format!("Failed to sign token: {e}")))?;

        Ok(IssuedToken { token, expires_at })
    }

    pub fn verify_access(&self, token: &str) -> CoreResult<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &Self::validation())
            .map_err(|_| CoreError::Unauthorized("Invalid or expired token".to_string()))?;
        Ok(data.claims)
    }

    pub fn issue_reset(&self, user: &User) -> CoreResult<String> {
        self.issue_reset_at(user, now_secs())
    }

    /// Signs a reset token as if issued at `issued_at` (unix seconds).
    pub fn issue_reset_at(&self, user: &User, issued_at: u64) -> CoreResult<String> {
        let claims = ResetClaims {
            sub: user.id.to_string(),
            purpose: RESET_PURPOSE.to_string(),
            fp: fingerprint(user),
            iat: issued_at,
            exp: issued_at.saturating_add(self.reset_max_age.as_secs()),
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| CoreError::Crypto(format!("Failed to sign reset token: {e}")))
    }

    /// Succeeds only if `token` was issued for `user` in its current state
    /// and has not outlived the configured max age.
    pub fn check_reset(&self, user: &User, token: &str) -> CoreResult<()> {
        let data = decode::<ResetClaims>(token, &self.decoding, &Self::validation())
            .map_err(|_| CoreError::InvalidResetToken)?;
        let claims = data.claims;

        if claims.purpose != RESET_PURPOSE || claims.sub != user.id.to_string() {
            return Err(CoreError::InvalidResetToken);
        }
        if !constant_time_eq(claims.fp.as_bytes(), fingerprint(user).as_bytes()) {
            return Err(CoreError::InvalidResetToken);
        }
        Ok(())
    }
}

fn now_secs() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}

fn fingerprint(user: &User) -> String {
    let last_login = user
        .last_login
        .map(|t| t.timestamp().to_string())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(user.id.as_bytes());
    hasher.update(user.password_hash.as_bytes());
    hasher.update(last_login.as_bytes());
    hasher.update([u8::from(user.is_active)]);
    format!("{:x}", hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
