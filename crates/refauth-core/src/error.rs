//! Error types for `refauth-core`.
//!
//! All fallible operations in the core library return [`CoreResult<T>`],
//! which is an alias for `Result<T, CoreError>`.

/// Unified error type for all core operations.
///
/// The `Display` text of the client-facing variants is the stable message
/// returned to HTTP callers, so changing it is a breaking change.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A required field is missing or malformed.
    #[error("{0}")]
    Validation(String),

    #[error("Email already in use")]
    EmailInUse,

    #[error("Username already in use")]
    UsernameInUse,

    /// The supplied referral code is not a well-formed code.
    #[error("Invalid referral code")]
    InvalidReferralCode,

    /// The referral code is well-formed but no user owns it.
    #[error("Referrer does not exist")]
    ReferrerNotFound,

    #[error("User not found.")]
    UserNotFound,

    /// Unknown email or wrong password. Both cases share one message.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// A bearer token is missing, malformed, expired, or names an inactive user.
    #[error("{0}")]
    Unauthorized(String),

    #[error("Invalid or expired token.")]
    InvalidResetToken,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("a user cannot refer themselves")]
    SelfReferral,

    #[error("user {0} already has a referral record")]
    DuplicateReferral(uuid::Uuid),

    #[error("referral not found: {0}")]
    ReferralNotFound(uuid::Uuid),

    /// An attempt to change a field that is fixed at creation time.
    #[error("field is immutable after creation: {0}")]
    ImmutableField(&'static str),

    /// The backing store failed for a reason unrelated to the request.
    #[error("storage error: {0}")]
    Storage(String),

    /// Hashing or token signing failed.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl CoreError {
    /// Returns `true` for errors caused by the backend rather than by the caller.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Crypto(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Convenience alias used throughout `refauth-core`.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_are_stable() {
        assert_eq!(CoreError::EmailInUse.to_string(), "Email already in use");
        assert_eq!(
            CoreError::InvalidReferralCode.to_string(),
            "Invalid referral code"
        );
        assert_eq!(
            CoreError::ReferrerNotFound.to_string(),
            "Referrer does not exist"
        );
        assert_eq!(
            CoreError::InvalidCredentials.to_string(),
            "Invalid credentials"
        );
        assert_eq!(
            CoreError::InvalidResetToken.to_string(),
            "Invalid or expired token."
        );
    }

    #[test]
    fn validation_displays_message() {
        let err = CoreError::Validation("Email is required".to_string());
        assert_eq!(err.to_string(), "Email is required");
    }

    #[test]
    fn immutable_field_names_field() {
        let err = CoreError::ImmutableField("referred_by");
        assert_eq!(
            err.to_string(),
            "field is immutable after creation: referred_by"
        );
    }

    #[test]
    fn internal_classification() {
        assert!(CoreError::Storage("disk full".into()).is_internal());
        assert!(CoreError::Crypto("bad salt".into()).is_internal());
        assert!(!CoreError::RateLimited.is_internal());
        assert!(!CoreError::UserNotFound.is_internal());
    }

    #[test]
    fn core_result_err() {
        let result: CoreResult<i32> = Err(CoreError::RateLimited);
        assert!(result.is_err());
    }
}
