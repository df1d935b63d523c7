//! Registration, login and password-reset orchestration.
//!
//! [`AuthFlow`] composes the identity store, the referral ledger, the rate
//! limiter and the token issuer. Every public operation maps one HTTP
//! endpoint; errors carry the message the endpoint returns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::cache::ExpiringStore;
use crate::error::{CoreError, CoreResult};
use crate::model::{self, NewUser, User};
use crate::notify::{Message, Notifier};
use crate::password;
use crate::rate_limit::{self, Decision, Endpoint, RateLimiter};
use crate::referral::{ReferralLedger, ReferralSettings};
use crate::sanitize::sanitize_opt;
use crate::store::IdentityStore;
use crate::token::{self, IssuedToken, TokenIssuer};

pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(24 * 3600);
pub const DEFAULT_RESET_LINK_BASE: &str = "http://127.0.0.1:8000/api/reset-password";

/// Tunables for [`AuthFlow`].
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub access_ttl: Duration,
    pub reset_max_age: Duration,
    pub rate_limit_capacity: usize,
    pub rate_limit_window: Duration,
    /// Reset links are `{reset_link_base}/{token}`.
    pub reset_link_base: String,
    pub referral: ReferralSettings,
}

impl AuthSettings {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            access_ttl: DEFAULT_ACCESS_TTL,
            reset_max_age: token::DEFAULT_RESET_MAX_AGE,
            rate_limit_capacity: rate_limit::DEFAULT_CAPACITY,
            rate_limit_window: rate_limit::DEFAULT_WINDOW,
            reset_link_base: DEFAULT_RESET_LINK_BASE.to_string(),
            referral: ReferralSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub referral_code: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PasswordReset {
    pub token: String,
    pub username: Option<String>,
    pub new_password: Option<String>,
    pub confirm_password: Option<String>,
}

/// A user together with a freshly issued bearer token.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub token: IssuedToken,
}

pub struct AuthFlow {
    store: Arc<dyn IdentityStore>,
    notifier: Arc<dyn Notifier>,
    ledger: ReferralLedger,
    limiter: RateLimiter,
    tokens: TokenIssuer,
    rate_windows: Arc<ExpiringStore<Vec<Instant>>>,
    stats_cache: Arc<ExpiringStore<u64>>,
    reset_link_base: String,
}

impl AuthFlow {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        notifier: Arc<dyn Notifier>,
        settings: AuthSettings,
    ) -> CoreResult<Self> {
        let rate_windows = Arc::new(ExpiringStore::new());
        let stats_cache = Arc::new(ExpiringStore::new());

        let ledger = ReferralLedger::new(store.clone(), stats_cache.clone(), settings.referral)?;
        let limiter = RateLimiter::new(
            rate_windows.clone(),
            settings.rate_limit_capacity,
            settings.rate_limit_window,
        );
        let tokens = TokenIssuer::new(
            &settings.jwt_secret,
            settings.access_ttl,
            settings.reset_max_age,
        );

        Ok(Self {
            store,
            notifier,
            ledger,
            limiter,
            tokens,
            rate_windows,
            stats_cache,
            reset_link_base: settings.reset_link_base.trim_end_matches('/').to_string(),
        })
    }

    /// Drops expired rate-limit windows and cached statistics.
    pub fn purge_expired(&self) {
        self.rate_windows.purge_expired();
        self.stats_cache.purge_expired();
    }

    fn check_rate(&self, endpoint: Endpoint, client: &str) -> CoreResult<()> {
        match self.limiter.check_and_record(endpoint, client) {
            Decision::Allowed => Ok(()),
            Decision::RateLimited => Err(CoreError::RateLimited),
        }
    }

    pub async fn register(&self, client: &str, input: Registration) -> CoreResult<Session> {
        self.check_rate(Endpoint::Register, client)?;

        let email = model::normalize_email(&sanitize_opt(input.email.as_deref()));
        let username = sanitize_opt(input.username.as_deref());
        let password = input.password.unwrap_or_default();
        let referral_code = sanitize_opt(input.referral_code.as_deref());

        require(&email, "Email is required")?;
        require(&username, "Username is required")?;
        require(&password, "Password is required")?;

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(CoreError::EmailInUse);
        }

        let referrer = if referral_code.is_empty() {
            None
        } else {
            Some(self.ledger.resolve_referrer(&referral_code).await?)
        };

        let password_hash = password::hash_password_blocking(password).await?;
        let new = NewUser::new(&email, &username, password_hash);

        let user = match &referrer {
            Some(referrer) => {
                let (user, _) = self
                    .ledger
                    .register_referred(new.referred_by(referrer.id))
                    .await?;
                user
            }
            None => self.store.insert_user(new).await?,
        };

        tracing::info!(
            "User registered: id={}, username={}, referred_by={:?}",
            user.id,
            user.username,
            user.referred_by
        );

        let token = self.tokens.issue_access(user.id)?;
        Ok(Session { user, token })
    }

    /// Unknown email, wrong password and inactive account all fail with the
    /// same [`CoreError::InvalidCredentials`].
    pub async fn login(&self, client: &str, email: &str, password: &str) -> CoreResult<Session> {
        self.check_rate(Endpoint::Login, client)?;

        let email = model::normalize_email(email);
        let Some(mut user) = self.store.find_user_by_email(&email).await? else {
            let password = password.to_string();
            tokio::task::spawn_blocking(move || password::verify_against_dummy(&password))
                .await
                .map_err(|e| CoreError::Crypto(e.to_string()))?;
            tracing::warn!("Failed login attempt: unknown email");
            return Err(CoreError::InvalidCredentials);
        };

        let valid =
            password::verify_password_blocking(user.password_hash.clone(), password.to_string())
                .await?;
        if !valid || !user.is_active {
            tracing::warn!("Failed login attempt for user: {}", user.id);
            return Err(CoreError::InvalidCredentials);
        }

        let now = model::now();
        self.store.record_login(user.id, now).await?;
        user.last_login = Some(now);
        tracing::info!("Login successful for user: {}", user.id);

        let token = self.tokens.issue_access(user.id)?;
        Ok(Session { user, token })
    }

    /// Sends a reset link if the email belongs to an active account.
    ///
    /// Succeeds whether or not the account exists so the endpoint does not
    /// reveal registered emails. Delivery happens in the background.
    pub async fn forgot_password(&self, email: Option<&str>) -> CoreResult<()> {
        let email = model::normalize_email(&sanitize_opt(email));
        require(&email, "Email is required")?;

        let user = match self.store.find_user_by_email(&email).await? {
            Some(user) if user.is_active => user,
            _ => {
                tracing::debug!("Password reset requested for unknown or inactive email");
                return Ok(());
            }
        };

        let token = self.tokens.issue_reset(&user)?;
        let message = Message {
            to: user.email.clone(),
            subject: "Password Reset Request".to_string(),
            body: format!(
                "Click the link to reset your password: {}/{token}",
                self.reset_link_base
            ),
        };

        let notifier = self.notifier.clone();
        let user_id = user.id;
        tokio::spawn(async move {
            if let Err(e) = notifier.send(message).await {
                tracing::error!("Failed to deliver password reset for user {user_id}: {e:#}");
            }
        });

        tracing::info!("Password reset link issued for user: {}", user.id);
        Ok(())
    }

    pub async fn reset_password(&self, input: PasswordReset) -> CoreResult<()> {
        let new_password = input.new_password.unwrap_or_default();
        let confirm_password = input.confirm_password.unwrap_or_default();
        if new_password != confirm_password {
            return Err(CoreError::Validation("Passwords do not match.".to_string()));
        }
        require(&new_password, "New password is required")?;

        let username = sanitize_opt(input.username.as_deref());
        let user = self
            .store
            .find_user_by_username(&username)
            .await?
            .ok_or(CoreError::UserNotFound)?;

        self.tokens.check_reset(&user, &input.token)?;

        let password_hash = password::hash_password_blocking(new_password).await?;
        self.store.set_password_hash(user.id, password_hash).await?;
        tracing::info!("Password reset for user: {}", user.id);
        Ok(())
    }

    /// Resolves a bearer token to an active user.
    pub async fn authenticate(&self, token: &str) -> CoreResult<User> {
        let claims = self.tokens.verify_access(token)?;
        let id = Uuid::parse_str(&claims.sub)
            .map_err(|_| CoreError::Unauthorized("Invalid or expired token".to_string()))?;

        match self.store.find_user(id).await? {
            Some(user) if user.is_active => Ok(user),
            _ => Err(CoreError::Unauthorized("Invalid or expired token".to_string())),
        }
    }

    /// Marks an account inactive. Its tokens stop authenticating and any
    /// outstanding reset token is invalidated. Deactivating twice is a no-op.
    pub async fn deactivate(&self, user_id: Uuid) -> CoreResult<()> {
        let mut user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(CoreError::UserNotFound)?;
        if !user.is_active {
            return Ok(());
        }
        user.is_active = false;
        self.store.save_user(&user).await?;
        tracing::info!("User deactivated: {}", user.id);
        Ok(())
    }

    pub fn referral_link(&self, user: &User) -> String {
        self.ledger.link(user)
    }

    pub async fn referral_stats(&self, user: &User) -> CoreResult<u64> {
        self.ledger.stats(user.id).await
    }
}

fn require(value: &str, message: &str) -> CoreResult<()> {
    if value.is_empty() {
        return Err(CoreError::Validation(message.to_string()));
    }
    Ok(())
}
