use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use refauth_core::{AuthSettings, ReferralSettings};
use serde::Deserialize;

/// Referral counts may be served from cache for at most this long.
const MAX_STATS_CACHE_TTL_SECONDS: u64 = 60;
/// Access tokens live for at most a year.
const MAX_JWT_TTL_HOURS: u64 = 24 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub referral: ReferralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub tls: TlsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_jwt_ttl_hours")]
    pub jwt_ttl_hours: u64,
    #[serde(default = "default_reset_max_age")]
    pub reset_token_max_age_seconds: u64,
    #[serde(default = "default_reset_link_base")]
    pub reset_link_base: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: usize,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferralConfig {
    #[serde(default = "default_reward")]
    pub reward: u64,
    #[serde(default = "default_stats_cache_ttl")]
    pub stats_cache_ttl_seconds: u64,
    #[serde(default = "default_link_base")]
    pub link_base: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// `sqlite:` URL. Without one, users live in process memory.
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// JSON webhook that relays mail. Without one, mail is written to the log.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_from_address")]
    pub from_address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_ttl_hours: default_jwt_ttl_hours(),
            reset_token_max_age_seconds: default_reset_max_age(),
            reset_link_base: default_reset_link_base(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window_seconds: default_window_seconds(),
        }
    }
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            reward: default_reward(),
            stats_cache_ttl_seconds: default_stats_cache_ttl(),
            link_base: default_link_base(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            from_address: default_from_address(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            referral: ReferralConfig::default(),
            storage: StorageConfig::default(),
            mail: MailConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}
fn default_jwt_ttl_hours() -> u64 { 24 }
fn default_reset_max_age() -> u64 { 3 * 24 * 3600 }
fn default_reset_link_base() -> String { "http://127.0.0.1:8000/api/reset-password".to_string() }
fn default_requests_per_window() -> usize { 5 }
fn default_window_seconds() -> u64 { 60 }
fn default_reward() -> u64 { 10 }
fn default_stats_cache_ttl() -> u64 { 60 }
fn default_link_base() -> String { "http://127.0.0.1:8000/api/register".to_string() }
fn default_from_address() -> String { "noreply@localhost".to_string() }

impl ServerConfig {
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("REFAUTH_CONFIG").map(PathBuf::from).ok();

        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(&path)?;
            Self::from_toml(&contents)?
        } else {
            ServerConfig::default()
        };

        if let Ok(addr) = std::env::var("REFAUTH_BIND_ADDR") {
            config.bind_addr = addr.parse()?;
        }
        if let Ok(secret) = std::env::var("REFAUTH_JWT_SECRET") {
            config.auth.jwt_secret = secret;
        }
        if let Ok(url) = std::env::var("REFAUTH_DATABASE_URL") {
            config.storage.database_url = Some(url);
        }
        if let Ok(url) = std::env::var("REFAUTH_MAIL_WEBHOOK_URL") {
            config.mail.webhook_url = Some(url);
        }
        if let Ok(base) = std::env::var("REFAUTH_LINK_BASE") {
            config.referral.link_base = base;
        }
        if let Ok(cert) = std::env::var("REFAUTH_TLS_CERT") {
            config.tls.cert_path = Some(cert);
        }
        if let Ok(key) = std::env::var("REFAUTH_TLS_KEY") {
            config.tls.key_path = Some(key);
        }

        config.finalize()?;
        Ok(config)
    }

    /// Fills in a missing secret and rejects unsafe values.
    pub fn finalize(&mut self) -> anyhow::Result<()> {
        if self.auth.jwt_secret.is_empty() {
            self.auth.jwt_secret = format!("{}{}", uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
            tracing::warn!(
                "No JWT secret configured. Generated random secret (tokens will not survive a restart)."
            );
        }

        const WEAK_SECRETS: &[&str] = &[
            "change-me-to-a-random-secret",
            "secret",
            "password",
            "jwt-secret",
        ];
        if WEAK_SECRETS.iter().any(|&w| self.auth.jwt_secret == w) {
            anyhow::bail!(
                "JWT secret matches a known weak/placeholder value. \
                 Set a strong random secret via REFAUTH_JWT_SECRET environment variable."
            );
        }
        if self.auth.jwt_secret.len() < 32 {
            tracing::warn!(
                "JWT secret is shorter than 32 characters. \
                 Consider using a stronger secret via REFAUTH_JWT_SECRET."
            );
        }

        if !(1..=MAX_JWT_TTL_HOURS).contains(&self.auth.jwt_ttl_hours) {
            anyhow::bail!("auth.jwt_ttl_hours must be between 1 and {MAX_JWT_TTL_HOURS}");
        }
        if self.auth.reset_token_max_age_seconds == 0 {
            anyhow::bail!("auth.reset_token_max_age_seconds must be at least 1");
        }
        if self.rate_limit.requests_per_window == 0 {
            anyhow::bail!("rate_limit.requests_per_window must be at least 1");
        }
        if self.rate_limit.window_seconds == 0 {
            anyhow::bail!("rate_limit.window_seconds must be at least 1");
        }

        if self.referral.stats_cache_ttl_seconds > MAX_STATS_CACHE_TTL_SECONDS {
            tracing::warn!(
                "referral.stats_cache_ttl_seconds={} exceeds {MAX_STATS_CACHE_TTL_SECONDS}; clamping.",
                self.referral.stats_cache_ttl_seconds
            );
            self.referral.stats_cache_ttl_seconds = MAX_STATS_CACHE_TTL_SECONDS;
        }

        Ok(())
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls.cert_path.is_some() && self.tls.key_path.is_some()
    }

    pub fn auth_settings(&self) -> AuthSettings {
        let mut settings = AuthSettings::new(self.auth.jwt_secret.clone());
        settings.access_ttl = Duration::from_secs(self.auth.jwt_ttl_hours.saturating_mul(3600));
        settings.reset_max_age = Duration::from_secs(self.auth.reset_token_max_age_seconds);
        settings.reset_link_base = self.auth.reset_link_base.clone();
        settings.rate_limit_capacity = self.rate_limit.requests_per_window;
        settings.rate_limit_window = Duration::from_secs(self.rate_limit.window_seconds);
        settings.referral = ReferralSettings {
            reward: self.referral.reward,
            stats_ttl: Duration::from_secs(self.referral.stats_cache_ttl_seconds),
            link_base: self.referral.link_base.clone(),
        };
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config.bind_addr, default_bind_addr());
        assert_eq!(config.rate_limit.requests_per_window, 5);
        assert_eq!(config.rate_limit.window_seconds, 60);
        assert_eq!(config.referral.reward, 10);
        assert!(config.storage.database_url.is_none());
        assert!(!config.tls_enabled());
    }

    #[test]
    fn toml_sections_override_defaults() {
        let config = ServerConfig::from_toml(
            r#"
            bind_addr = "0.0.0.0:9000"

            [auth]
            jwt_secret = "0123456789abcdef0123456789abcdef"
            jwt_ttl_hours = 2

            [rate_limit]
            requests_per_window = 3

            [referral]
            reward = 25
            link_base = "https://example.com/join"

            [storage]
            database_url = "sqlite:/var/lib/refauth/refauth.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.auth.jwt_ttl_hours, 2);
        assert_eq!(config.rate_limit.requests_per_window, 3);
        assert_eq!(config.rate_limit.window_seconds, 60);

        let settings = config.auth_settings();
        assert_eq!(settings.access_ttl, Duration::from_secs(7200));
        assert_eq!(settings.rate_limit_capacity, 3);
        assert_eq!(settings.referral.reward, 25);
        assert_eq!(settings.referral.link_base, "https://example.com/join");
    }

    #[test]
    fn finalize_generates_missing_secret() {
        let mut config = ServerConfig::default();
        config.finalize().unwrap();
        assert!(config.auth.jwt_secret.len() >= 32);
    }

    #[test]
    fn finalize_rejects_weak_secret() {
        let mut config = ServerConfig::default();
        config.auth.jwt_secret = "secret".to_string();
        assert!(config.finalize().is_err());
    }

    #[test]
    fn finalize_clamps_stats_ttl() {
        let mut config = ServerConfig::default();
        config.auth.jwt_secret = "0123456789abcdef0123456789abcdef".to_string();
        config.referral.stats_cache_ttl_seconds = 600;
        config.finalize().unwrap();
        assert_eq!(config.referral.stats_cache_ttl_seconds, 60);
    }

    #[test]
    fn finalize_rejects_out_of_range_ttl() {
        for hours in [0, MAX_JWT_TTL_HOURS + 1, u64::MAX] {
            let mut config = ServerConfig::default();
            config.auth.jwt_secret = "0123456789abcdef0123456789abcdef".to_string();
            config.auth.jwt_ttl_hours = hours;
            assert!(config.finalize().is_err(), "jwt_ttl_hours={hours}");
        }
    }

    #[test]
    fn finalize_rejects_zero_window() {
        let mut config = ServerConfig::default();
        config.auth.jwt_secret = "0123456789abcdef0123456789abcdef".to_string();
        config.rate_limit.window_seconds = 0;
        assert!(config.finalize().is_err());
    }

    #[test]
    fn auth_settings_saturates_huge_ttl() {
        let mut config = ServerConfig::default();
        config.auth.jwt_ttl_hours = u64::MAX;
        assert_eq!(config.auth_settings().access_ttl, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn finalize_rejects_zero_capacity() {
        let mut config = ServerConfig::default();
        config.auth.jwt_secret = "0123456789abcdef0123456789abcdef".to_string();
        config.rate_limit.requests_per_window = 0;
        assert!(config.finalize().is_err());
    }
}
