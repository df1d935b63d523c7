//! Referral ledger: code resolution, completion, links and statistics.

use std::sync::Arc;
use std::time::Duration;

use url::Url;
use uuid::Uuid;

use crate::cache::ExpiringStore;
use crate::error::{CoreError, CoreResult};
use crate::model::{NewUser, Referral, ReferralStatus, User};
use crate::store::IdentityStore;

pub const DEFAULT_REWARD: u64 = 10;
pub const DEFAULT_STATS_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_LINK_BASE: &str = "http://127.0.0.1:8000/api/register";

#[derive(Debug, Clone)]
pub struct ReferralSettings {
    /// Credit granted to a referrer per successful referral.
    pub reward: u64,
    /// How long a computed referral count may be served from cache.
    pub stats_ttl: Duration,
    /// Registration URL that referral links point at.
    pub link_base: String,
}

impl Default for ReferralSettings {
    fn default() -> Self {
        Self {
            reward: DEFAULT_REWARD,
            stats_ttl: DEFAULT_STATS_TTL,
            link_base: DEFAULT_LINK_BASE.to_string(),
        }
    }
}

pub struct ReferralLedger {
    store: Arc<dyn IdentityStore>,
    stats_cache: Arc<ExpiringStore<u64>>,
    reward: u64,
    stats_ttl: Duration,
    link_base: Url,
}

impl ReferralLedger {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        stats_cache: Arc<ExpiringStore<u64>>,
        settings: ReferralSettings,
    ) -> CoreResult<Self> {
        let link_base = Url::parse(&settings.link_base).map_err(|e| {
            CoreError::Validation(format!("invalid referral link base {:?}: {e}", settings.link_base))
        })?;
        Ok(Self {
            store,
            stats_cache,
            reward: settings.reward,
            stats_ttl: settings.stats_ttl,
            link_base,
        })
    }

    /// Parses a referral code. Codes are UUIDs in any standard textual form.
    pub fn parse_code(code: &str) -> CoreResult<Uuid> {
        Uuid::parse_str(code.trim()).map_err(|_| CoreError::InvalidReferralCode)
    }

    /// Resolves a code to its owner.
    pub async fn resolve_referrer(&self, code: &str) -> CoreResult<User> {
        let code = Self::parse_code(code)?;
        self.store
            .find_user_by_referral_code(code)
            .await?
            .ok_or(CoreError::ReferrerNotFound)
    }

    /// Creates a referred user and its completed referral in one transaction.
    pub async fn register_referred(&self, new: NewUser) -> CoreResult<(User, Referral)> {
        let (user, referral) = self.store.insert_referred_user(new, self.reward).await?;
        self.invalidate_stats(referral.referrer);
        tracing::info!(
            "Referral completed: referrer={}, referred={}, reward={}",
            referral.referrer,
            referral.referred_user,
            self.reward
        );
        Ok((user, referral))
    }

    /// Completes a pending referral. Completing a successful one is a no-op.
    pub async fn complete(&self, referral_id: Uuid) -> CoreResult<Referral> {
        let referral = self.store.complete_referral(referral_id, self.reward).await?;
        self.invalidate_stats(referral.referrer);
        Ok(referral)
    }

    pub fn link(&self, user: &User) -> String {
        let mut url = self.link_base.clone();
        url.query_pairs_mut()
            .append_pair("referral_code", &user.referral_code.to_string());
        url.to_string()
    }

    /// Number of successful referrals made by `user_id`.
    ///
    /// Served from cache for up to the configured TTL, so a count may lag
    /// behind the ledger by that long unless the entry was invalidated.
    pub async fn stats(&self, user_id: Uuid) -> CoreResult<u64> {
        let key = stats_key(user_id);
        if let Some(count) = self.stats_cache.get(&key) {
            tracing::debug!("Referral stats cache hit: user={user_id}");
            return Ok(count);
        }

        let count = self
            .store
            .count_referrals(user_id, ReferralStatus::Successful)
            .await?;
        self.stats_cache.set(key, count, self.stats_ttl);
        Ok(count)
    }

    pub fn invalidate_stats(&self, user_id: Uuid) {
        self.stats_cache.remove(&stats_key(user_id));
    }
}

fn stats_key(user_id: Uuid) -> String {
    format!("referrals_count_{user_id}")
}
