//! Persistent records: users and the referrals between them.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// A registered account.
///
/// `referral_code` and `referred_by` are fixed when the record is created.
/// Stores reject any save that changes them.
#[derive(Clone, PartialEq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub referral_code: Uuid,
    pub referred_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub credits: u64,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .field("referral_code", &self.referral_code)
            .field("referred_by", &self.referred_by)
            .field("created_at", &self.created_at)
            .field("is_active", &self.is_active)
            .field("last_login", &self.last_login)
            .field("credits", &self.credits)
            .finish()
    }
}

/// Input for creating a [`User`]. The store assigns the id and referral code.
#[derive(Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub referred_by: Option<Uuid>,
}

impl NewUser {
    /// Normalises `email` and trims `username`.
    pub fn new(email: &str, username: &str, password_hash: String) -> Self {
        Self {
            email: normalize_email(email),
            username: username.trim().to_string(),
            password_hash,
            referred_by: None,
        }
    }

    #[must_use]
    pub fn referred_by(mut self, referrer: Uuid) -> Self {
        self.referred_by = Some(referrer);
        self
    }

    /// Materialises the record with a fresh id and referral code.
    pub fn into_user(self, now: DateTime<Utc>) -> User {
        User {
            id: Uuid::new_v4(),
            email: self.email,
            username: self.username,
            password_hash: self.password_hash,
            referral_code: Uuid::new_v4(),
            referred_by: self.referred_by,
            created_at: now,
            is_active: true,
            last_login: None,
            credits: 0,
        }
    }
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("email", &self.email)
            .field("username", &self.username)
            .field("referred_by", &self.referred_by)
            .finish_non_exhaustive()
    }
}

/// Current time at the millisecond precision the stores persist.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Canonical form used for storage and lookup: trimmed and lower-cased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    Pending,
    Successful,
}

impl ReferralStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Successful => "successful",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "successful" => Some(Self::Successful),
            _ => None,
        }
    }
}

/// One referrer → referred-user relationship. At most one per referred user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Referral {
    pub id: Uuid,
    pub referrer: Uuid,
    pub referred_user: Uuid,
    pub status: ReferralStatus,
    pub reward: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Referral {
    /// A new pending referral. Fails with [`CoreError::SelfReferral`] when
    /// both ends are the same user.
    pub fn pending(referrer: Uuid, referred_user: Uuid, now: DateTime<Utc>) -> CoreResult<Self> {
        if referrer == referred_user {
            return Err(CoreError::SelfReferral);
        }
        Ok(Self {
            id: Uuid::new_v4(),
            referrer,
            referred_user,
            status: ReferralStatus::Pending,
            reward: None,
            created_at: now,
        })
    }

    /// Marks the referral successful and records `reward`.
    ///
    /// Returns the credit owed to the referrer, or `None` if the referral
    /// was already successful. Callers must only credit on `Some`.
    pub fn complete(&mut self, reward: u64) -> Option<u64> {
        match self.status {
            ReferralStatus::Successful => None,
            ReferralStatus::Pending => {
                self.status = ReferralStatus::Successful;
                self.reward = Some(reward);
                Some(reward)
            }
        }
    }
}
