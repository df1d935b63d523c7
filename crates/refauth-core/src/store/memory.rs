//! In-process identity store.
//!
//! Both tables sit behind one mutex. Every operation validates everything it
//! needs before it mutates anything, so a failed call leaves no partial
//! writes.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::IdentityStore;
use crate::error::{CoreError, CoreResult};
use crate::model::{self, NewUser, Referral, ReferralStatus, User};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    referrals: HashMap<Uuid, Referral>,
}

impl Tables {
    /// Checks the unique columns of `candidate` against every other user.
    fn check_unique(&self, id: Option<Uuid>, email: &str, username: &str, code: Option<Uuid>) -> CoreResult<()> {
        for user in self.users.values() {
            if Some(user.id) == id {
                continue;
            }
            if user.email == email {
                return Err(CoreError::EmailInUse);
            }
            if user.username == username {
                return Err(CoreError::UsernameInUse);
            }
            if Some(user.referral_code) == code {
                return Err(CoreError::Storage("referral code collision".to_string()));
            }
        }
        Ok(())
    }

    fn insert_new(&mut self, new: NewUser) -> CoreResult<User> {
        self.check_unique(None, &new.email, &new.username, None)?;
        let user = new.into_user(model::now());
        self.check_unique(Some(user.id), &user.email, &user.username, Some(user.referral_code))?;
        Ok(user)
    }

    fn referral_for(&self, referred_user: Uuid) -> Option<&Referral> {
        self.referrals
            .values()
            .find(|r| r.referred_user == referred_user)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn insert_user(&self, new: NewUser) -> CoreResult<User> {
        let mut tables = self.tables.lock().await;
        let user = tables.insert_new(new)?;
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn insert_referred_user(&self, new: NewUser, reward: u64) -> CoreResult<(User, Referral)> {
        let referrer_id = new.referred_by.ok_or(CoreError::ReferrerNotFound)?;

        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&referrer_id) {
            return Err(CoreError::ReferrerNotFound);
        }
        let user = tables.insert_new(new)?;
        let mut referral = Referral::pending(referrer_id, user.id, user.created_at)?;
        let credit = referral.complete(reward).unwrap_or_default();

        let Tables { users, referrals } = &mut *tables;
        if let Some(referrer) = users.get_mut(&referrer_id) {
            referrer.credits += credit;
        }
        users.insert(user.id, user.clone());
        referrals.insert(referral.id, referral.clone());

        Ok((user, referral))
    }

    async fn find_user(&self, id: Uuid) -> CoreResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> CoreResult<Option<User>> {
        let email = model::normalize_email(email);
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> CoreResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_user_by_referral_code(&self, code: Uuid) -> CoreResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.referral_code == code)
            .cloned())
    }

    async fn save_user(&self, user: &User) -> CoreResult<()> {
        let mut tables = self.tables.lock().await;
        let stored = tables.users.get(&user.id).ok_or(CoreError::UserNotFound)?;
        if stored.referred_by != user.referred_by {
            return Err(CoreError::ImmutableField("referred_by"));
        }
        if stored.referral_code != user.referral_code {
            return Err(CoreError::ImmutableField("referral_code"));
        }
        tables.check_unique(Some(user.id), &user.email, &user.username, None)?;

        if let Some(stored) = tables.users.get_mut(&user.id) {
            stored.email = user.email.clone();
            stored.username = user.username.clone();
            stored.is_active = user.is_active;
        }
        Ok(())
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<()> {
        let mut tables = self.tables.lock().await;
        let user = tables.users.get_mut(&id).ok_or(CoreError::UserNotFound)?;
        user.last_login = Some(at);
        Ok(())
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: String) -> CoreResult<()> {
        let mut tables = self.tables.lock().await;
        let user = tables.users.get_mut(&id).ok_or(CoreError::UserNotFound)?;
        user.password_hash = password_hash;
        Ok(())
    }

    async fn insert_referral(&self, referrer: Uuid, referred_user: Uuid) -> CoreResult<Referral> {
        let referral = Referral::pending(referrer, referred_user, model::now())?;

        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&referrer) {
            return Err(CoreError::ReferrerNotFound);
        }
        if !tables.users.contains_key(&referred_user) {
            return Err(CoreError::UserNotFound);
        }
        if tables.referral_for(referred_user).is_some() {
            return Err(CoreError::DuplicateReferral(referred_user));
        }
        tables.referrals.insert(referral.id, referral.clone());
        Ok(referral)
    }

    async fn complete_referral(&self, id: Uuid, reward: u64) -> CoreResult<Referral> {
        let mut tables = self.tables.lock().await;
        let Tables { users, referrals } = &mut *tables;

        let referral = referrals
            .get_mut(&id)
            .ok_or(CoreError::ReferralNotFound(id))?;
        if let Some(credit) = referral.complete(reward) {
            if let Some(referrer) = users.get_mut(&referral.referrer) {
                referrer.credits += credit;
            }
        }
        Ok(referral.clone())
    }

    async fn find_referral_for(&self, referred_user: Uuid) -> CoreResult<Option<Referral>> {
        Ok(self.tables.lock().await.referral_for(referred_user).cloned())
    }

    async fn count_referrals(&self, referrer: Uuid, status: ReferralStatus) -> CoreResult<u64> {
        let tables = self.tables.lock().await;
        let count = tables
            .referrals
            .values()
            .filter(|r| r.referrer == referrer && r.status == status)
            .count();
        Ok(count as u64)
    }
}
