//! Identity store: users plus the referral ledger's records.
//!
//! Backends enforce the uniqueness of email, username and referral code
//! themselves, so two concurrent registrations with the same email yield
//! exactly one user and one [`CoreError::EmailInUse`](crate::CoreError::EmailInUse).

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreResult;
use crate::model::{NewUser, Referral, ReferralStatus, User};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage backend for users and referrals.
///
/// Implementations must be thread-safe (`Send + Sync`) as they are shared
/// by every request handler.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Inserts a user. Conflicts map to `EmailInUse` / `UsernameInUse`.
    async fn insert_user(&self, new: NewUser) -> CoreResult<User>;

    /// Inserts a referred user together with a completed referral and the
    /// referrer's credit, all or nothing.
    ///
    /// `new.referred_by` names the referrer; `None` or an unknown id fails
    /// with `ReferrerNotFound`.
    async fn insert_referred_user(&self, new: NewUser, reward: u64) -> CoreResult<(User, Referral)>;

    async fn find_user(&self, id: Uuid) -> CoreResult<Option<User>>;

    /// Looks up by normalised email.
    async fn find_user_by_email(&self, email: &str) -> CoreResult<Option<User>>;

    async fn find_user_by_username(&self, username: &str) -> CoreResult<Option<User>>;

    async fn find_user_by_referral_code(&self, code: Uuid) -> CoreResult<Option<User>>;

    /// Persists the profile fields of `user`: email, username and the
    /// active flag.
    ///
    /// Fails with `ImmutableField` if `referred_by` or `referral_code`
    /// differ from the stored record. Credits, password hash and last login
    /// are never written from `user`; they change only through their own
    /// operations, so saving a stale copy cannot undo them.
    async fn save_user(&self, user: &User) -> CoreResult<()>;

    /// Sets `last_login` to `at`.
    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<()>;

    /// Replaces the stored password hash.
    async fn set_password_hash(&self, id: Uuid, password_hash: String) -> CoreResult<()>;

    /// Records a pending referral.
    async fn insert_referral(&self, referrer: Uuid, referred_user: Uuid) -> CoreResult<Referral>;

    /// Moves a referral to `Successful` and credits the referrer.
    ///
    /// Idempotent: completing an already successful referral returns it
    /// unchanged and credits nothing.
    async fn complete_referral(&self, id: Uuid, reward: u64) -> CoreResult<Referral>;

    async fn find_referral_for(&self, referred_user: Uuid) -> CoreResult<Option<Referral>>;

    async fn count_referrals(&self, referrer: Uuid, status: ReferralStatus) -> CoreResult<u64>;
}

/// Behaviour every backend must share. Each backend's test module runs these.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;
    use crate::error::CoreError;

    fn new_user(tag: &str) -> NewUser {
        NewUser::new(&format!("{tag}@example.com"), tag, format!("hash-{tag}"))
    }

    pub async fn insert_and_find(store: &dyn IdentityStore) {
        let user = store.insert_user(new_user("alice")).await.unwrap();
        assert!(user.referred_by.is_none());
        assert!(user.is_active);

        let by_id = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(by_id, user);
        let by_email = store
            .find_user_by_email("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, user.id);
        let by_name = store.find_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
        let by_code = store
            .find_user_by_referral_code(user.referral_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_code.id, user.id);

        assert!(store.find_user(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store
            .find_user_by_email("nobody@example.com")
            .await
            .unwrap()
            .is_none());
    }

    pub async fn duplicate_email_rejected(store: &dyn IdentityStore) {
        store.insert_user(new_user("bob")).await.unwrap();
        let dup = NewUser::new("bob@example.com", "bobby", "h".into());
        let err = store.insert_user(dup).await.unwrap_err();
        assert!(matches!(err, CoreError::EmailInUse), "got {err:?}");
    }

    pub async fn duplicate_username_rejected(store: &dyn IdentityStore) {
        store.insert_user(new_user("carol")).await.unwrap();
        let dup = NewUser::new("other@example.com", "carol", "h".into());
        let err = store.insert_user(dup).await.unwrap_err();
        assert!(matches!(err, CoreError::UsernameInUse), "got {err:?}");
    }

    pub async fn referred_registration_is_complete(store: &dyn IdentityStore) {
        let referrer = store.insert_user(new_user("ref")).await.unwrap();
        let (user, referral) = store
            .insert_referred_user(new_user("newbie").referred_by(referrer.id), 10)
            .await
            .unwrap();

        assert_eq!(user.referred_by, Some(referrer.id));
        assert_eq!(referral.referrer, referrer.id);
        assert_eq!(referral.referred_user, user.id);
        assert_eq!(referral.status, ReferralStatus::Successful);
        assert_eq!(referral.reward, Some(10));

        let referrer = store.find_user(referrer.id).await.unwrap().unwrap();
        assert_eq!(referrer.credits, 10);
        let stored = store.find_referral_for(user.id).await.unwrap().unwrap();
        assert_eq!(stored, referral);
    }

    pub async fn referred_registration_is_atomic(store: &dyn IdentityStore) {
        let referrer = store.insert_user(new_user("dave")).await.unwrap();
        // Email collides with the referrer: nothing may be written.
        let dup = NewUser::new("dave@example.com", "dave2", "h".into()).referred_by(referrer.id);
        let err = store.insert_referred_user(dup, 10).await.unwrap_err();
        assert!(matches!(err, CoreError::EmailInUse), "got {err:?}");

        assert!(store.find_user_by_username("dave2").await.unwrap().is_none());
        let referrer = store.find_user(referrer.id).await.unwrap().unwrap();
        assert_eq!(referrer.credits, 0);
        assert_eq!(
            store
                .count_referrals(referrer.id, ReferralStatus::Successful)
                .await
                .unwrap(),
            0
        );
    }

    pub async fn unknown_referrer_rejected(store: &dyn IdentityStore) {
        let err = store
            .insert_referred_user(new_user("erin").referred_by(Uuid::new_v4()), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ReferrerNotFound), "got {err:?}");
        assert!(store.find_user_by_username("erin").await.unwrap().is_none());
    }

    pub async fn save_updates_profile_fields(store: &dyn IdentityStore) {
        let mut user = store.insert_user(new_user("frank")).await.unwrap();
        user.username = "franklin".into();
        user.is_active = false;
        // Not profile fields: ignored by save_user.
        user.password_hash = "ignored".into();
        user.credits = 99;
        store.save_user(&user).await.unwrap();

        let stored = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.username, "franklin");
        assert!(!stored.is_active);
        assert_eq!(stored.password_hash, "hash-frank");
        assert_eq!(stored.credits, 0);
    }

    pub async fn targeted_writes(store: &dyn IdentityStore) {
        let user = store.insert_user(new_user("fiona")).await.unwrap();
        let at = crate::model::now();
        store.record_login(user.id, at).await.unwrap();
        store.set_password_hash(user.id, "new-hash".into()).await.unwrap();

        let stored = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.last_login, Some(at));
        assert_eq!(stored.password_hash, "new-hash");

        let missing = Uuid::new_v4();
        assert!(matches!(
            store.record_login(missing, at).await,
            Err(CoreError::UserNotFound)
        ));
        assert!(matches!(
            store.set_password_hash(missing, "h".into()).await,
            Err(CoreError::UserNotFound)
        ));
    }

    pub async fn stale_copy_keeps_referral_credit(store: &dyn IdentityStore) {
        let referrer = store.insert_user(new_user("stale")).await.unwrap();
        let snapshot = store.find_user(referrer.id).await.unwrap().unwrap();

        store
            .insert_referred_user(new_user("fresh").referred_by(referrer.id), 10)
            .await
            .unwrap();

        // What login and deactivation do with a copy read before the credit.
        store.record_login(snapshot.id, crate::model::now()).await.unwrap();
        store.save_user(&snapshot).await.unwrap();

        let stored = store.find_user(referrer.id).await.unwrap().unwrap();
        assert_eq!(stored.credits, 10);
        assert_eq!(
            store
                .count_referrals(referrer.id, ReferralStatus::Successful)
                .await
                .unwrap(),
            1
        );
    }

    pub async fn concurrent_duplicate_emails_yield_one_user(store: std::sync::Arc<dyn IdentityStore>) {
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert_user(NewUser::new("race@example.com", &format!("racer{i}"), "h".into()))
                    .await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(matches!(e, CoreError::EmailInUse), "got {e:?}"),
            }
        }
        assert_eq!(ok, 1);
        assert!(store
            .find_user_by_email("race@example.com")
            .await
            .unwrap()
            .is_some());
    }

    pub async fn referred_by_is_immutable(store: &dyn IdentityStore) {
        let a = store.insert_user(new_user("gina")).await.unwrap();
        let mut b = store.insert_user(new_user("hank")).await.unwrap();
        b.referred_by = Some(a.id);
        let err = store.save_user(&b).await.unwrap_err();
        assert!(matches!(err, CoreError::ImmutableField("referred_by")), "got {err:?}");

        let mut b = store.find_user(b.id).await.unwrap().unwrap();
        b.referral_code = Uuid::new_v4();
        let err = store.save_user(&b).await.unwrap_err();
        assert!(matches!(err, CoreError::ImmutableField("referral_code")), "got {err:?}");
    }

    pub async fn complete_referral_is_idempotent(store: &dyn IdentityStore) {
        let referrer = store.insert_user(new_user("ivy")).await.unwrap();
        let referred = store.insert_user(new_user("jack")).await.unwrap();

        let pending = store.insert_referral(referrer.id, referred.id).await.unwrap();
        assert_eq!(pending.status, ReferralStatus::Pending);
        assert_eq!(pending.reward, None);

        let first = store.complete_referral(pending.id, 10).await.unwrap();
        let second = store.complete_referral(pending.id, 10).await.unwrap();
        assert_eq!(first.status, ReferralStatus::Successful);
        assert_eq!(second.reward, Some(10));

        let referrer = store.find_user(referrer.id).await.unwrap().unwrap();
        assert_eq!(referrer.credits, 10);
    }

    pub async fn referral_constraints(store: &dyn IdentityStore) {
        let a = store.insert_user(new_user("kate")).await.unwrap();
        let b = store.insert_user(new_user("liam")).await.unwrap();

        let err = store.insert_referral(a.id, a.id).await.unwrap_err();
        assert!(matches!(err, CoreError::SelfReferral), "got {err:?}");

        store.insert_referral(a.id, b.id).await.unwrap();
        let err = store.insert_referral(a.id, b.id).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateReferral(id) if id == b.id), "got {err:?}");

        let err = store.complete_referral(Uuid::new_v4(), 10).await.unwrap_err();
        assert!(matches!(err, CoreError::ReferralNotFound(_)), "got {err:?}");
    }

    pub async fn count_by_status(store: &dyn IdentityStore) {
        let referrer = store.insert_user(new_user("mona")).await.unwrap();
        for i in 0..3 {
            let tag = format!("succ{i}");
            store
                .insert_referred_user(new_user(&tag).referred_by(referrer.id), 10)
                .await
                .unwrap();
        }
        let pending_user = store.insert_user(new_user("pend")).await.unwrap();
        store
            .insert_referral(referrer.id, pending_user.id)
            .await
            .unwrap();

        assert_eq!(
            store
                .count_referrals(referrer.id, ReferralStatus::Successful)
                .await
                .unwrap(),
            3
        );
        assert_eq!(
            store
                .count_referrals(referrer.id, ReferralStatus::Pending)
                .await
                .unwrap(),
            1
        );
    }
}
