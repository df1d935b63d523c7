//! SQLite-backed identity store.
//!
//! Uniqueness is enforced by `UNIQUE` indexes; constraint violations are
//! translated to the matching conflict errors. Multi-row writes run inside a
//! single transaction.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite, SqliteConnection};
use tracing::info;
use uuid::Uuid;

use super::IdentityStore;
use crate::error::{CoreError, CoreResult};
use crate::model::{self, NewUser, Referral, ReferralStatus, User};

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY NOT NULL,
        email TEXT NOT NULL UNIQUE,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        referral_code TEXT NOT NULL UNIQUE,
        referred_by TEXT REFERENCES users(id) ON DELETE SET NULL,
        created_at INTEGER NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        last_login INTEGER,
        credits INTEGER NOT NULL DEFAULT 0 CHECK (credits >= 0)
    )",
    "CREATE TABLE IF NOT EXISTS referrals (
        id TEXT PRIMARY KEY NOT NULL,
        referrer_id TEXT NOT NULL REFERENCES users(id),
        referred_user_id TEXT NOT NULL UNIQUE REFERENCES users(id),
        status TEXT NOT NULL,
        reward INTEGER,
        created_at INTEGER NOT NULL,
        CHECK (referrer_id <> referred_user_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_referrals_referrer_status
        ON referrals (referrer_id, status)",
];

const USER_COLUMNS: &str = "id, email, username, password_hash, referral_code, referred_by, \
                            created_at, is_active, last_login, credits";

const REFERRAL_COLUMNS: &str = "id, referrer_id, referred_user_id, status, reward, created_at";

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Opens (or creates) a database file and runs migrations.
    pub async fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::Storage(e.to_string()))?;
        }
        Self::connect(&format!("sqlite:{}", path.display())).await
    }

    /// Connects using a `sqlite:` URL and runs migrations.
    pub async fn connect(url: &str) -> CoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!(url, "Identity database opened");
        Ok(store)
    }

    /// In-memory database on a single connection (for testing).
    pub async fn open_in_memory() -> CoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> CoreResult<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn fetch_user(&self, column: &str, value: String) -> CoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }
}

async fn insert_user_row(conn: &mut SqliteConnection, user: &User) -> CoreResult<()> {
    let sql = format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)");
    sqlx::query(&sql)
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.referral_code.to_string())
        .bind(user.referred_by.map(|id| id.to_string()))
        .bind(user.created_at.timestamp_millis())
        .bind(user.is_active)
        .bind(user.last_login.map(|t| t.timestamp_millis()))
        .bind(to_i64(user.credits)?)
        .execute(conn)
        .await
        .map_err(map_user_conflict)?;
    Ok(())
}

async fn insert_referral_row(conn: &mut SqliteConnection, referral: &Referral) -> CoreResult<()> {
    let sql = format!("INSERT INTO referrals ({REFERRAL_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)");
    let reward = referral.reward.map(to_i64).transpose()?;
    sqlx::query(&sql)
        .bind(referral.id.to_string())
        .bind(referral.referrer.to_string())
        .bind(referral.referred_user.to_string())
        .bind(referral.status.as_str())
        .bind(reward)
        .bind(referral.created_at.timestamp_millis())
        .execute(conn)
        .await
        .map_err(|e| {
            if unique_violation(&e).is_some() {
                CoreError::DuplicateReferral(referral.referred_user)
            } else {
                e.into()
            }
        })?;
    Ok(())
}

async fn add_credits(conn: &mut SqliteConnection, user: Uuid, amount: u64) -> CoreResult<()> {
    sqlx::query("UPDATE users SET credits = credits + ? WHERE id = ?")
        .bind(to_i64(amount)?)
        .bind(user.to_string())
        .execute(conn)
        .await?;
    Ok(())
}

async fn user_exists(conn: &mut SqliteConnection, id: Uuid) -> CoreResult<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(conn)
        .await?;
    Ok(found.is_some())
}

#[async_trait]
impl IdentityStore for SqliteStore {
    async fn insert_user(&self, new: NewUser) -> CoreResult<User> {
        let user = new.into_user(model::now());
        let mut conn = self.pool.acquire().await?;
        insert_user_row(&mut conn, &user).await?;
        Ok(user)
    }

    async fn insert_referred_user(&self, new: NewUser, reward: u64) -> CoreResult<(User, Referral)> {
        let referrer_id = new.referred_by.ok_or(CoreError::ReferrerNotFound)?;
        let user = new.into_user(model::now());
        let mut referral = Referral::pending(referrer_id, user.id, user.created_at)?;
        let credit = referral.complete(reward).unwrap_or_default();

        let mut tx = self.pool.begin().await?;
        if !user_exists(&mut tx, referrer_id).await? {
            return Err(CoreError::ReferrerNotFound);
        }
        insert_user_row(&mut tx, &user).await?;
        insert_referral_row(&mut tx, &referral).await?;
        add_credits(&mut tx, referrer_id, credit).await?;
        tx.commit().await?;

        Ok((user, referral))
    }

    async fn find_user(&self, id: Uuid) -> CoreResult<Option<User>> {
        self.fetch_user("id", id.to_string()).await
    }

    async fn find_user_by_email(&self, email: &str) -> CoreResult<Option<User>> {
        self.fetch_user("email", model::normalize_email(email)).await
    }

    async fn find_user_by_username(&self, username: &str) -> CoreResult<Option<User>> {
        self.fetch_user("username", username.to_string()).await
    }

    async fn find_user_by_referral_code(&self, code: Uuid) -> CoreResult<Option<User>> {
        self.fetch_user("referral_code", code.to_string()).await
    }

    async fn save_user(&self, user: &User) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT referred_by, referral_code FROM users WHERE id = ?")
            .bind(user.id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(CoreError::UserNotFound)?;
        let stored_referred_by = parse_opt_uuid(row.try_get("referred_by")?)?;
        let stored_code = parse_uuid(&row.try_get::<String, _>("referral_code")?)?;
        if stored_referred_by != user.referred_by {
            return Err(CoreError::ImmutableField("referred_by"));
        }
        if stored_code != user.referral_code {
            return Err(CoreError::ImmutableField("referral_code"));
        }

        sqlx::query("UPDATE users SET email = ?, username = ?, is_active = ? WHERE id = ?")
            .bind(&user.email)
            .bind(&user.username)
            .bind(user.is_active)
            .bind(user.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_user_conflict)?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<()> {
        let result = sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(at.timestamp_millis())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::UserNotFound);
        }
        Ok(())
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: String) -> CoreResult<()> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::UserNotFound);
        }
        Ok(())
    }

    async fn insert_referral(&self, referrer: Uuid, referred_user: Uuid) -> CoreResult<Referral> {
        let referral = Referral::pending(referrer, referred_user, model::now())?;

        let mut tx = self.pool.begin().await?;
        if !user_exists(&mut tx, referrer).await? {
            return Err(CoreError::ReferrerNotFound);
        }
        if !user_exists(&mut tx, referred_user).await? {
            return Err(CoreError::UserNotFound);
        }
        insert_referral_row(&mut tx, &referral).await?;
        tx.commit().await?;
        Ok(referral)
    }

    async fn complete_referral(&self, id: Uuid, reward: u64) -> CoreResult<Referral> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {REFERRAL_COLUMNS} FROM referrals WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(CoreError::ReferralNotFound(id))?;
        let mut referral = referral_from_row(&row)?;

        let Some(credit) = referral.complete(reward) else {
            return Ok(referral);
        };

        // The status guard makes a concurrent second completion a no-op.
        let updated = sqlx::query(
            "UPDATE referrals SET status = ?, reward = ? WHERE id = ? AND status = ?",
        )
        .bind(ReferralStatus::Successful.as_str())
        .bind(to_i64(credit)?)
        .bind(id.to_string())
        .bind(ReferralStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 1 {
            add_credits(&mut tx, referral.referrer, credit).await?;
            tx.commit().await?;
            return Ok(referral);
        }

        drop(tx);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await?;
        referral_from_row(&row)
    }

    async fn find_referral_for(&self, referred_user: Uuid) -> CoreResult<Option<Referral>> {
        let sql = format!("SELECT {REFERRAL_COLUMNS} FROM referrals WHERE referred_user_id = ?");
        let row = sqlx::query(&sql)
            .bind(referred_user.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(referral_from_row).transpose()
    }

    async fn count_referrals(&self, referrer: Uuid, status: ReferralStatus) -> CoreResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM referrals WHERE referrer_id = ? AND status = ?")
                .bind(referrer.to_string())
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

/// Returns the driver message if `e` is a UNIQUE constraint violation.
fn unique_violation(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => Some(db.message().to_string()),
        _ => None,
    }
}

fn map_user_conflict(e: sqlx::Error) -> CoreError {
    match unique_violation(&e) {
        Some(msg) if msg.contains("users.email") => CoreError::EmailInUse,
        Some(msg) if msg.contains("users.username") => CoreError::UsernameInUse,
        _ => e.into(),
    }
}

fn user_from_row(row: &SqliteRow) -> CoreResult<User> {
    let credits: i64 = row.try_get("credits")?;
    Ok(User {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        referral_code: parse_uuid(&row.try_get::<String, _>("referral_code")?)?,
        referred_by: parse_opt_uuid(row.try_get("referred_by")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
        is_active: row.try_get("is_active")?,
        last_login: row
            .try_get::<Option<i64>, _>("last_login")?
            .map(from_millis)
            .transpose()?,
        credits: u64::try_from(credits).map_err(|e| CoreError::Storage(e.to_string()))?,
    })
}

fn referral_from_row(row: &SqliteRow) -> CoreResult<Referral> {
    let status: String = row.try_get("status")?;
    let reward: Option<i64> = row.try_get("reward")?;
    Ok(Referral {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        referrer: parse_uuid(&row.try_get::<String, _>("referrer_id")?)?,
        referred_user: parse_uuid(&row.try_get::<String, _>("referred_user_id")?)?,
        status: ReferralStatus::parse(&status)
            .ok_or_else(|| CoreError::Storage(format!("unknown referral status: {status}")))?,
        reward: reward
            .map(|r| u64::try_from(r).map_err(|e| CoreError::Storage(e.to_string())))
            .transpose()?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn parse_uuid(s: &str) -> CoreResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| CoreError::Storage(format!("bad uuid {s:?}: {e}")))
}

fn parse_opt_uuid(s: Option<String>) -> CoreResult<Option<Uuid>> {
    s.as_deref().map(parse_uuid).transpose()
}

fn from_millis(ms: i64) -> CoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| CoreError::Storage(format!("timestamp out of range: {ms}")))
}

fn to_i64(v: u64) -> CoreResult<i64> {
    i64::try_from(v).map_err(|e| CoreError::Storage(e.to_string()))
}
