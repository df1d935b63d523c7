//! refauth core library: registration, login and referral logic.
//!
//! `refauth-core` holds everything that does not depend on HTTP so the
//! web server (`refauth-web`) stays a thin routing layer.
//!
//! # Modules
//!
//! - [`model`]: [`User`] and [`Referral`] records.
//! - [`store`]: the [`IdentityStore`] trait with in-memory and SQLite backends.
//! - [`referral`]: the referral ledger: code resolution, completion, links, cached stats.
//! - [`cache`]: expiring key/value map shared by the limiter and the stats cache.
//! - [`rate_limit`]: sliding-window limiter per client and endpoint.
//! - [`password`], [`token`]: argon2 hashing, bearer and reset tokens.
//! - [`flow`]: [`AuthFlow`], one operation per endpoint.
//! - [`error`]: unified error type ([`CoreError`]) and result alias ([`CoreResult`]).

pub mod cache;
pub mod error;
pub mod flow;
pub mod model;
pub mod notify;
pub mod password;
pub mod rate_limit;
pub mod referral;
pub mod sanitize;
pub mod store;
pub mod token;

pub use error::{CoreError, CoreResult};
pub use flow::{AuthFlow, AuthSettings, PasswordReset, Registration, Session};
pub use model::{NewUser, Referral, ReferralStatus, User};
pub use notify::{LogNotifier, Message, Notifier};
pub use referral::{ReferralLedger, ReferralSettings};
pub use store::{IdentityStore, MemoryStore, SqliteStore};
