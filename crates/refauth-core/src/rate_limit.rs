//! Sliding-window request limiter keyed by client address and endpoint.
//!
//! Each key holds the instants of the requests accepted within the trailing
//! window. A request is rejected, and not recorded, once the window already
//! holds `capacity` requests. Concurrent requests for the same key may
//! overshoot slightly; the limiter is best-effort, not a hard quota.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::ExpiringStore;

pub const DEFAULT_CAPACITY: usize = 5;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Rate-limited endpoints. Each has its own independent window per client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Register,
    Login,
}

impl Endpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    RateLimited,
}

pub struct RateLimiter {
    store: Arc<ExpiringStore<Vec<Instant>>>,
    capacity: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<ExpiringStore<Vec<Instant>>>, capacity: usize, window: Duration) -> Self {
        Self {
            store,
            capacity,
            window,
        }
    }

    pub fn key(endpoint: Endpoint, client: &str) -> String {
        format!("{endpoint}_rate_limit_{client}")
    }

    pub fn check_and_record(&self, endpoint: Endpoint, client: &str) -> Decision {
        self.check_and_record_at(endpoint, client, Instant::now())
    }

    pub fn check_and_record_at(&self, endpoint: Endpoint, client: &str, now: Instant) -> Decision {
        let key = Self::key(endpoint, client);
        let mut timestamps = self.store.get_at(&key, now).unwrap_or_default();

        timestamps.retain(|ts| now.saturating_duration_since(*ts) < self.window);

        if timestamps.len() >= self.capacity {
            tracing::warn!("Rate limit exceeded: endpoint={endpoint}, client={client}");
            return Decision::RateLimited;
        }

        timestamps.push(now);
        tracing::debug!(
            "Rate limit window: endpoint={endpoint}, client={client}, count={}",
            timestamps.len()
        );
        self.store.set_at(key, timestamps, self.window, now);
        Decision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(ExpiringStore::new()), DEFAULT_CAPACITY, DEFAULT_WINDOW)
    }

    #[test]
    fn sixth_request_in_window_is_limited() {
        let limiter = limiter();
        let start = Instant::now();
        for i in 0..5 {
            let now = start + Duration::from_secs(i);
            assert_eq!(
                limiter.check_and_record_at(Endpoint::Register, "10.0.0.1", now),
                Decision::Allowed
            );
        }
        assert_eq!(
            limiter.check_and_record_at(Endpoint::Register, "10.0.0.1", start + Duration::from_secs(10)),
            Decision::RateLimited
        );
    }

    #[test]
    fn window_elapsing_allows_again() {
        let limiter = limiter();
        let start = Instant::now();
        for _ in 0..5 {
            limiter.check_and_record_at(Endpoint::Register, "10.0.0.1", start);
        }
        assert_eq!(
            limiter.check_and_record_at(Endpoint::Register, "10.0.0.1", start + Duration::from_secs(1)),
            Decision::RateLimited
        );
        assert_eq!(
            limiter.check_and_record_at(Endpoint::Register, "10.0.0.1", start + Duration::from_secs(61)),
            Decision::Allowed
        );
    }

    #[test]
    fn rejected_requests_are_not_recorded() {
        let limiter = limiter();
        let start = Instant::now();
        for i in 0..5 {
            limiter.check_and_record_at(Endpoint::Login, "c", start + Duration::from_secs(i * 10));
        }
        // Rejected attempts at t=45s must not extend the window.
        for _ in 0..3 {
            limiter.check_and_record_at(Endpoint::Login, "c", start + Duration::from_secs(45));
        }
        // At t=61s only the t=0 request has aged out, leaving room for one.
        assert_eq!(
            limiter.check_and_record_at(Endpoint::Login, "c", start + Duration::from_secs(61)),
            Decision::Allowed
        );
        assert_eq!(
            limiter.check_and_record_at(Endpoint::Login, "c", start + Duration::from_secs(62)),
            Decision::RateLimited
        );
    }

    #[test]
    fn endpoints_and_clients_are_independent() {
        let limiter = limiter();
        let now = Instant::now();
        for _ in 0..5 {
            limiter.check_and_record_at(Endpoint::Register, "a", now);
        }
        assert_eq!(
            limiter.check_and_record_at(Endpoint::Login, "a", now),
            Decision::Allowed
        );
        assert_eq!(
            limiter.check_and_record_at(Endpoint::Register, "b", now),
            Decision::Allowed
        );
    }

    #[test]
    fn key_format() {
        assert_eq!(
            RateLimiter::key(Endpoint::Register, "127.0.0.1"),
            "register_rate_limit_127.0.0.1"
        );
    }
}
