//! Fixed-window rate limiting.
//!
//! Two layers guard the hot path: a shared-store limiter (distributed when a
//! shared counter service is deployed) and the DB-backed per-container
//! counter with a longer window. A third, coarser limiter covers the general
//! API per client address. Rate limiting is a quality-of-service feature and
//! not a security boundary, so every unexpected failure allows the request.

use anyhow::Result;
use async_trait::async_trait;
use ocmt_api::data::RateLimitInfo;
use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};
use tokio::sync::Mutex;

/// The verdict of one limiter consultation. `info` mirrors the
/// `RateLimit-*` headers regardless of the verdict.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after_seconds: u64,
    pub info: RateLimitInfo,
}

/// A shared counter backend keyed by `(service, limiter, identity)` windows.
/// Implementations must expire entries no later than twice the window.
#[async_trait]
pub trait SharedCounterStore: Send + Sync {
    /// Increment the counter for `key` within the window starting at
    /// `window_start` (unix ms) and return the incremented count
    async fn increment(&self, key: &str, window_start: u64, ttl: Duration) -> Result<u64>;
}

#[derive(Clone, Debug)]
struct CounterWindow {
    window_start: u64,
    count: u64,
    touched_at: u64,
}

/// The in-process fallback counter map, also usable as the primary store for
/// single-process deployments
#[derive(Default)]
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, CounterWindow>>,
}

impl MemoryCounterStore {
    /// Drop entries idle for longer than `ttl`; called by the periodic sweep
    pub async fn sweep(&self, now: u64, ttl: Duration) {
        let mut windows = self.windows.lock().await;
        let ttl = ttl.as_millis() as u64;
        windows.retain(|_, window| now.saturating_sub(window.touched_at) <= ttl);
    }
}

#[async_trait]
impl SharedCounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window_start: u64, _ttl: Duration) -> Result<u64> {
        let mut windows = self.windows.lock().await;
        let window = windows
            .entry(key.to_string())
            .and_modify(|window| {
                if window.window_start == window_start {
                    window.count += 1;
                } else {
                    window.window_start = window_start;
                    window.count = 1;
                }
                window.touched_at = window_start;
            })
            .or_insert(CounterWindow {
                window_start,
                count: 1,
                touched_at: window_start,
            });
        Ok(window.count)
    }
}

/// One named fixed-window limiter: a primary (possibly distributed) counter
/// store with a silent in-memory fallback
pub struct FixedWindowLimiter {
    name: &'static str,
    limit: u64,
    window: Duration,
    primary: Option<Arc<dyn SharedCounterStore>>,
    fallback: MemoryCounterStore,
}

impl FixedWindowLimiter {
    pub fn new(
        name: &'static str,
        limit: u64,
        window: Duration,
        primary: Option<Arc<dyn SharedCounterStore>>,
    ) -> Self {
        FixedWindowLimiter {
            name,
            limit,
            window,
            primary,
            fallback: MemoryCounterStore::default(),
        }
    }

    /// Count one request for `identity` against the current window
    pub async fn check(&self, identity: &str, now_ms: u64) -> RateLimitDecision {
        let window_ms = self.window.as_millis() as u64;
        let window_start = now_ms - (now_ms % window_ms);
        let reset_seconds = (window_start + window_ms) / 1000;
        let key = format!("relay/{}/{}", self.name, identity);
        let ttl = self.window * 2;

        let count = match &self.primary {
            Some(primary) => match primary.increment(&key, window_start, ttl).await {
                Ok(count) => Some(count),
                Err(error) => {
                    warn!(
                        "Shared rate-limit store unavailable for {}: {}; using local fallback",
                        self.name, error
                    );
                    None
                }
            },
            None => None,
        };

        let count = match count {
            Some(count) => count,
            None => match self.fallback.increment(&key, window_start, ttl).await {
                Ok(count) => count,
                Err(error) => {
                    // Fail open: a broken limiter must not take the relay down
                    error!("Rate limiter {} failed entirely: {}", self.name, error);
                    return RateLimitDecision {
                        allowed: true,
                        retry_after_seconds: 0,
                        info: RateLimitInfo {
                            limit: self.limit,
                            remaining: self.limit,
                            reset: reset_seconds,
                        },
                    };
                }
            },
        };

        let allowed = count <= self.limit;
        RateLimitDecision {
            allowed,
            retry_after_seconds: match allowed {
                true => 0,
                false => ((window_start + window_ms).saturating_sub(now_ms)).div_ceil(1000),
            },
            info: RateLimitInfo {
                limit: self.limit,
                remaining: self.limit.saturating_sub(count),
                reset: reset_seconds,
            },
        }
    }

    /// Expire idle fallback windows; invoked by the background sweep
    pub async fn sweep(&self, now_ms: u64) {
        self.fallback.sweep(now_ms, self.window * 2).await;
    }
}

/// The relay's limiter set
pub struct RateLimiters {
    /// Per-container message cap on the send/forward hot path
    pub messages: FixedWindowLimiter,
    /// Per-address cap across the general API
    pub general: FixedWindowLimiter,
}

impl RateLimiters {
    pub fn new(
        messages_per_minute: u64,
        requests_per_hour: u64,
        shared: Option<Arc<dyn SharedCounterStore>>,
    ) -> Self {
        RateLimiters {
            messages: FixedWindowLimiter::new(
                "messages",
                messages_per_minute,
                Duration::from_secs(60),
                shared.clone(),
            ),
            general: FixedWindowLimiter::new(
                "api",
                requests_per_hour,
                Duration::from_secs(60 * 60),
                shared,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_cap_is_enforced_within_one_window() {
        let limiter = FixedWindowLimiter::new("test", 3, Duration::from_secs(60), None);

        for _ in 0..3 {
            assert!(limiter.check("c1", 1_000).await.allowed);
        }

        let denied = limiter.check("c1", 1_000).await;
        assert!(!denied.allowed);
        assert_eq!(denied.info.remaining, 0);
        assert!(denied.retry_after_seconds > 0);
    }

    #[tokio::test]
    async fn a_new_window_starts_fresh() {
        let limiter = FixedWindowLimiter::new("test", 1, Duration::from_secs(60), None);

        assert!(limiter.check("c1", 1_000).await.allowed);
        assert!(!limiter.check("c1", 2_000).await.allowed);
        assert!(limiter.check("c1", 61_000).await.allowed);
    }

    #[tokio::test]
    async fn identities_do_not_share_windows() {
        let limiter = FixedWindowLimiter::new("test", 1, Duration::from_secs(60), None);

        assert!(limiter.check("c1", 1_000).await.allowed);
        assert!(limiter.check("c2", 1_000).await.allowed);
    }

    #[tokio::test]
    async fn a_failing_primary_falls_back_to_the_local_map() {
        struct BrokenStore;

        #[async_trait]
        impl SharedCounterStore for BrokenStore {
            async fn increment(&self, _: &str, _: u64, _: Duration) -> Result<u64> {
                Err(anyhow::anyhow!("connection refused"))
            }
        }

        let limiter =
            FixedWindowLimiter::new("test", 1, Duration::from_secs(60), Some(Arc::new(BrokenStore)));

        assert!(limiter.check("c1", 1_000).await.allowed);
        assert!(!limiter.check("c1", 2_000).await.allowed);
    }

    #[tokio::test]
    async fn sweep_drops_idle_windows() {
        let store = MemoryCounterStore::default();
        store.increment("k", 0, Duration::from_secs(120)).await.unwrap();
        store.sweep(10 * 60 * 1000, Duration::from_secs(120)).await;

        // Counter restarted because the idle window was dropped
        assert_eq!(
            store.increment("k", 0, Duration::from_secs(120)).await.unwrap(),
            1
        );
    }
}
