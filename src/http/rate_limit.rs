//! Per-client token bucket rate limiting.
//!
//! Buckets that have refilled to capacity carry no state worth keeping, so
//! once the table passes a threshold they are pruned before new clients
//! are admitted.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::observability::metrics;

/// A simple token bucket rate limiter.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whether the bucket would be back at `capacity` by `now`.
    fn is_full_at(&self, now: Instant, capacity: f64, refill_rate: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens + elapsed * refill_rate >= capacity
    }
}

/// Table size at which refilled buckets start being pruned.
const DEFAULT_PRUNE_THRESHOLD: usize = 4096;

/// Buckets keyed by client IP.
pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    rps: f64,
    burst: f64,
    prune_threshold: usize,
    next_prune_at: AtomicUsize,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            rps: config.requests_per_second as f64,
            burst: config.burst_size as f64,
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
            next_prune_at: AtomicUsize::new(DEFAULT_PRUNE_THRESHOLD),
        }
    }

    pub fn with_prune_threshold(mut self, threshold: usize) -> Self {
        self.prune_threshold = threshold;
        self.next_prune_at = AtomicUsize::new(threshold);
        self
    }

    pub fn check(&self, key: &str) -> bool {
        // Must run before `entry` below takes a shard lock.
        if self.buckets.len() >= self.next_prune_at.load(Ordering::Relaxed) && !self.buckets.contains_key(key) {
            self.prune();
        }

        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst));
        bucket.try_acquire(self.burst, self.rps)
    }

    /// Drop every bucket that has refilled to capacity and return how many
    /// went. A pruned client starts over with a full bucket, which is the
    /// state it was in anyway.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| !bucket.is_full_at(now, self.burst, self.rps));
        let remaining = self.buckets.len();

        // Clients that keep their buckets drained would otherwise trigger a
        // full scan on every new arrival.
        self.next_prune_at
            .store((remaining * 2).max(self.prune_threshold), Ordering::Relaxed);

        let removed = before.saturating_sub(remaining);
        if removed > 0 {
            tracing::debug!(removed, remaining, "Pruned idle rate limit buckets");
        }
        removed
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

/// Clients without connection info (in-process calls) share one bucket.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "local".to_string());

    if limiter.check(&key) {
        next.run(request).await
    } else {
        tracing::warn!(client = %key, "Rate limit exceeded");
        metrics::record_rate_limited("rps_limit");
        let mut response = Response::new(Body::from("Rate limit exceeded"));
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(requests_per_second: u32, burst_size: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            requests_per_second,
            burst_size,
        }
    }

    #[test]
    fn burst_then_reject() {
        let limiter = RateLimiter::new(&config(1, 3));

        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));

        // Separate clients have separate buckets.
        assert!(limiter.check("10.0.0.2"));
        assert_eq!(limiter.tracked_clients(), 2);
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(&config(10, 2))
    }

    #[tokio::test(start_paused = true)]
    async fn only_refilled_buckets_are_pruned() {
        let limiter = limiter();
        assert!(limiter.check("a"));
        assert!(limiter.check("b"));
        assert!(limiter.check("b"));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(limiter.prune(), 1);
        assert_eq!(limiter.tracked_clients(), 1);

        // "b" kept its partial refill: one token, not a fresh burst.
        assert!(limiter.check("b"));
        assert!(!limiter.check("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn table_is_pruned_once_past_threshold() {
        let limiter = limiter().with_prune_threshold(4);
        for i in 0..4 {
            assert!(limiter.check(&format!("10.0.0.{i}")));
        }
        assert_eq!(limiter.tracked_clients(), 4);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.check("10.0.0.99"));
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drained_buckets_survive_and_raise_the_threshold() {
        let limiter = limiter().with_prune_threshold(2);
        for client in ["a", "b"] {
            assert!(limiter.check(client));
            assert!(limiter.check(client));
        }

        assert!(limiter.check("c"));
        assert_eq!(limiter.tracked_clients(), 3);
        assert_eq!(limiter.next_prune_at.load(Ordering::Relaxed), 4);
    }
}
