//! # Rate Limiting Implementation
//!
//! Fixed-window request counting keyed by agent identity and client IP.
//!
//! Windows are approximate: a client can send up to twice the limit across a
//! window boundary. Entries are never purged; a stale window is replaced the
//! next time its key is seen, which assumes a bounded set of agent/IP pairs.

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::clock::{Clock, SystemClock};

/// Sentinel used when no forwarded-for address is available.
pub const UNKNOWN_IP: &str = "unknown";

/// Rate limit configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    pub max_requests: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::minutes(5),
        }
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Whole seconds until `reset_at`, at least one.
    pub retry_after_secs: i64,
}

/// Counter for one key within its current window.
#[derive(Debug, Clone)]
struct RateWindow {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Fixed-window rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Arc<RwLock<HashMap<String, RateWindow>>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter on the wall clock.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a rate limiter reading time from `clock`.
    #[must_use]
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            windows: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    #[must_use]
    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Check `key` against the configured limit and window.
    pub async fn check(&self, key: &str) -> RateDecision {
        self.check_with(key, self.config.max_requests, self.config.window)
            .await
    }

    /// Count one request for `key` and decide whether it is allowed.
    pub async fn check_with(&self, key: &str, limit: u32, window: Duration) -> RateDecision {
        let now = self.clock.now();
        let mut windows = self.windows.write().await;

        match windows.get_mut(key) {
            Some(entry) if now <= entry.reset_at => {
                if entry.count >= limit {
                    debug!(key = %key, reset_at = %entry.reset_at, "Rate limit exceeded");
                    return RateDecision {
                        allowed: false,
                        remaining: 0,
                        reset_at: entry.reset_at,
                        retry_after_secs: seconds_until(entry.reset_at, now),
                    };
                }
                entry.count += 1;
                RateDecision {
                    allowed: true,
                    remaining: limit - entry.count,
                    reset_at: entry.reset_at,
                    retry_after_secs: seconds_until(entry.reset_at, now),
                }
            }
            _ => {
                let reset_at = now + window;
                windows.insert(key.to_string(), RateWindow { count: 1, reset_at });
                RateDecision {
                    allowed: limit > 0,
                    remaining: limit.saturating_sub(1),
                    reset_at,
                    retry_after_secs: seconds_until(reset_at, now),
                }
            }
        }
    }

    /// Number of keys currently tracked.
    pub async fn tracked_keys(&self) -> usize {
        self.windows.read().await.len()
    }
}

fn seconds_until(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (reset_at - now).num_milliseconds();
    ((millis + 999) / 1000).max(1)
}

/// Client IP: first `X-Forwarded-For` value, or [`UNKNOWN_IP`].
///
/// The header is trusted as-is; deployments must sit behind a proxy that
/// overwrites it.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map_or_else(|| UNKNOWN_IP.to_string(), String::from)
}

/// Composite limiter key for an agent calling from an address.
#[must_use]
pub fn rate_key(agent_id: &str, ip: &str) -> String {
    format!("{agent_id}|{ip}")
}
