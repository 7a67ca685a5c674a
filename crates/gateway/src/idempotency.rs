//! Idempotency-key cache for side-effecting actions.
//!
//! A request carrying an `Idempotency-Key` first claims the key. The first
//! claimant executes the action; later requests with the same key replay the
//! stored response until it expires, or are turned away while the first one is
//! still running. A failed execution releases its claim so a retry runs again.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::clock::{Clock, SystemClock};

/// Default record lifetime.
pub const DEFAULT_TTL_SECS: i64 = 300;

/// A response captured for replay. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: u16,
    pub body: Value,
    pub headers: BTreeMap<String, String>,
}

/// Result of claiming a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// Caller owns the key and must either `set` or `release` it.
    Acquired,
    /// A completed response exists; replay it without executing.
    Replay(IdempotencyRecord),
    /// Another request holds the key and has not finished.
    InFlight,
}

/// Keyed store of completed responses and in-flight claims.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Live record for `key`, treating expired records as absent.
    async fn get(&self, key: &str) -> Option<IdempotencyRecord>;

    /// Store a completed response for `ttl`, replacing any claim.
    async fn set(
        &self,
        key: &str,
        status: u16,
        body: Value,
        headers: BTreeMap<String, String>,
        ttl: Duration,
    );

    /// Atomically return the live record, report an in-flight claim, or take
    /// the key. An unreleased claim lapses after `ttl`.
    async fn claim(&self, key: &str, ttl: Duration) -> Claim;

    /// Drop an in-flight claim. Completed records are left alone.
    async fn release(&self, key: &str);
}

#[derive(Debug, Clone)]
enum Slot {
    InFlight { expires_at: DateTime<Utc> },
    Done(IdempotencyRecord),
}

impl Slot {
    fn expires_at(&self) -> DateTime<Utc> {
        match self {
            Self::InFlight { expires_at } => *expires_at,
            Self::Done(record) => record.expires_at,
        }
    }
}

/// Process-local store behind a single lock.
#[derive(Clone)]
pub struct InMemoryIdempotencyStore {
    slots: Arc<RwLock<HashMap<String, Slot>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryIdempotencyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Option<IdempotencyRecord> {
        let now = self.clock.now();
        let mut slots = self.slots.write().await;
        let expired = match slots.get(key) {
            Some(Slot::Done(record)) if now <= record.expires_at => return Some(record.clone()),
            Some(slot) => now > slot.expires_at(),
            None => false,
        };
        if expired {
            slots.remove(key);
        }
        None
    }

    async fn set(
        &self,
        key: &str,
        status: u16,
        body: Value,
        headers: BTreeMap<String, String>,
        ttl: Duration,
    ) {
        let now = self.clock.now();
        let record = IdempotencyRecord {
            key: key.to_string(),
            stored_at: now,
            expires_at: now + ttl,
            status,
            body,
            headers,
        };
        self.slots
            .write()
            .await
            .insert(key.to_string(), Slot::Done(record));
        debug!(key = %key, status, "Stored idempotent response");
    }

    async fn claim(&self, key: &str, ttl: Duration) -> Claim {
        let now = self.clock.now();
        let mut slots = self.slots.write().await;
        match slots.get(key) {
            Some(Slot::Done(record)) if now <= record.expires_at => {
                return Claim::Replay(record.clone());
            }
            Some(Slot::InFlight { expires_at }) if now <= *expires_at => {
                return Claim::InFlight;
            }
            _ => {}
        }
        slots.insert(
            key.to_string(),
            Slot::InFlight {
                expires_at: now + ttl,
            },
        );
        Claim::Acquired
    }

    async fn release(&self, key: &str) {
        let mut slots = self.slots.write().await;
        if matches!(slots.get(key), Some(Slot::InFlight { .. })) {
            slots.remove(key);
        }
    }
}
