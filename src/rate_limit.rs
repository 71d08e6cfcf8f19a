//! Per-event admission control.
//!
//! Each event kind has its own budget: `capacity` points per `window`,
//! and once a key exhausts it every call is refused for `block`. Buckets
//! are keyed by `(kind, connection)` so kinds never share a budget.
//!
//! Buckets live in a sharded `DashMap`; an admission only locks the shard
//! holding its own bucket.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Budget for one event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    /// Points available per window
    pub capacity: u32,
    /// Window length; the budget refills when it elapses
    pub window: Duration,
    /// How long a key stays blocked after exhausting the budget
    pub block: Duration,
}

impl BucketConfig {
    pub const fn new(capacity: u32, window_secs: u64, block_secs: u64) -> Self {
        Self {
            capacity,
            window: Duration::from_secs(window_secs),
            block: Duration::from_secs(block_secs),
        }
    }
}

/// Limits per event kind. Kinds without an entry are always admitted.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    limits: HashMap<String, BucketConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::empty()
            .with_limit("join-room", BucketConfig::new(5, 60, 60))
            .with_limit("chat-message", BucketConfig::new(30, 60, 30))
            .with_limit("whiteboard-draw", BucketConfig::new(200, 1, 2))
            .with_limit("offer", BucketConfig::new(10, 10, 10))
            .with_limit("answer", BucketConfig::new(10, 10, 10))
            .with_limit("ice-candidate", BucketConfig::new(500, 10, 5))
            .with_limit("caption", BucketConfig::new(30, 10, 5))
    }
}

impl RateLimitConfig {
    /// A config that admits everything.
    pub fn empty() -> Self {
        Self {
            limits: HashMap::new(),
        }
    }

    pub fn with_limit(mut self, kind: &str, limit: BucketConfig) -> Self {
        self.limits.insert(kind.to_string(), limit);
        self
    }

    pub fn limit(&self, kind: &str) -> Option<&BucketConfig> {
        self.limits.get(kind)
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied {
        /// Whole seconds until the key is unblocked, at least 1
        retry_after: u64,
        /// First denial for this bucket in the current second
        log: bool,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Admission::Allowed => None,
            Admission::Denied { retry_after, .. } => Some(*retry_after),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    window_start: Instant,
    consumed: u32,
    blocked_until: Option<Instant>,
    last_logged: Option<Instant>,
}

impl Bucket {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            consumed: 0,
            blocked_until: None,
            last_logged: None,
        }
    }

    fn reset(&mut self, now: Instant) {
        self.window_start = now;
        self.consumed = 0;
        self.blocked_until = None;
    }

    fn deny(&mut self, now: Instant, until: Instant) -> Admission {
        let log = match self.last_logged {
            Some(at) => now.saturating_duration_since(at) >= Duration::from_secs(1),
            None => true,
        };
        if log {
            self.last_logged = Some(now);
        }
        Admission::Denied {
            retry_after: ceil_secs(until.saturating_duration_since(now)),
            log,
        }
    }

    /// Idle buckets carry no state worth keeping.
    fn is_idle(&self, now: Instant, limit: &BucketConfig) -> bool {
        let blocked = self.blocked_until.is_some_and(|until| now < until);
        !blocked && now.saturating_duration_since(self.window_start) >= limit.window
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

/// Admission gate shared by all connections.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<(String, String), Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// Consume one point for `key` under `kind`.
    pub fn admit(&self, kind: &str, key: &str) -> Admission {
        self.admit_at(kind, key, Instant::now())
    }

    pub fn admit_at(&self, kind: &str, key: &str, now: Instant) -> Admission {
        let Some(limit) = self.config.limit(kind) else {
            return Admission::Allowed;
        };

        let mut bucket = self
            .buckets
            .entry((kind.to_string(), key.to_string()))
            .or_insert_with(|| Bucket::new(now));

        if let Some(until) = bucket.blocked_until {
            if now < until {
                return bucket.deny(now, until);
            }
            bucket.reset(now);
        }

        if now.saturating_duration_since(bucket.window_start) >= limit.window {
            bucket.reset(now);
        }

        if bucket.consumed < limit.capacity {
            bucket.consumed += 1;
            return Admission::Allowed;
        }

        let until = now + limit.block.max(Duration::from_secs(1));
        bucket.blocked_until = Some(until);
        bucket.deny(now, until)
    }

    /// Drop every bucket owned by `key`.
    pub fn forget(&self, key: &str) {
        self.buckets.retain(|(_, owner), _| owner != key);
    }

    /// Evict buckets whose window has passed and which are not blocked.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|(kind, _), bucket| match self.config.limit(kind) {
            Some(limit) => !bucket.is_idle(now, limit),
            None => false,
        });
        before.saturating_sub(self.buckets.len())
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
