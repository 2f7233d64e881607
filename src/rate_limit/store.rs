//! Shared bucket stores for the distributed limiter
//!
//! A store performs refill + check + consume as one atomic step and answers
//! with a [`BucketDecision`]. Nothing is cached on the client side between
//! calls; the store is the single source of truth.

use super::types::{secs_to_duration, BucketConfig, BucketDecision, TokenBucketState};
use crate::error::{Error, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::Script;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Atomic token bucket operations keyed by string
#[async_trait]
pub trait BucketStore: Send + Sync + std::fmt::Debug {
    /// Refill the bucket at `key`, then consume one token when `consume` is set
    ///
    /// Creates a full bucket when the key is absent and pushes its expiry out
    /// to `ttl` from now.
    async fn take(
        &self,
        key: &str,
        config: &BucketConfig,
        ttl: Duration,
        consume: bool,
    ) -> Result<BucketDecision>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug)]
struct Entry {
    state: TokenBucketState,
    expires_at: Instant,
}

/// Process-local [`BucketStore`]
///
/// Speaks the same protocol as the Redis store, so limiters built on it behave
/// identically within one process.
#[derive(Debug, Default)]
pub struct MemoryBucketStore {
    buckets: Mutex<HashMap<String, Entry>>,
}

impl MemoryBucketStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live buckets
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    /// Whether the store holds no live buckets
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn take(
        &self,
        key: &str,
        config: &BucketConfig,
        ttl: Duration,
        consume: bool,
    ) -> Result<BucketDecision> {
        let now = Instant::now();
        let mut buckets = self.lock();
        buckets.retain(|_, entry| entry.expires_at > now);

        let entry = buckets.entry(key.to_string()).or_insert_with(|| Entry {
            state: TokenBucketState::new(*config, now),
            expires_at: now,
        });
        entry.expires_at = now + ttl;
        Ok(entry.state.take(now, consume))
    }
}

// ============================================================================
// Redis store
// ============================================================================

/// KEYS[1] bucket key; ARGV capacity, refill_rate, ttl_secs, consume(0|1).
/// Floats are returned as strings because Lua numbers become Redis integers.
const TAKE_LUA: &str = r"
redis.replicate_commands()
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local ttl = tonumber(ARGV[3])
local consume = tonumber(ARGV[4])

local t = redis.call('TIME')
local now = tonumber(t[1]) + tonumber(t[2]) / 1000000

local state = redis.call('HMGET', KEYS[1], 'tokens', 'ts')
local tokens = tonumber(state[1])
local ts = tonumber(state[2])
if tokens == nil or ts == nil then
  tokens = capacity
  ts = now
end

local elapsed = math.max(0, now - ts)
tokens = math.min(capacity, tokens + elapsed * rate)

local allowed = 0
local wait = 0
if tokens >= 1 then
  allowed = 1
  if consume == 1 then
    tokens = tokens - 1
  end
else
  wait = (1 - tokens) / rate
end

redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'ts', tostring(math.max(now, ts)))
redis.call('EXPIRE', KEYS[1], ttl)
return {allowed, tostring(tokens), tostring(wait)}
";

static TAKE_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(TAKE_LUA));

/// Default bound on a single store round trip
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Redis-backed [`BucketStore`]
///
/// Every call is a single `EVALSHA` of one script, so check and consume can't
/// interleave between processes. Any Redis failure or timeout surfaces as
/// [`Error::RateLimiterUnavailable`].
#[derive(Clone)]
pub struct RedisBucketStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisBucketStore {
    /// Wrap an already established connection
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(DEFAULT_OP_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| Error::limiter_unavailable(format!("timed out connecting to {url}")))??;
        Ok(Self::new(conn))
    }

    /// Override the per-call timeout
    #[must_use]
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for RedisBucketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBucketStore")
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BucketStore for RedisBucketStore {
    async fn take(
        &self,
        key: &str,
        config: &BucketConfig,
        ttl: Duration,
        consume: bool,
    ) -> Result<BucketDecision> {
        let mut conn = self.conn.clone();
        let mut invocation = TAKE_SCRIPT.key(key);
        invocation
            .arg(config.capacity())
            .arg(config.refill_rate())
            .arg(ttl.as_secs().max(1))
            .arg(u8::from(consume));

        let reply: (i64, String, String) =
            tokio::time::timeout(self.op_timeout, invocation.invoke_async(&mut conn))
                .await
                .map_err(|_| Error::limiter_unavailable("redis call timed out"))??;

        parse_reply(reply)
    }
}

fn parse_reply((allowed, remaining, wait): (i64, String, String)) -> Result<BucketDecision> {
    let remaining: f64 = remaining
        .parse()
        .map_err(|_| Error::limiter_unavailable(format!("bad remaining in reply: {remaining}")))?;
    let wait: f64 = wait
        .parse()
        .map_err(|_| Error::limiter_unavailable(format!("bad wait in reply: {wait}")))?;
    if !(wait.is_finite() && wait >= 0.0) {
        return Err(Error::limiter_unavailable(format!("bad wait in reply: {wait}")));
    }
    Ok(BucketDecision {
        allowed: allowed == 1,
        remaining,
        wait: secs_to_duration(wait),
    })
}
