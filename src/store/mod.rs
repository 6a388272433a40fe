//! Shared state store abstraction.
//!
//! All limiter state lives behind [`SharedStateStore`]. The engine receives the
//! store through construction and never assumes more consistency than the
//! primitives below provide.

mod bucket;
mod memory;
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::clock::SystemClock;
use crate::config::{StoreBackend, StoreConfig};
use crate::error::{LimiterError, Result};

pub use self::bucket::{Bucket, BucketKind, BucketOutcome};
pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Key/value store with counters and sorted sets, shared by every limiter instance.
///
/// Scores are millisecond timestamps. `i64::MIN` and `i64::MAX` stand for open
/// bounds in range operations.
#[async_trait]
pub trait SharedStateStore: Send + Sync {
    /// Read a scalar value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a scalar value, replacing any previous value and lifetime.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Add `delta` to an integer value and return the result.
    ///
    /// A missing key counts as zero. `ttl` is applied only when this call
    /// created the key; an existing lifetime is left untouched.
    async fn incr(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64>;

    /// Subtract one from an integer value and return the result.
    async fn decr(&self, key: &str) -> Result<i64>;

    /// Insert `member` into the sorted set at `key` with the given score.
    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<()>;

    /// Remove members whose score lies in `[min, max]`, returning how many were removed.
    async fn zrem_range_by_score(&self, key: &str, min: i64, max: i64) -> Result<u64>;

    /// Count members whose score lies in `[min, max]`.
    async fn zcount(&self, key: &str, min: i64, max: i64) -> Result<u64>;

    /// Set the lifetime of an existing key. Missing keys are ignored.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Record one request in a rolling window log and return the number of
    /// entries left in the window, including this one.
    ///
    /// Inserts `member` at `now`, drops entries older than `now - window`,
    /// counts the rest and refreshes the lifetime to `window`. This default
    /// issues the four steps separately, so concurrent callers on one key can
    /// observe a count that is off by one. Stores that can run the sequence
    /// atomically override it.
    async fn record_in_window(
        &self,
        key: &str,
        now: i64,
        window: Duration,
        member: &str,
    ) -> Result<u64> {
        let window_ms = window.as_millis() as i64;

        self.zadd(key, now, member).await?;
        self.zrem_range_by_score(key, i64::MIN, now - window_ms - 1)
            .await?;
        let count = self.zcount(key, i64::MIN, i64::MAX).await?;
        self.expire(key, window).await?;

        Ok(count)
    }

    /// Settle a token or leaky bucket at `now` and try to admit one request.
    ///
    /// Reads the content and stamp, applies whole-unit accrual since the
    /// stamp, then writes the new content and `now` back, both with a lifetime
    /// of the bucket window. A non-integer stored value is a
    /// [`LimiterError::Serialization`] error.
    ///
    /// This default issues the reads and writes separately, so concurrent
    /// callers on one bucket can all see the same content and all be admitted.
    /// Stores that can run the sequence atomically override it.
    async fn admit_to_bucket(&self, bucket: &Bucket<'_>, now: i64) -> Result<BucketOutcome> {
        let content = read_integer(self.get(bucket.content_key).await?, bucket.content_key)?;
        let stamp = read_integer(self.get(bucket.stamp_key).await?, bucket.stamp_key)?;

        let outcome = bucket.settle(content, stamp, now);

        let ttl = Some(bucket.window);
        self.set(bucket.content_key, &outcome.content.to_string(), ttl)
            .await?;
        self.set(bucket.stamp_key, &now.to_string(), ttl).await?;

        Ok(outcome)
    }
}

fn read_integer(raw: Option<String>, key: &str) -> Result<Option<i64>> {
    match raw {
        None => Ok(None),
        Some(raw) => raw.parse::<i64>().map(Some).map_err(|_| {
            LimiterError::Serialization(format!("state {} holds {:?}, expected an integer", key, raw))
        }),
    }
}

/// Build the store selected by the configuration.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn SharedStateStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-process memory store");
            Ok(Arc::new(MemoryStore::new(Arc::new(SystemClock))))
        }
        StoreBackend::Redis => {
            let store = RedisStore::connect(config).await?;
            Ok(Arc::new(store))
        }
    }
}
