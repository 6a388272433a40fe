//! Redis-backed shared state store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult, Script};
use tracing::{info, trace};

use super::{Bucket, BucketOutcome, SharedStateStore};
use crate::config::StoreConfig;
use crate::error::{LimiterError, Result};

/// Increment that applies the lifetime only when the key did not exist.
const INCR_SCRIPT: &str = r#"
local created = redis.call('EXISTS', KEYS[1]) == 0
local current = redis.call('INCRBY', KEYS[1], ARGV[1])
local ttl = tonumber(ARGV[2])
if created and ttl > 0 then
    redis.call('PEXPIRE', KEYS[1], ttl)
end
return current
"#;

/// Insert, trim, count and refresh the lifetime of a rolling window log in one step.
const WINDOW_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
redis.call('ZADD', KEYS[1], now, ARGV[3])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', '(' .. string.format('%d', now - window))
local count = redis.call('ZCARD', KEYS[1])
redis.call('PEXPIRE', KEYS[1], window)
return count
"#;

/// Settle a token or leaky bucket and try to admit one request in one step.
///
/// Returns `{admitted, content}`, or `{-1, 0}` when a stored value is not an integer.
const BUCKET_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local window = tonumber(ARGV[3])
local fills = ARGV[4] == 'level'

local content = redis.call('GET', KEYS[1])
if content then
    content = tonumber(content)
    if not content then return {-1, 0} end
elseif fills then
    content = 0
else
    content = capacity
end

local stamp = redis.call('GET', KEYS[2])
if stamp then
    stamp = tonumber(stamp)
    if not stamp then return {-1, 0} end
else
    stamp = now
end

local accrued = 0
if now > stamp then
    accrued = math.floor((now - stamp) * capacity / window)
end

local admitted = 0
if fills then
    content = math.max(content - accrued, 0)
    if content < capacity then
        content = content + 1
        admitted = 1
    end
else
    content = math.min(content + accrued, capacity)
    if content > 0 then
        content = content - 1
        admitted = 1
    end
end

redis.call('SET', KEYS[1], string.format('%d', content), 'PX', ARGV[3])
redis.call('SET', KEYS[2], ARGV[1], 'PX', ARGV[3])
return {admitted, content}
"#;

fn score_bound(score: i64) -> String {
    match score {
        i64::MIN => "-inf".to_string(),
        i64::MAX => "+inf".to_string(),
        s => s.to_string(),
    }
}

/// A [`SharedStateStore`] backed by a Redis-compatible server.
///
/// Uses a connection manager for automatic reconnection. Every call is bounded
/// by the configured operation timeout; a timeout surfaces as
/// [`LimiterError::StoreUnavailable`]. Dropping a call's future cancels it.
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
    incr_script: Script,
    window_script: Script,
    bucket_script: Script,
}

impl RedisStore {
    /// Connect to the server named in the configuration.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;

        let conn = tokio::time::timeout(config.connect_timeout(), ConnectionManager::new(client))
            .await
            .map_err(|_| LimiterError::StoreUnavailable("Connection timed out".to_string()))??;

        info!(url = %config.url, "Connected to Redis store");

        Ok(Self {
            conn,
            op_timeout: config.operation_timeout(),
            incr_script: Script::new(INCR_SCRIPT),
            window_script: Script::new(WINDOW_SCRIPT),
            bucket_script: Script::new(BUCKET_SCRIPT),
        })
    }

    async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        trace!(op, "Redis call");
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| LimiterError::StoreUnavailable(format!("{} timed out", op)))?
            .map_err(LimiterError::from)
    }
}

#[async_trait]
impl SharedStateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        self.run("GET", async move { conn.get(key).await }).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        self.run("SET", async move {
            match ttl {
                Some(ttl) => conn.pset_ex(key, value, ttl.as_millis() as u64).await,
                None => conn.set(key, value).await,
            }
        })
        .await
    }

    async fn incr(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64> {
        let mut conn = self.conn.clone();
        let ttl_ms = ttl.map(|d| d.as_millis() as i64).unwrap_or(0);
        let mut invocation = self.incr_script.prepare_invoke();
        invocation.key(key).arg(delta).arg(ttl_ms);
        self.run("INCR", async move { invocation.invoke_async(&mut conn).await })
            .await
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        self.run("DECR", async move { conn.decr(key, 1).await }).await
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        self.run("ZADD", async move { conn.zadd(key, member, score).await })
            .await
    }

    async fn zrem_range_by_score(&self, key: &str, min: i64, max: i64) -> Result<u64> {
        let mut conn = self.conn.clone();
        self.run("ZREMRANGEBYSCORE", async move {
            conn.zrembyscore(key, score_bound(min), score_bound(max))
                .await
        })
        .await
    }

    async fn zcount(&self, key: &str, min: i64, max: i64) -> Result<u64> {
        let mut conn = self.conn.clone();
        self.run("ZCOUNT", async move {
            conn.zcount(key, score_bound(min), score_bound(max)).await
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        self.run("PEXPIRE", async move {
            conn.pexpire(key, ttl.as_millis() as i64).await
        })
        .await
    }

    async fn record_in_window(
        &self,
        key: &str,
        now: i64,
        window: Duration,
        member: &str,
    ) -> Result<u64> {
        let mut conn = self.conn.clone();
        let mut invocation = self.window_script.prepare_invoke();
        invocation
            .key(key)
            .arg(now)
            .arg(window.as_millis() as i64)
            .arg(member);
        self.run("WINDOW", async move { invocation.invoke_async(&mut conn).await })
            .await
    }

    async fn admit_to_bucket(&self, bucket: &Bucket<'_>, now: i64) -> Result<BucketOutcome> {
        let mut conn = self.conn.clone();
        let mut invocation = self.bucket_script.prepare_invoke();
        invocation
            .key(bucket.content_key)
            .key(bucket.stamp_key)
            .arg(now)
            .arg(bucket.capacity)
            .arg(bucket.window_millis())
            .arg(bucket.kind.as_str());

        let (status, content): (i64, i64) = self
            .run("BUCKET", async move { invocation.invoke_async(&mut conn).await })
            .await?;
        if status < 0 {
            return Err(LimiterError::Serialization(format!(
                "bucket state at {} is not an integer",
                bucket.content_key
            )));
        }

        Ok(BucketOutcome {
            admitted: status == 1,
            content,
        })
    }
}
