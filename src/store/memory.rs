//! In-process store, used for tests and single-instance deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::trace;

use super::{Bucket, BucketOutcome, SharedStateStore};
use crate::clock::Clock;
use crate::error::{LimiterError, Result};

#[derive(Debug, Clone)]
enum Value {
    Scalar(String),
    Sorted(HashMap<String, i64>),
}

#[derive(Debug, Default)]
struct Slot {
    value: Option<Value>,
    expires_at: Option<i64>,
}

impl Slot {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }

    fn clear(&mut self) {
        self.value = None;
        self.expires_at = None;
    }

    fn sorted_mut(&mut self, key: &str) -> Result<&mut HashMap<String, i64>> {
        match self.value.get_or_insert_with(|| Value::Sorted(HashMap::new())) {
            Value::Sorted(set) => Ok(set),
            Value::Scalar(_) => Err(wrong_type(key)),
        }
    }
}

fn wrong_type(key: &str) -> LimiterError {
    LimiterError::Serialization(format!("key {} holds the wrong kind of value", key))
}

fn in_range(score: i64, min: i64, max: i64) -> bool {
    score >= min && score <= max
}

/// Writes between two sweeps of expired entries.
const SWEEP_EVERY: u64 = 1024;

/// A [`SharedStateStore`] kept in process memory.
///
/// Every operation holds the shard lock of its key for its whole duration, so
/// each call, `record_in_window` included, is atomic. Bucket admissions touch
/// two keys and are serialized by a store-wide lock. Lifetimes are measured
/// against the injected clock; expired entries are dropped when read and by a
/// sweep that runs every [`SWEEP_EVERY`] writes.
pub struct MemoryStore {
    entries: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
    writes: AtomicU64,
    bucket_lock: Mutex<()>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            writes: AtomicU64::new(0),
            bucket_lock: Mutex::new(()),
        }
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut removed = 0;
        self.entries.retain(|_, slot| {
            let keep = slot.value.is_some() && !slot.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        trace!(removed, remaining = self.entries.len(), "Swept memory store");
        removed
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.entries
            .iter()
            .filter(|e| e.value.is_some() && !e.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` against the live slot for `key` while holding its lock.
    fn with_slot<T>(&self, key: &str, f: impl FnOnce(&mut Slot, i64) -> T) -> T {
        let now = self.clock.now_millis();
        let mut slot = self.entries.entry(key.to_string()).or_default();
        if slot.is_expired(now) {
            slot.clear();
        }

        let out = f(&mut *slot, now);
        let vacant = slot.value.is_none();
        drop(slot);

        if vacant {
            self.entries.remove_if(key, |_, s| s.value.is_none());
        }
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.purge_expired();
        }
        out
    }

    fn read_scalar(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_millis();
        {
            let Some(slot) = self.entries.get(key) else {
                return Ok(None);
            };
            if !slot.is_expired(now) {
                return match &slot.value {
                    None => Ok(None),
                    Some(Value::Scalar(v)) => Ok(Some(v.clone())),
                    Some(Value::Sorted(_)) => Err(wrong_type(key)),
                };
            }
        }

        self.entries.remove_if(key, |_, s| s.is_expired(now));
        Ok(None)
    }

    fn write_scalar(&self, key: &str, value: String, ttl: Option<Duration>) {
        self.with_slot(key, |slot, now| {
            slot.value = Some(Value::Scalar(value));
            slot.expires_at = ttl.map(|d| Self::ttl_deadline(now, d));
        });
    }

    fn read_integer(&self, key: &str) -> Result<Option<i64>> {
        match self.read_scalar(key)? {
            None => Ok(None),
            Some(raw) => raw.parse::<i64>().map(Some).map_err(|_| {
                LimiterError::Serialization(format!("state {} holds {:?}, expected an integer", key, raw))
            }),
        }
    }

    fn ttl_deadline(now: i64, ttl: Duration) -> i64 {
        now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl SharedStateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.read_scalar(key)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.write_scalar(key, value.to_string(), ttl);
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64> {
        self.with_slot(key, |slot, now| {
            let (current, created) = match &slot.value {
                None => (0, true),
                Some(Value::Scalar(v)) => {
                    let parsed = v.parse::<i64>().map_err(|_| {
                        LimiterError::Serialization(format!("key {} is not an integer", key))
                    })?;
                    (parsed, false)
                }
                Some(Value::Sorted(_)) => return Err(wrong_type(key)),
            };

            let updated = current.saturating_add(delta);
            slot.value = Some(Value::Scalar(updated.to_string()));
            if created {
                slot.expires_at = ttl.map(|d| Self::ttl_deadline(now, d));
            }
            Ok(updated)
        })
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        self.incr(key, -1, None).await
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<()> {
        self.with_slot(key, |slot, _| {
            slot.sorted_mut(key)?.insert(member.to_string(), score);
            Ok(())
        })
    }

    async fn zrem_range_by_score(&self, key: &str, min: i64, max: i64) -> Result<u64> {
        self.with_slot(key, |slot, _| {
            let (removed, drained) = match &mut slot.value {
                None => (0, false),
                Some(Value::Sorted(set)) => {
                    let before = set.len();
                    set.retain(|_, score| !in_range(*score, min, max));
                    (before - set.len(), set.is_empty())
                }
                Some(Value::Scalar(_)) => return Err(wrong_type(key)),
            };
            if drained {
                slot.clear();
            }
            Ok(removed as u64)
        })
    }

    async fn zcount(&self, key: &str, min: i64, max: i64) -> Result<u64> {
        self.with_slot(key, |slot, _| match &slot.value {
            None => Ok(0),
            Some(Value::Sorted(set)) => Ok(set
                .values()
                .filter(|score| in_range(**score, min, max))
                .count() as u64),
            Some(Value::Scalar(_)) => Err(wrong_type(key)),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.with_slot(key, |slot, now| {
            if slot.value.is_some() {
                slot.expires_at = Some(Self::ttl_deadline(now, ttl));
            }
        });
        Ok(())
    }

    async fn record_in_window(
        &self,
        key: &str,
        now: i64,
        window: Duration,
        member: &str,
    ) -> Result<u64> {
        let window_ms = window.as_millis() as i64;
        self.with_slot(key, |slot, clock_now| {
            let set = slot.sorted_mut(key)?;
            set.insert(member.to_string(), now);
            set.retain(|_, score| *score >= now - window_ms);
            let count = set.len() as u64;
            slot.expires_at = Some(Self::ttl_deadline(clock_now, window));
            Ok(count)
        })
    }

    async fn admit_to_bucket(&self, bucket: &Bucket<'_>, now: i64) -> Result<BucketOutcome> {
        let _guard = self.bucket_lock.lock();

        let content = self.read_integer(bucket.content_key)?;
        let stamp = self.read_integer(bucket.stamp_key)?;
        let outcome = bucket.settle(content, stamp, now);

        let ttl = Some(bucket.window);
        self.write_scalar(bucket.content_key, outcome.content.to_string(), ttl);
        self.write_scalar(bucket.stamp_key, now.to_string(), ttl);
        Ok(outcome)
    }
}
