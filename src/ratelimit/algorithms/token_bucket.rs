//! Token bucket.

use async_trait::async_trait;
use tracing::trace;

use super::{Evaluation, Strategy};
use crate::error::Result;
use crate::ratelimit::model::AlgorithmKind;
use crate::store::{Bucket, BucketKind};

/// A bucket of `max_requests` tokens refilled at `max_requests / time_window`.
///
/// The bucket starts full. Refill is counted in whole tokens and the refill
/// timestamp always moves to the request time, so a fraction of a token
/// accrued between two requests is discarded. Both state keys get a lifetime
/// of `time_window` on every write; a bucket idle for a whole window expires
/// and starts full again, which is the state it would have refilled to anyway.
///
/// Refill, admission and write-back are one store call
/// ([`admit_to_bucket`](crate::store::SharedStateStore::admit_to_bucket)),
/// atomic on the Redis and memory stores.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenBucket;

#[async_trait]
impl Strategy for TokenBucket {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::TokenBucket
    }

    async fn evaluate(&self, eval: &Evaluation<'_>) -> Result<bool> {
        let tokens_key = eval.state_key("tb:tokens");
        let refill_key = eval.state_key("tb:refilled_at");
        let bucket = Bucket {
            kind: BucketKind::Tokens,
            content_key: &tokens_key,
            stamp_key: &refill_key,
            capacity: eval.capacity(),
            window: eval.config.time_window,
        };

        let outcome = eval.store.admit_to_bucket(&bucket, eval.now).await?;
        trace!(
            key = %eval.key,
            tokens = outcome.content,
            admitted = outcome.admitted,
            "Token bucket settled"
        );
        Ok(outcome.admitted)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::ratelimit::algorithms::testing::{limit, Harness};
    use crate::ratelimit::key::RateLimitKey;
    use crate::ratelimit::model::AlgorithmKind;
    use crate::store::SharedStateStore;

    #[tokio::test]
    async fn test_drain_and_refill() {
        let h = Harness::new();
        let key = RateLimitKey::endpoint("svc", "/orders");
        let config = limit(AlgorithmKind::TokenBucket, 2, Duration::from_secs(2));

        assert!(h.hit(&key, &config).await);
        assert!(h.hit(&key, &config).await);
        assert!(!h.hit(&key, &config).await);

        h.clock.advance(Duration::from_secs(1));
        assert!(h.hit(&key, &config).await);
        assert!(!h.hit(&key, &config).await);
    }

    #[tokio::test]
    async fn test_never_exceeds_capacity() {
        let h = Harness::new();
        let key = RateLimitKey::endpoint("svc", "/orders");
        let config = limit(AlgorithmKind::TokenBucket, 4, Duration::from_secs(4));

        assert!(h.hit(&key, &config).await);

        // Three tokens accrue on top of the three left, capped at four
        h.clock.advance(Duration::from_millis(3900));
        for _ in 0..4 {
            assert!(h.hit(&key, &config).await);
        }
        assert!(!h.hit(&key, &config).await);
    }

    #[tokio::test]
    async fn test_idle_bucket_starts_full() {
        let h = Harness::new();
        let key = RateLimitKey::endpoint("svc", "/orders");
        let config = limit(AlgorithmKind::TokenBucket, 2, Duration::from_secs(2));

        assert!(h.hit(&key, &config).await);
        assert!(h.hit(&key, &config).await);
        assert!(!h.hit(&key, &config).await);

        h.clock.advance(Duration::from_secs(30));
        assert!(h.hit(&key, &config).await);
        assert!(h.hit(&key, &config).await);
        assert!(!h.hit(&key, &config).await);
    }

    #[tokio::test]
    async fn test_fractional_refill_is_discarded() {
        let h = Harness::new();
        let key = RateLimitKey::endpoint("svc", "/orders");
        let config = limit(AlgorithmKind::TokenBucket, 1, Duration::from_secs(1));

        assert!(h.hit(&key, &config).await);

        // Two half-token intervals never add up to a token
        h.clock.advance(Duration::from_millis(500));
        assert!(!h.hit(&key, &config).await);
        h.clock.advance(Duration::from_millis(500));
        assert!(!h.hit(&key, &config).await);
    }

    #[tokio::test]
    async fn test_state_carries_lifetime() {
        let h = Harness::new();
        let key = RateLimitKey::endpoint("svc", "/orders");
        let config = limit(AlgorithmKind::TokenBucket, 3, Duration::from_secs(5));

        assert!(h.hit(&key, &config).await);
        let tokens_key = key.state_key("rl", "tb:tokens");
        assert_eq!(h.store.get(&tokens_key).await.unwrap().as_deref(), Some("2"));

        h.clock.advance(Duration::from_secs(5));
        assert!(h.store.get(&tokens_key).await.unwrap().is_none());
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_every_evaluation_refreshes_lifetime() {
        let h = Harness::new();
        let key = RateLimitKey::endpoint("svc", "/orders");
        let config = limit(AlgorithmKind::TokenBucket, 1, Duration::from_secs(2));
        let tokens_key = key.state_key("rl", "tb:tokens");

        assert!(h.hit(&key, &config).await);
        h.clock.advance(Duration::from_millis(1500));
        assert!(!h.hit(&key, &config).await);

        // The denied request rewrote both keys with a fresh window
        h.clock.advance(Duration::from_secs(1));
        assert_eq!(h.store.get(&tokens_key).await.unwrap().as_deref(), Some("0"));

        h.clock.advance(Duration::from_secs(1));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_state_is_an_error() {
        let h = Harness::new();
        let key = RateLimitKey::endpoint("svc", "/orders");
        let config = limit(AlgorithmKind::TokenBucket, 3, Duration::from_secs(5));

        h.store
            .set(&key.state_key("rl", "tb:tokens"), "lots", None)
            .await
            .unwrap();

        let err = h.engine.evaluate(&key, &config).await.unwrap_err();
        assert!(matches!(err, crate::error::LimiterError::Serialization(_)));
    }
}
