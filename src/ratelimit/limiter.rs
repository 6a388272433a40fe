//! Core rate limiter implementation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::algorithms::AlgorithmEngine;
use super::backend::AdmissionCheck;
use super::key::RateLimitKey;
use super::resolver::ConfigResolver;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::store::SharedStateStore;

/// The rate limiter facade: resolves the configuration for a request and runs
/// the configured algorithm against the shared store.
///
/// Holds no per-key state of its own and can be shared across tasks and
/// processes; all coordination happens in the store.
pub struct RateLimiter {
    resolver: ConfigResolver,
    engine: AlgorithmEngine,
}

impl RateLimiter {
    /// Create a rate limiter using wall-clock time.
    pub fn new(store: Arc<dyn SharedStateStore>, key_prefix: &str) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), key_prefix)
    }

    /// Create a rate limiter with an explicit time source.
    pub fn with_clock(
        store: Arc<dyn SharedStateStore>,
        clock: Arc<dyn Clock>,
        key_prefix: &str,
    ) -> Self {
        Self {
            resolver: ConfigResolver::new(store.clone(), key_prefix),
            engine: AlgorithmEngine::new(store, clock, key_prefix),
        }
    }

    /// Decide whether a request to `endpoint` of `service` is admitted.
    ///
    /// An unconfigured pair is admitted. Errors are returned as-is; choosing
    /// whether an error admits or denies is up to the caller.
    pub async fn allow(&self, service: &str, endpoint: &str) -> Result<bool> {
        let Some(config) = self.resolver.resolve(service, endpoint).await? else {
            trace!(service, endpoint, "Unconfigured, admitting");
            return Ok(true);
        };

        // State is always kept per requested endpoint, even under the service
        // default, so endpoints never share counters.
        let key = RateLimitKey::endpoint(service, endpoint);
        self.engine.evaluate(&key, &config).await
    }
}

#[async_trait]
impl AdmissionCheck for RateLimiter {
    async fn allow(&self, service: &str, endpoint: &str) -> Result<bool> {
        RateLimiter::allow(self, service, endpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::LimiterError;
    use crate::ratelimit::model::{AlgorithmKind, LimitConfig};
    use crate::ratelimit::rules::ConfigPublisher;
    use crate::store::MemoryStore;
    use std::time::Duration;

    struct Setup {
        clock: Arc<ManualClock>,
        publisher: ConfigPublisher,
        limiter: RateLimiter,
    }

    fn setup() -> Setup {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store: Arc<dyn SharedStateStore> = Arc::new(MemoryStore::new(clock.clone()));
        Setup {
            clock: clock.clone(),
            publisher: ConfigPublisher::new(store.clone(), "rate_limit"),
            limiter: RateLimiter::with_clock(store, clock, "rate_limit"),
        }
    }

    fn limit(
        endpoint: Option<&str>,
        algorithm: AlgorithmKind,
        max_requests: u64,
        window: Duration,
    ) -> LimitConfig {
        LimitConfig {
            service_name: "inventory".to_string(),
            endpoint: endpoint.map(str::to_string),
            algorithm,
            max_requests,
            time_window: window,
        }
    }

    /// A store whose every call fails.
    struct DownStore;

    #[async_trait]
    impl SharedStateStore for DownStore {
        async fn get(&self, _: &str) -> Result<Option<String>> {
            Err(LimiterError::StoreUnavailable("connection refused".to_string()))
        }
        async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<()> {
            Err(LimiterError::StoreUnavailable("connection refused".to_string()))
        }
        async fn incr(&self, _: &str, _: i64, _: Option<Duration>) -> Result<i64> {
            Err(LimiterError::StoreUnavailable("connection refused".to_string()))
        }
        async fn decr(&self, _: &str) -> Result<i64> {
            Err(LimiterError::StoreUnavailable("connection refused".to_string()))
        }
        async fn zadd(&self, _: &str, _: i64, _: &str) -> Result<()> {
            Err(LimiterError::StoreUnavailable("connection refused".to_string()))
        }
        async fn zrem_range_by_score(&self, _: &str, _: i64, _: i64) -> Result<u64> {
            Err(LimiterError::StoreUnavailable("connection refused".to_string()))
        }
        async fn zcount(&self, _: &str, _: i64, _: i64) -> Result<u64> {
            Err(LimiterError::StoreUnavailable("connection refused".to_string()))
        }
        async fn expire(&self, _: &str, _: Duration) -> Result<()> {
            Err(LimiterError::StoreUnavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_unconfigured_pair_is_admitted() {
        let s = setup();
        for _ in 0..100 {
            assert!(s.limiter.allow("inventory", "/orders").await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_fixed_window_through_facade() {
        let s = setup();
        s.publisher
            .publish_config(&limit(
                Some("/orders"),
                AlgorithmKind::FixedWindow,
                5,
                Duration::from_secs(60),
            ))
            .await
            .unwrap();

        for _ in 0..5 {
            assert!(s.limiter.allow("inventory", "/orders").await.unwrap());
        }
        assert!(!s.limiter.allow("inventory", "/orders").await.unwrap());

        s.clock.advance(Duration::from_secs(60));
        assert!(s.limiter.allow("inventory", "/orders").await.unwrap());
    }

    #[tokio::test]
    async fn test_endpoint_config_takes_precedence() {
        let s = setup();
        s.publisher
            .publish_config(&limit(
                None,
                AlgorithmKind::FixedWindow,
                100,
                Duration::from_secs(60),
            ))
            .await
            .unwrap();
        s.publisher
            .publish_config(&limit(
                Some("/orders"),
                AlgorithmKind::TokenBucket,
                1,
                Duration::from_secs(60),
            ))
            .await
            .unwrap();

        assert!(s.limiter.allow("inventory", "/orders").await.unwrap());
        assert!(!s.limiter.allow("inventory", "/orders").await.unwrap());

        // Other endpoints use the generous default
        for _ in 0..10 {
            assert!(s.limiter.allow("inventory", "/stock").await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_endpoints_do_not_share_counters() {
        let s = setup();
        s.publisher
            .publish_config(&limit(
                None,
                AlgorithmKind::SlidingWindow,
                2,
                Duration::from_secs(10),
            ))
            .await
            .unwrap();

        assert!(s.limiter.allow("inventory", "/a").await.unwrap());
        assert!(s.limiter.allow("inventory", "/a").await.unwrap());
        assert!(!s.limiter.allow("inventory", "/a").await.unwrap());

        assert!(s.limiter.allow("inventory", "/b").await.unwrap());
        assert!(s.limiter.allow("inventory", "/b").await.unwrap());
        assert!(!s.limiter.allow("inventory", "/b").await.unwrap());
    }

    #[tokio::test]
    async fn test_services_do_not_share_config() {
        let s = setup();
        s.publisher
            .publish_config(&limit(
                Some("/orders"),
                AlgorithmKind::LeakyBucket,
                1,
                Duration::from_secs(10),
            ))
            .await
            .unwrap();

        assert!(s.limiter.allow("inventory", "/orders").await.unwrap());
        assert!(!s.limiter.allow("inventory", "/orders").await.unwrap());
        assert!(s.limiter.allow("billing", "/orders").await.unwrap());
        assert!(s.limiter.allow("billing", "/orders").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_error_propagates() {
        let limiter = RateLimiter::new(Arc::new(DownStore), "rate_limit");

        let err = limiter.allow("inventory", "/orders").await.unwrap_err();
        assert!(matches!(err, LimiterError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_concurrent_requests_respect_fixed_window() {
        let s = setup();
        s.publisher
            .publish_config(&limit(
                Some("/orders"),
                AlgorithmKind::FixedWindow,
                10,
                Duration::from_secs(60),
            ))
            .await
            .unwrap();

        let limiter = Arc::new(s.limiter);
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.allow("inventory", "/orders").await.unwrap() })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let admitted = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(admitted, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_respect_buckets() {
        let s = setup();
        let cases = [
            ("/tokens", AlgorithmKind::TokenBucket),
            ("/level", AlgorithmKind::LeakyBucket),
        ];
        for (endpoint, algorithm) in cases {
            s.publisher
                .publish_config(&limit(Some(endpoint), algorithm, 10, Duration::from_secs(3600)))
                .await
                .unwrap();
        }

        let limiter = Arc::new(s.limiter);
        for (endpoint, _) in cases {
            let handles: Vec<_> = (0..50)
                .map(|_| {
                    let limiter = limiter.clone();
                    tokio::spawn(async move { limiter.allow("inventory", endpoint).await.unwrap() })
                })
                .collect();

            let results = futures::future::join_all(handles).await;
            let admitted = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
            assert_eq!(admitted, 10, "{}", endpoint);
        }
    }

    #[tokio::test]
    async fn test_admission_check_trait_object() {
        let s = setup();
        let check: Arc<dyn AdmissionCheck> = Arc::new(s.limiter);
        assert!(check.allow("inventory", "/orders").await.unwrap());
    }
}
