//! Limit configuration lookup.

use std::sync::Arc;

use tracing::{debug, trace};

use super::key::RateLimitKey;
use super::model::{LimitConfig, StoredLimitConfig};
use crate::error::Result;
use crate::store::SharedStateStore;

/// Resolves the effective configuration for a (service, endpoint) pair from
/// records previously published into the shared store.
pub struct ConfigResolver {
    store: Arc<dyn SharedStateStore>,
    key_prefix: String,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn SharedStateStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    /// Find the configuration for an endpoint, falling back to the service default.
    ///
    /// Returns `Ok(None)` when neither record exists. Store failures are
    /// returned as errors and never reported as "not found".
    pub async fn resolve(&self, service: &str, endpoint: &str) -> Result<Option<LimitConfig>> {
        let endpoint_key = RateLimitKey::endpoint(service, endpoint);
        if let Some(config) = self.load(&endpoint_key).await? {
            trace!(key = %endpoint_key, algorithm = %config.algorithm, "Resolved endpoint config");
            return Ok(Some(config));
        }

        let default_key = RateLimitKey::service_default(service);
        let config = self.load(&default_key).await?;
        match &config {
            Some(config) => debug!(
                key = %endpoint_key,
                algorithm = %config.algorithm,
                "Falling back to service default config"
            ),
            None => debug!(key = %endpoint_key, "No rate limit configured"),
        }
        Ok(config)
    }

    async fn load(&self, key: &RateLimitKey) -> Result<Option<LimitConfig>> {
        let Some(raw) = self.store.get(&key.config_key(&self.key_prefix)).await? else {
            return Ok(None);
        };

        let stored: StoredLimitConfig = serde_json::from_str(&raw)?;
        LimitConfig::try_from(stored).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::LimiterError;
    use crate::ratelimit::model::AlgorithmKind;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn setup() -> (Arc<MemoryStore>, ConfigResolver) {
        let store = Arc::new(MemoryStore::new(Arc::new(ManualClock::new(0))));
        let resolver = ConfigResolver::new(store.clone(), "rl");
        (store, resolver)
    }

    async fn put(store: &MemoryStore, key: &RateLimitKey, json: &str) {
        store.set(&key.config_key("rl"), json, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_endpoint_config_wins() {
        let (store, resolver) = setup();
        put(
            &store,
            &RateLimitKey::service_default("svc"),
            r#"{"service_name":"svc","algorithm":"fixed_window","max_requests":100,"time_window_ms":60000}"#,
        )
        .await;
        put(
            &store,
            &RateLimitKey::endpoint("svc", "/orders"),
            r#"{"service_name":"svc","endpoint":"/orders","algorithm":"token_bucket","max_requests":2,"time_window_ms":1000}"#,
        )
        .await;

        let config = resolver.resolve("svc", "/orders").await.unwrap().unwrap();
        assert_eq!(config.algorithm, AlgorithmKind::TokenBucket);
        assert_eq!(config.max_requests, 2);
        assert_eq!(config.time_window, Duration::from_secs(1));

        let config = resolver.resolve("svc", "/other").await.unwrap().unwrap();
        assert_eq!(config.algorithm, AlgorithmKind::FixedWindow);
        assert_eq!(config.endpoint, None);
    }

    #[tokio::test]
    async fn test_not_found() {
        let (_, resolver) = setup();
        assert!(resolver.resolve("svc", "/orders").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let (store, resolver) = setup();
        put(&store, &RateLimitKey::endpoint("svc", "/orders"), "not json").await;

        let err = resolver.resolve("svc", "/orders").await.unwrap_err();
        assert!(matches!(err, LimiterError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_unknown_algorithm_is_an_error() {
        let (store, resolver) = setup();
        put(
            &store,
            &RateLimitKey::service_default("svc"),
            r#"{"service_name":"svc","algorithm":"gcra","max_requests":1,"time_window_ms":1000}"#,
        )
        .await;

        let err = resolver.resolve("svc", "/orders").await.unwrap_err();
        assert!(matches!(err, LimiterError::UnsupportedAlgorithm(_)));
    }
}
