//! Admission-control algorithms.
//!
//! Each algorithm is a stateless [`Strategy`]; all of its state lives in the
//! shared store under keys derived from the limiter's [`RateLimitKey`].

mod fixed_window;
mod leaky_bucket;
mod sliding_window;
mod token_bucket;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::key::RateLimitKey;
use super::model::{AlgorithmKind, LimitConfig};
use crate::clock::Clock;
use crate::error::Result;
use crate::store::SharedStateStore;

pub use fixed_window::FixedWindow;
pub use leaky_bucket::LeakyBucket;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

/// Everything a strategy needs to evaluate one request.
pub struct Evaluation<'a> {
    pub store: &'a dyn SharedStateStore,
    pub key: &'a RateLimitKey,
    pub config: &'a LimitConfig,
    /// Request time in milliseconds since the Unix epoch
    pub now: i64,
    key_prefix: &'a str,
}

impl Evaluation<'_> {
    /// Store key for one piece of this limiter's state.
    pub fn state_key(&self, part: &str) -> String {
        self.key.state_key(self.key_prefix, part)
    }

    /// `max_requests` as a store integer. Published configs never exceed `i64::MAX`.
    pub fn capacity(&self) -> i64 {
        i64::try_from(self.config.max_requests).unwrap_or(i64::MAX)
    }
}

/// One admission-control algorithm.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> AlgorithmKind;

    /// Decide whether the request is admitted, recording it in the store.
    async fn evaluate(&self, eval: &Evaluation<'_>) -> Result<bool>;
}

static FIXED_WINDOW: FixedWindow = FixedWindow;
static SLIDING_WINDOW: SlidingWindow = SlidingWindow;
static TOKEN_BUCKET: TokenBucket = TokenBucket;
static LEAKY_BUCKET: LeakyBucket = LeakyBucket;

/// Dispatches a request to the strategy named by its configuration.
pub struct AlgorithmEngine {
    store: Arc<dyn SharedStateStore>,
    clock: Arc<dyn Clock>,
    key_prefix: String,
}

impl AlgorithmEngine {
    pub fn new(
        store: Arc<dyn SharedStateStore>,
        clock: Arc<dyn Clock>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            key_prefix: key_prefix.into(),
        }
    }

    /// The strategy implementing an algorithm.
    pub fn strategy(kind: AlgorithmKind) -> &'static dyn Strategy {
        match kind {
            AlgorithmKind::FixedWindow => &FIXED_WINDOW,
            AlgorithmKind::SlidingWindow => &SLIDING_WINDOW,
            AlgorithmKind::TokenBucket => &TOKEN_BUCKET,
            AlgorithmKind::LeakyBucket => &LEAKY_BUCKET,
        }
    }

    /// Evaluate one request for `key` under `config`.
    pub async fn evaluate(&self, key: &RateLimitKey, config: &LimitConfig) -> Result<bool> {
        let eval = Evaluation {
            store: self.store.as_ref(),
            key,
            config,
            now: self.clock.now_millis(),
            key_prefix: &self.key_prefix,
        };

        trace!(
            key = %key,
            algorithm = %config.algorithm,
            max_requests = config.max_requests,
            "Evaluating rate limit"
        );

        let admitted = Self::strategy(config.algorithm).evaluate(&eval).await?;
        if !admitted {
            debug!(key = %key, algorithm = %config.algorithm, "Rate limit exceeded");
        }
        Ok(admitted)
    }
}
