//! Limit configuration types.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::key::RateLimitKey;
use crate::error::{LimiterError, Result};

/// The admission-control algorithm applied to a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
    LeakyBucket,
}

impl AlgorithmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::FixedWindow => "fixed_window",
            AlgorithmKind::SlidingWindow => "sliding_window",
            AlgorithmKind::TokenBucket => "token_bucket",
            AlgorithmKind::LeakyBucket => "leaky_bucket",
        }
    }
}

impl FromStr for AlgorithmKind {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixed_window" => Ok(AlgorithmKind::FixedWindow),
            "sliding_window" => Ok(AlgorithmKind::SlidingWindow),
            "token_bucket" => Ok(AlgorithmKind::TokenBucket),
            "leaky_bucket" => Ok(AlgorithmKind::LeakyBucket),
            other => Err(LimiterError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for one limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitConfig {
    pub service_name: String,
    /// `None` denotes the service-wide default
    pub endpoint: Option<String>,
    pub algorithm: AlgorithmKind,
    /// Maximum requests allowed per time window
    pub max_requests: u64,
    pub time_window: Duration,
}

impl LimitConfig {
    /// Check the invariants every published configuration must hold.
    pub fn validate(&self) -> Result<()> {
        if self.service_name.is_empty() {
            return Err(LimiterError::InvalidConfig(
                "service_name must not be empty".to_string(),
            ));
        }
        if self.max_requests == 0 {
            return Err(LimiterError::InvalidConfig(format!(
                "{}: max_requests must be positive",
                self.key()
            )));
        }
        if self.max_requests > i64::MAX as u64 {
            return Err(LimiterError::InvalidConfig(format!(
                "{}: max_requests must not exceed {}",
                self.key(),
                i64::MAX
            )));
        }
        if self.time_window.as_millis() == 0 {
            return Err(LimiterError::InvalidConfig(format!(
                "{}: time_window must be at least one millisecond",
                self.key()
            )));
        }
        if self.time_window.as_millis() > i64::MAX as u128 {
            return Err(LimiterError::InvalidConfig(format!(
                "{}: time_window must not exceed {} milliseconds",
                self.key(),
                i64::MAX
            )));
        }
        Ok(())
    }

    /// The key this configuration is published under.
    pub fn key(&self) -> RateLimitKey {
        match &self.endpoint {
            Some(endpoint) => RateLimitKey::endpoint(&self.service_name, endpoint),
            None => RateLimitKey::service_default(&self.service_name),
        }
    }

    /// Window length in milliseconds, saturating for windows `validate` rejects.
    pub fn window_millis(&self) -> i64 {
        i64::try_from(self.time_window.as_millis()).unwrap_or(i64::MAX)
    }
}

/// The JSON record a configuration is stored as.
///
/// Numeric fields are signed and the algorithm is free text so that a
/// malformed record decodes far enough to be reported precisely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredLimitConfig {
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub algorithm: String,
    pub max_requests: i64,
    pub time_window_ms: i64,
}

impl From<&LimitConfig> for StoredLimitConfig {
    fn from(config: &LimitConfig) -> Self {
        Self {
            service_name: config.service_name.clone(),
            endpoint: config.endpoint.clone(),
            algorithm: config.algorithm.as_str().to_string(),
            max_requests: i64::try_from(config.max_requests).unwrap_or(i64::MAX),
            time_window_ms: config.window_millis(),
        }
    }
}

impl TryFrom<StoredLimitConfig> for LimitConfig {
    type Error = LimiterError;

    fn try_from(stored: StoredLimitConfig) -> Result<Self> {
        let algorithm = stored.algorithm.parse()?;
        if stored.max_requests <= 0 || stored.time_window_ms <= 0 {
            return Err(LimiterError::Serialization(format!(
                "stored config for {} has non-positive limits",
                stored.service_name
            )));
        }

        Ok(Self {
            service_name: stored.service_name,
            endpoint: stored.endpoint,
            algorithm,
            max_requests: stored.max_requests as u64,
            time_window: Duration::from_millis(stored.time_window_ms as u64),
        })
    }
}
