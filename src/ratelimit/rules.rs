//! Rate limit rules configuration and publication.
//!
//! Rules are authored as YAML, validated, and written into the shared store
//! where [`ConfigResolver`](super::ConfigResolver) reads them. Invalid limits
//! are rejected here so the engine never sees them.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::model::{AlgorithmKind, LimitConfig, StoredLimitConfig};
use crate::error::{LimiterError, Result};
use crate::store::SharedStateStore;

/// A complete rules document containing multiple services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesDocument {
    #[serde(default)]
    pub services: Vec<ServiceRules>,
}

/// Rules for a single service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRules {
    pub service_name: String,
    /// Limit applied to endpoints without a rule of their own
    #[serde(default)]
    pub default: Option<LimitRule>,
    #[serde(default)]
    pub endpoints: Vec<EndpointRule>,
}

/// A rule for one endpoint of a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointRule {
    pub endpoint: String,
    #[serde(flatten)]
    pub limit: LimitRule,
}

/// Algorithm and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitRule {
    pub algorithm: AlgorithmKind,
    pub max_requests: u64,
    pub time_window_ms: u64,
}

impl LimitRule {
    fn to_config(&self, service: &str, endpoint: Option<&str>) -> LimitConfig {
        LimitConfig {
            service_name: service.to_string(),
            endpoint: endpoint.map(str::to_string),
            algorithm: self.algorithm,
            max_requests: self.max_requests,
            time_window: Duration::from_millis(self.time_window_ms),
        }
    }
}

impl RulesDocument {
    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let parse_error =
            |e: serde_yaml::Error| LimiterError::Config(format!("Failed to parse rate limit rules: {}", e));

        let value: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(parse_error)?;
        if value.get("services").is_some() {
            return serde_yaml::from_value(value).map_err(parse_error);
        }

        // A file holding a single service is accepted as-is
        let service: ServiceRules = serde_yaml::from_value(value).map_err(parse_error)?;
        Ok(Self {
            services: vec![service],
        })
    }

    /// Flatten the document into validated configurations.
    ///
    /// Fails on the first invalid rule, so a bad document publishes nothing.
    pub fn limit_configs(&self) -> Result<Vec<LimitConfig>> {
        let mut configs = Vec::new();
        for service in &self.services {
            if let Some(rule) = &service.default {
                configs.push(rule.to_config(&service.service_name, None));
            }
            for rule in &service.endpoints {
                configs.push(rule.limit.to_config(&service.service_name, Some(&rule.endpoint)));
            }
        }

        for config in &configs {
            config.validate()?;
        }
        Ok(configs)
    }
}

/// Writes limit configurations into the shared store.
///
/// Records are permanent unless a lifetime is set. A publisher that runs
/// periodically sets one longer than its period, so a rule dropped from the
/// document expires instead of applying forever.
pub struct ConfigPublisher {
    store: Arc<dyn SharedStateStore>,
    key_prefix: String,
    record_ttl: Option<Duration>,
}

impl ConfigPublisher {
    pub fn new(store: Arc<dyn SharedStateStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            record_ttl: None,
        }
    }

    /// Give every published record a lifetime.
    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = Some(ttl);
        self
    }

    /// Validate and publish one configuration.
    pub async fn publish_config(&self, config: &LimitConfig) -> Result<()> {
        config.validate()?;

        let key = config.key();
        let record = serde_json::to_string(&StoredLimitConfig::from(config))?;
        self.store
            .set(&key.config_key(&self.key_prefix), &record, self.record_ttl)
            .await?;

        debug!(key = %key, algorithm = %config.algorithm, "Published limit config");
        Ok(())
    }

    /// Validate every rule in the document, then publish them all.
    ///
    /// Returns the number of configurations written.
    pub async fn publish(&self, rules: &RulesDocument) -> Result<usize> {
        let configs = rules.limit_configs()?;
        for config in &configs {
            self.publish_config(config).await?;
        }

        info!(
            services = rules.services.len(),
            configs = configs.len(),
            "Rate limit rules published"
        );
        Ok(configs.len())
    }
}
