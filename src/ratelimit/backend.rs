//! Admission check seam consumed by request middleware.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// Trait for admission checks.
///
/// Middleware depends on this rather than on [`RateLimiter`] directly, so it
/// can be exercised against a stub.
///
/// [`RateLimiter`]: super::RateLimiter
#[async_trait]
pub trait AdmissionCheck: Send + Sync {
    /// `Ok(true)` admits the request, `Ok(false)` rejects it. An error is
    /// neither; see [`FailurePolicy`].
    async fn allow(&self, service: &str, endpoint: &str) -> Result<bool>;
}

/// How a caller turns an admission error into a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request when the limiter fails
    Open,
    /// Reject the request when the limiter fails
    Closed,
}

impl FailurePolicy {
    /// Collapse an admission outcome into a decision, logging any error.
    pub fn decide(&self, service: &str, endpoint: &str, outcome: Result<bool>) -> bool {
        match outcome {
            Ok(admitted) => admitted,
            Err(e) => {
                let admitted = matches!(self, FailurePolicy::Open);
                warn!(
                    service,
                    endpoint,
                    error = %e,
                    kind = ?e.kind(),
                    admitted,
                    "Rate limiter failed, applying failure policy"
                );
                admitted
            }
        }
    }
}
