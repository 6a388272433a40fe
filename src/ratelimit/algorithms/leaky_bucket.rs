//! Leaky bucket.

use async_trait::async_trait;
use tracing::trace;

use super::{Evaluation, Strategy};
use crate::error::Result;
use crate::ratelimit::model::AlgorithmKind;
use crate::store::{Bucket, BucketKind};

/// A bucket holding up to `max_requests` units, filled one unit per admitted
/// request and drained at `max_requests / time_window`.
///
/// The bucket starts empty. Leakage is counted in whole units and the leak
/// timestamp always moves to the request time. Both state keys get a lifetime
/// of `time_window` on every write; by then the bucket would have drained.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeakyBucket;

#[async_trait]
impl Strategy for LeakyBucket {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::LeakyBucket
    }

    async fn evaluate(&self, eval: &Evaluation<'_>) -> Result<bool> {
        let level_key = eval.state_key("lb:level");
        let leak_key = eval.state_key("lb:leaked_at");
        let bucket = Bucket {
            kind: BucketKind::Level,
            content_key: &level_key,
            stamp_key: &leak_key,
            capacity: eval.capacity(),
            window: eval.config.time_window,
        };

        let outcome = eval.store.admit_to_bucket(&bucket, eval.now).await?;
        trace!(
            key = %eval.key,
            level = outcome.content,
            admitted = outcome.admitted,
            "Leaky bucket settled"
        );
        Ok(outcome.admitted)
    }
}
