//! Sliding window log.

use async_trait::async_trait;
use uuid::Uuid;

use super::{Evaluation, Strategy};
use crate::error::Result;
use crate::ratelimit::model::AlgorithmKind;

/// Counts requests in the trailing `time_window` using a timestamp log.
///
/// Every request, admitted or not, is logged. The insert, trim, count and
/// lifetime refresh run through [`SharedStateStore::record_in_window`], which
/// is atomic on stores that support it.
///
/// [`SharedStateStore::record_in_window`]: crate::store::SharedStateStore::record_in_window
#[derive(Debug, Default, Clone, Copy)]
pub struct SlidingWindow;

#[async_trait]
impl Strategy for SlidingWindow {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::SlidingWindow
    }

    async fn evaluate(&self, eval: &Evaluation<'_>) -> Result<bool> {
        // Members must be unique or simultaneous requests collapse into one entry
        let member = format!("{}-{}", eval.now, Uuid::new_v4());

        let count = eval
            .store
            .record_in_window(
                &eval.state_key("sw"),
                eval.now,
                eval.config.time_window,
                &member,
            )
            .await?;

        Ok(count <= eval.config.max_requests)
    }
}
