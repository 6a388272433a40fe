//! Fixed window counter.

use async_trait::async_trait;

use super::{Evaluation, Strategy};
use crate::error::Result;
use crate::ratelimit::model::AlgorithmKind;

/// Counts requests in consecutive windows of `time_window`.
///
/// The window starts at the first increment and ends when the counter's
/// lifetime runs out, so it is not aligned to calendar boundaries. Two bursts
/// either side of a boundary can together exceed `max_requests` within less
/// than one window.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedWindow;

#[async_trait]
impl Strategy for FixedWindow {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::FixedWindow
    }

    async fn evaluate(&self, eval: &Evaluation<'_>) -> Result<bool> {
        let count = eval
            .store
            .incr(&eval.state_key("fw"), 1, Some(eval.config.time_window))
            .await?;

        Ok(count <= eval.capacity())
    }
}
