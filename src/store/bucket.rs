//! Bucket arithmetic shared by the stores.

use std::time::Duration;

/// Which way a bucket moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketKind {
    /// Holds tokens. Starts full, refills over time, an admission takes one.
    Tokens,
    /// Holds queued units. Starts empty, drains over time, an admission adds one.
    Level,
}

impl BucketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketKind::Tokens => "tokens",
            BucketKind::Level => "level",
        }
    }
}

/// One bucket, stored as a content count and the time it was last settled.
///
/// The rate is `capacity` units per `window`.
#[derive(Debug, Clone, Copy)]
pub struct Bucket<'a> {
    pub kind: BucketKind,
    pub content_key: &'a str,
    pub stamp_key: &'a str,
    pub capacity: i64,
    pub window: Duration,
}

/// Result of one bucket admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketOutcome {
    pub admitted: bool,
    /// Content left in the bucket after this request
    pub content: i64,
}

impl Bucket<'_> {
    pub(crate) fn window_millis(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }

    /// Bring the stored state forward to `now` and try to admit one request.
    ///
    /// Missing content means a fresh bucket, missing stamp means no time has
    /// passed. Accrual is counted in whole units, so a fraction accrued since
    /// the stamp is discarded when the stamp moves to `now`.
    pub(crate) fn settle(&self, content: Option<i64>, stamp: Option<i64>, now: i64) -> BucketOutcome {
        let elapsed = now - stamp.unwrap_or(now);
        let accrued = accrued(elapsed, self.capacity, self.window_millis());

        match self.kind {
            BucketKind::Tokens => {
                let tokens = content
                    .unwrap_or(self.capacity)
                    .saturating_add(accrued)
                    .min(self.capacity);
                if tokens <= 0 {
                    BucketOutcome { admitted: false, content: tokens }
                } else {
                    BucketOutcome { admitted: true, content: tokens - 1 }
                }
            }
            BucketKind::Level => {
                let level = content.unwrap_or(0).saturating_sub(accrued).max(0);
                if level >= self.capacity {
                    BucketOutcome { admitted: false, content: level }
                } else {
                    BucketOutcome { admitted: true, content: level + 1 }
                }
            }
        }
    }
}

/// Whole units accrued over `elapsed_ms` at `per_window` per `window_ms`, floored.
pub(crate) fn accrued(elapsed_ms: i64, per_window: i64, window_ms: i64) -> i64 {
    if elapsed_ms <= 0 || window_ms <= 0 || per_window <= 0 {
        return 0;
    }
    let units = elapsed_ms as i128 * per_window as i128 / window_ms as i128;
    units.min(i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(kind: BucketKind, capacity: i64) -> Bucket<'static> {
        Bucket {
            kind,
            content_key: "c",
            stamp_key: "s",
            capacity,
            window: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_accrued_floors() {
        // 2 per 2000ms
        assert_eq!(accrued(999, 2, 2000), 0);
        assert_eq!(accrued(1000, 2, 2000), 1);
        assert_eq!(accrued(1999, 2, 2000), 1);
        assert_eq!(accrued(5000, 2, 2000), 5);
        assert_eq!(accrued(-10, 2, 2000), 0);
        assert_eq!(accrued(i64::MAX, i64::MAX, 1), i64::MAX);
    }

    #[test]
    fn test_token_bucket_settles() {
        let b = bucket(BucketKind::Tokens, 2);

        assert_eq!(b.settle(None, None, 0), BucketOutcome { admitted: true, content: 1 });
        assert_eq!(b.settle(Some(0), Some(0), 999), BucketOutcome { admitted: false, content: 0 });
        assert_eq!(b.settle(Some(0), Some(0), 1000), BucketOutcome { admitted: true, content: 0 });
        // Refill is capped at capacity
        assert_eq!(b.settle(Some(1), Some(0), 60_000), BucketOutcome { admitted: true, content: 1 });
    }

    #[test]
    fn test_level_bucket_settles() {
        let b = bucket(BucketKind::Level, 2);

        assert_eq!(b.settle(None, None, 0), BucketOutcome { admitted: true, content: 1 });
        assert_eq!(b.settle(Some(2), Some(0), 999), BucketOutcome { admitted: false, content: 2 });
        assert_eq!(b.settle(Some(2), Some(0), 1000), BucketOutcome { admitted: true, content: 2 });
        assert_eq!(b.settle(Some(2), Some(0), 60_000), BucketOutcome { admitted: true, content: 1 });
    }
}
