//! Compaction policy
//!
//! Decides, after each append, whether the oldest turns of a log should be
//! folded into a summary digest. The live log is the hot tier; digests are
//! the cold tier.

use crate::error::{JarvisError, JarvisResult};

/// Outcome of a policy evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionDecision {
    /// Leave the log alone
    Hold,
    /// Summarize and evict the oldest `batch_size` turns
    Compact {
        /// Number of turns to extract from the head of the log
        batch_size: usize,
    },
}

/// Threshold-crossing compaction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPolicy {
    trigger_threshold: usize,
    compact_batch_size: usize,
}

impl CompactionPolicy {
    /// Create a policy.
    ///
    /// Rejects a zero threshold, a zero batch, and a batch larger than the
    /// threshold.
    pub fn new(trigger_threshold: usize, compact_batch_size: usize) -> JarvisResult<Self> {
        if trigger_threshold == 0 {
            return Err(JarvisError::validation(
                "trigger_threshold",
                "must be greater than zero",
                "0",
            ));
        }

        if compact_batch_size == 0 {
            return Err(JarvisError::validation(
                "compact_batch_size",
                "must be greater than zero",
                "0",
            ));
        }

        if compact_batch_size > trigger_threshold {
            return Err(JarvisError::validation(
                "compact_batch_size",
                format!("must not exceed trigger_threshold ({})", trigger_threshold),
                compact_batch_size.to_string(),
            ));
        }

        Ok(Self {
            trigger_threshold,
            compact_batch_size,
        })
    }

    /// Live length at which compaction fires
    pub fn trigger_threshold(&self) -> usize {
        self.trigger_threshold
    }

    /// Turns extracted per compaction
    pub fn compact_batch_size(&self) -> usize {
        self.compact_batch_size
    }

    /// Evaluate an append that moved the live length from `previous_len` to
    /// `new_len`.
    ///
    /// Fires once per crossing of a multiple of the threshold. A pair append
    /// that jumps over a multiple still counts as crossing it. When an
    /// earlier compaction was deferred (`pending`), fires on any append that
    /// leaves the log at or above the threshold.
    pub fn evaluate(&self, previous_len: usize, new_len: usize, pending: bool) -> CompactionDecision {
        let crossed = new_len / self.trigger_threshold > previous_len / self.trigger_threshold;
        let owed = pending && self.is_backlogged(new_len);

        if crossed || owed {
            CompactionDecision::Compact {
                batch_size: self.compact_batch_size,
            }
        } else {
            CompactionDecision::Hold
        }
    }

    /// Whether a log of `len` turns is still at or above the threshold
    pub fn is_backlogged(&self, len: usize) -> bool {
        len >= self.trigger_threshold
    }
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            trigger_threshold: 20,
            compact_batch_size: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    fn fired(policy: &CompactionPolicy, pair_appends: usize) -> Vec<usize> {
        // Simulate pair appends with successful compactions
        let mut len = 0;
        let mut fired_at = Vec::new();
        for call in 1..=pair_appends {
            let previous = len;
            len += 2;
            if let CompactionDecision::Compact { batch_size } = policy.evaluate(previous, len, false) {
                fired_at.push(call);
                len -= batch_size;
            }
        }
        fired_at
    }

    #[test]
    fn test_rejects_invalid_configuration() {
        assert_err!(CompactionPolicy::new(10, 20));
        assert_err!(CompactionPolicy::new(0, 0));
        assert_err!(CompactionPolicy::new(20, 0));
        assert!(CompactionPolicy::new(20, 20).is_ok());
    }

    #[test]
    fn test_fires_exactly_at_threshold() {
        let policy = CompactionPolicy::new(20, 10).unwrap();

        assert_eq!(policy.evaluate(16, 18, false), CompactionDecision::Hold);
        assert_eq!(
            policy.evaluate(18, 20, false),
            CompactionDecision::Compact { batch_size: 10 }
        );
    }

    #[test]
    fn test_does_not_fire_on_every_append_above_threshold() {
        let policy = CompactionPolicy::new(20, 10).unwrap();

        assert_eq!(policy.evaluate(20, 22, false), CompactionDecision::Hold);
        assert_eq!(policy.evaluate(22, 24, false), CompactionDecision::Hold);
        assert_eq!(policy.evaluate(38, 40, false), CompactionDecision::Compact { batch_size: 10 });
    }

    #[test]
    fn test_once_per_ten_turns_in_steady_state() {
        let policy = CompactionPolicy::default();
        assert_eq!(fired(&policy, 25), vec![10, 15, 20, 25]);
    }

    #[test]
    fn test_pair_appends_cannot_skip_a_crossing() {
        // Threshold 5 with pairs: lengths 2, 4, 6 jump over 5
        let policy = CompactionPolicy::new(5, 3).unwrap();
        assert_eq!(policy.evaluate(4, 6, false), CompactionDecision::Compact { batch_size: 3 });

        // 3 live after eviction, then 5: exact multiple
        assert_eq!(policy.evaluate(3, 5, false), CompactionDecision::Compact { batch_size: 3 });
    }

    #[test]
    fn test_pending_compaction_retries_on_next_append() {
        let policy = CompactionPolicy::new(20, 10).unwrap();

        assert_eq!(policy.evaluate(20, 22, true), CompactionDecision::Compact { batch_size: 10 });
        // A pending flag below the threshold has nothing to drain
        assert_eq!(policy.evaluate(10, 12, true), CompactionDecision::Hold);
        assert!(policy.is_backlogged(20));
        assert!(!policy.is_backlogged(19));
    }
}
