use std::time::Duration;

use crate::TransferError;

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; worth another attempt after a delay.
    Retryable,
    /// Never retried automatically.
    Fatal,
}

/// Deterministic backoff schedule for retryable failures.
///
/// `attempt` is the zero-based index of the retry being scheduled, i.e. the
/// number of consecutive failures before the current one. The delay
/// sequence is indexed by it and holds at its last value; once `attempt`
/// reaches `max_attempts` retryable failures escalate to fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryScheduler {
    delays: Vec<Duration>,
    max_attempts: u32,
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self {
            delays: [0, 3, 5, 10, 20]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            max_attempts: 5,
        }
    }
}

impl RetryScheduler {
    /// Creates a scheduler. `delays` must be non-empty and non-decreasing.
    pub fn new(delays: Vec<Duration>, max_attempts: u32) -> Result<Self, TransferError> {
        if delays.is_empty() {
            return Err(TransferError::InvalidBackoff("empty delay sequence".into()));
        }
        if delays.windows(2).any(|w| w[1] < w[0]) {
            return Err(TransferError::InvalidBackoff(
                "delays must be non-decreasing".into(),
            ));
        }
        Ok(Self {
            delays,
            max_attempts,
        })
    }

    /// Returns how long to wait before the next attempt, or `None` when the
    /// failure must not be retried.
    pub fn next_delay(&self, attempt: u32, class: ErrorClass) -> Option<Duration> {
        if class == ErrorClass::Fatal || attempt >= self.max_attempts {
            return None;
        }
        let index = (attempt as usize).min(self.delays.len() - 1);
        Some(self.delays[index])
    }

    /// Number of retries allowed before escalating.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Total time spent waiting when every attempt fails.
    pub fn worst_case_wait(&self) -> Duration {
        (0..self.max_attempts)
            .filter_map(|attempt| self.next_delay(attempt, ErrorClass::Retryable))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn fatal_never_retries() {
        let sched = RetryScheduler::default();
        for attempt in 0..10 {
            assert!(sched.next_delay(attempt, ErrorClass::Fatal).is_none());
        }
    }

    #[test]
    fn default_sequence() {
        let sched = RetryScheduler::default();
        assert_eq!(sched.next_delay(0, ErrorClass::Retryable), Some(secs(0)));
        assert_eq!(sched.next_delay(1, ErrorClass::Retryable), Some(secs(3)));
        assert_eq!(sched.next_delay(2, ErrorClass::Retryable), Some(secs(5)));
        assert_eq!(sched.next_delay(3, ErrorClass::Retryable), Some(secs(10)));
        assert_eq!(sched.next_delay(4, ErrorClass::Retryable), Some(secs(20)));
        assert_eq!(sched.max_attempts(), 5);
    }

    #[test]
    fn escalates_at_max_attempts() {
        let sched = RetryScheduler::default();
        assert!(sched.next_delay(5, ErrorClass::Retryable).is_none());
        assert!(sched.next_delay(u32::MAX, ErrorClass::Retryable).is_none());
    }

    #[test]
    fn holds_last_delay() {
        let sched = RetryScheduler::new(vec![secs(1), secs(2)], 10).unwrap();
        assert_eq!(sched.next_delay(1, ErrorClass::Retryable), Some(secs(2)));
        assert_eq!(sched.next_delay(7, ErrorClass::Retryable), Some(secs(2)));
        assert!(sched.next_delay(10, ErrorClass::Retryable).is_none());
    }

    #[test]
    fn non_decreasing_across_attempts() {
        let sched = RetryScheduler::default();
        let delays: Vec<Duration> = (0..sched.max_attempts())
            .filter_map(|a| sched.next_delay(a, ErrorClass::Retryable))
            .collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn same_inputs_same_output() {
        let sched = RetryScheduler::default();
        let a = sched.next_delay(3, ErrorClass::Retryable);
        let b = sched.next_delay(3, ErrorClass::Retryable);
        assert_eq!(a, b);
    }

    #[test]
    fn worst_case_wait_matches_sequence_sum() {
        let sched = RetryScheduler::default();
        let sum: Duration = sched.delays().iter().sum();
        assert_eq!(sched.worst_case_wait(), sum);
        assert_eq!(sum, secs(38));
    }

    #[test]
    fn worst_case_wait_includes_first_delay() {
        let sched = RetryScheduler::new(vec![secs(1), secs(2)], 3).unwrap();
        assert_eq!(sched.worst_case_wait(), secs(1 + 2 + 2));
    }

    #[test]
    fn rejects_invalid_sequences() {
        assert!(matches!(
            RetryScheduler::new(Vec::new(), 3),
            Err(TransferError::InvalidBackoff(_))
        ));
        assert!(matches!(
            RetryScheduler::new(vec![secs(5), secs(1)], 3),
            Err(TransferError::InvalidBackoff(_))
        ));
    }

    #[test]
    fn zero_max_attempts_never_retries() {
        let sched = RetryScheduler::new(vec![secs(1)], 0).unwrap();
        assert!(sched.next_delay(0, ErrorClass::Retryable).is_none());
        assert_eq!(sched.worst_case_wait(), Duration::ZERO);
    }
}
