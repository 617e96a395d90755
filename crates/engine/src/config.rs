use std::time::Duration;

use mediaferry_transfer::{DEFAULT_CHUNK_SIZE, DEFAULT_SAMPLE_INTERVAL, RetryScheduler};

/// Tuning knobs shared by every session of an engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bytes sent per transfer request.
    pub chunk_size: usize,
    /// Deadline for each network call; expiry counts as a transient failure.
    pub request_timeout: Duration,
    pub retry: RetryScheduler,
    /// Minimum spacing between throughput samples.
    pub sample_interval: Duration,
    /// Capacity of each handle's snapshot channel.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_timeout: Duration::from_secs(30),
            retry: RetryScheduler::default(),
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            event_buffer: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_size, 8 * 1024 * 1024);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts(), 5);
        assert_eq!(config.retry.worst_case_wait(), Duration::from_secs(38));
        assert_eq!(config.sample_interval, Duration::from_secs(1));
    }
}
