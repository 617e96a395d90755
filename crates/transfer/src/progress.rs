use std::time::{Duration, Instant};

/// Default minimum spacing between accepted samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Speed and time-remaining figures derived from the latest sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Throughput {
    pub bytes_per_second: f64,
    /// `None` while the speed is zero or unknown.
    pub estimated_seconds_remaining: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    bytes: u64,
    at: Instant,
}

// ---------------------------------------------------------------------------
// ThroughputEstimator
// ---------------------------------------------------------------------------

/// Estimates upload speed from `(bytes_so_far, timestamp)` samples.
///
/// Speed is the delta across the most recent sampling interval only, so it
/// tracks current network conditions. Samples closer together than the
/// interval are ignored. After [`pause`](Self::pause), the next sample
/// seeds a fresh window instead of spanning the paused gap.
#[derive(Debug, Clone)]
pub struct ThroughputEstimator {
    total_bytes: u64,
    min_interval: Duration,
    last: Option<Sample>,
    current: Throughput,
}

impl ThroughputEstimator {
    /// Creates an estimator for an upload of `total_bytes`.
    pub fn new(total_bytes: u64, min_interval: Duration) -> Self {
        Self {
            total_bytes,
            min_interval,
            last: None,
            current: Throughput::default(),
        }
    }

    /// Records a sample. Returns the updated figures, or `None` if the
    /// sample was throttled.
    pub fn record(&mut self, bytes_so_far: u64, at: Instant) -> Option<Throughput> {
        let Some(prev) = self.last else {
            self.last = Some(Sample {
                bytes: bytes_so_far,
                at,
            });
            self.current = Throughput::default();
            return Some(self.current);
        };

        let elapsed = at.saturating_duration_since(prev.at);
        if elapsed < self.min_interval || elapsed.is_zero() {
            return None;
        }

        let delta = bytes_so_far.saturating_sub(prev.bytes);
        let speed = delta as f64 / elapsed.as_secs_f64();
        let remaining = self.total_bytes.saturating_sub(bytes_so_far);

        self.last = Some(Sample {
            bytes: bytes_so_far,
            at,
        });
        self.current = Throughput {
            bytes_per_second: speed,
            estimated_seconds_remaining: estimate_remaining(remaining, speed),
        };
        Some(self.current)
    }

    /// Drops the sampling window; the next sample only seeds it.
    pub fn pause(&mut self) {
        self.last = None;
        self.current = Throughput::default();
    }

    /// Returns the latest figures.
    pub fn current(&self) -> Throughput {
        self.current
    }
}

fn estimate_remaining(remaining: u64, speed: f64) -> Option<f64> {
    if speed <= 0.0 {
        return None;
    }
    Some(remaining as f64 / speed)
}
