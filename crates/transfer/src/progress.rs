use std::time::Duration;

use tokio::time::Instant;

use peerdrop_protocol::constants::SPEED_SAMPLE_INTERVAL;

/// Weight of the newest sample in the smoothed estimate.
const SMOOTHING: f64 = 0.3;

/// Smoothed throughput from a running byte count.
///
/// A new sample is taken only when at least the sample interval has passed
/// since the previous one; per-chunk timings are too noisy to report.
#[derive(Debug)]
pub struct SpeedCalculator {
    interval: Duration,
    last: Option<(Instant, u64)>,
    bytes_per_second: f64,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(SPEED_SAMPLE_INTERVAL)
    }
}

impl SpeedCalculator {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
            bytes_per_second: 0.0,
        }
    }

    /// Records the running total. Returns `true` when a new sample was
    /// folded into the estimate.
    pub fn record(&mut self, total_bytes: u64) -> bool {
        let now = Instant::now();
        let Some((at, bytes)) = self.last else {
            self.last = Some((now, total_bytes));
            return false;
        };

        let elapsed = now.duration_since(at);
        if elapsed < self.interval {
            return false;
        }

        let delta = total_bytes.saturating_sub(bytes) as f64;
        let sample = delta / elapsed.as_secs_f64();
        self.bytes_per_second = if self.bytes_per_second == 0.0 {
            sample
        } else {
            SMOOTHING * sample + (1.0 - SMOOTHING) * self.bytes_per_second
        };
        self.last = Some((now, total_bytes));
        true
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.bytes_per_second
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    ///
    /// Returns `None` until a speed has been measured.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        if self.bytes_per_second <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(
            remaining_bytes as f64 / self.bytes_per_second,
        ))
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.bytes_per_second = 0.0;
    }
}
