//! Latency metrics collection for the processing loop and health checker.
//!
//! Provides a ring buffer-based histogram for tracking durations (inference
//! latency, cycle duration) without heap allocation during normal operation.

use std::time::Duration;

/// Latency metrics with a ring buffer for percentile tracking.
#[derive(Debug)]
pub struct LatencyMetrics {
    /// Ring buffer of observed durations in nanoseconds.
    samples: Box<[u64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples collected (saturates at buffer size).
    sample_count: usize,
    /// Total observations recorded.
    total_count: u64,
    /// Minimum observed duration in nanoseconds.
    min_ns: u64,
    /// Maximum observed duration in nanoseconds.
    max_ns: u64,
    /// Sum of all durations for mean calculation.
    sum_ns: u64,
    /// Number of observations exceeding the configured deadline.
    overrun_count: u64,
    /// Configured deadline in nanoseconds; observations above this count as overruns.
    deadline_ns: u64,
    /// Most recently recorded duration in nanoseconds.
    last_ns: Option<u64>,
}

impl LatencyMetrics {
    /// Create a new metrics collector with the given histogram size.
    ///
    /// # Arguments
    ///
    /// * `histogram_size` - Number of samples to retain in the ring buffer.
    /// * `deadline` - Observations exceeding this duration count as overruns.
    #[must_use]
    pub fn new(histogram_size: usize, deadline: Duration) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total_count: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
            overrun_count: 0,
            deadline_ns: deadline.as_nanos() as u64,
            last_ns: None,
        }
    }

    /// Record an observed duration.
    pub fn record(&mut self, duration: Duration) {
        self.record_ns(duration.as_nanos() as u64);
    }

    /// Record a duration in nanoseconds directly, avoiding `Duration` construction.
    pub fn record_ns(&mut self, ns: u64) {
        self.samples[self.write_pos] = ns;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.total_count += 1;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns = self.sum_ns.wrapping_add(ns);
        self.last_ns = Some(ns);

        if ns > self.deadline_ns {
            self.overrun_count += 1;
        }
    }

    /// Total number of observations recorded.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Minimum observed duration.
    #[must_use]
    pub fn min(&self) -> Option<Duration> {
        (self.total_count > 0).then(|| Duration::from_nanos(self.min_ns))
    }

    /// Maximum observed duration.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (self.total_count > 0).then(|| Duration::from_nanos(self.max_ns))
    }

    /// Mean observed duration.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        (self.total_count > 0).then(|| Duration::from_nanos(self.sum_ns / self.total_count))
    }

    /// Number of observations exceeding the configured deadline.
    #[must_use]
    pub fn overrun_count(&self) -> u64 {
        self.overrun_count
    }

    /// Most recently recorded duration, independent of the ring buffer's
    /// mean/percentile view. This is what a "last observed X" probe (e.g.
    /// the health checker's latency check) should read, since a single
    /// spike can be masked by an otherwise-healthy window mean.
    #[must_use]
    pub fn latest(&self) -> Option<Duration> {
        self.last_ns.map(Duration::from_nanos)
    }

    /// Compute a percentile from the ring buffer (0.0 to 100.0).
    ///
    /// Returns `None` if no samples have been collected or the percentile is
    /// out of range.
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if self.sample_count == 0 || percentile < 0.0 || percentile > 100.0 || percentile.is_nan()
        {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        let idx = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        let idx = idx.min(sorted.len() - 1);
        Some(Duration::from_nanos(sorted[idx]))
    }

    /// Get a snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_count: self.total_count,
            min_ns: (self.total_count > 0).then_some(self.min_ns),
            max_ns: (self.total_count > 0).then_some(self.max_ns),
            mean_ns: (self.total_count > 0).then_some(self.sum_ns / self.total_count),
            overrun_count: self.overrun_count,
            sample_count: self.sample_count,
            last_ns: self.last_ns,
        }
    }

    /// Reset all metrics to initial state.
    pub fn reset(&mut self) {
        self.samples.fill(0);
        self.write_pos = 0;
        self.sample_count = 0;
        self.total_count = 0;
        self.min_ns = u64::MAX;
        self.max_ns = 0;
        self.sum_ns = 0;
        self.overrun_count = 0;
        self.last_ns = None;
    }
}

/// Immutable snapshot of metrics for reporting in health/diagnostics output.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Total observations recorded.
    pub total_count: u64,
    /// Minimum duration in nanoseconds.
    pub min_ns: Option<u64>,
    /// Maximum duration in nanoseconds.
    pub max_ns: Option<u64>,
    /// Mean duration in nanoseconds.
    pub mean_ns: Option<u64>,
    /// Number of deadline overruns.
    pub overrun_count: u64,
    /// Number of samples currently in the histogram.
    pub sample_count: usize,
    /// Most recently recorded duration in nanoseconds.
    pub last_ns: Option<u64>,
}

impl MetricsSnapshot {
    /// Jitter (max - min) in nanoseconds.
    #[must_use]
    pub fn jitter_ns(&self) -> Option<u64> {
        match (self.min_ns, self.max_ns) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_recording() {
        let mut metrics = LatencyMetrics::new(100, Duration::from_millis(1));
        metrics.record(Duration::from_micros(500));
        metrics.record(Duration::from_micros(600));
        metrics.record(Duration::from_micros(550));

        assert_eq!(metrics.total_count(), 3);
        assert_eq!(metrics.min(), Some(Duration::from_micros(500)));
        assert_eq!(metrics.max(), Some(Duration::from_micros(600)));
    }

    #[test]
    fn test_overrun_counting() {
        let mut metrics = LatencyMetrics::new(100, Duration::from_millis(1));
        metrics.record(Duration::from_micros(900));
        metrics.record(Duration::from_micros(1100));
        metrics.record(Duration::from_micros(800));
        metrics.record(Duration::from_micros(1500));

        assert_eq!(metrics.overrun_count(), 2);
    }

    #[test]
    fn test_percentile_calculation() {
        let mut metrics = LatencyMetrics::new(100, Duration::from_millis(1));
        for i in 1..=100 {
            metrics.record(Duration::from_micros(i));
        }
        let p50 = metrics.percentile(50.0).unwrap();
        assert!(p50.as_micros() >= 49 && p50.as_micros() <= 51);
    }

    #[test]
    fn test_ring_buffer_wrapping() {
        let mut metrics = LatencyMetrics::new(10, Duration::from_millis(1));
        for i in 0..25 {
            metrics.record_ns(i * 1000);
        }
        assert_eq!(metrics.total_count(), 25);
        assert_eq!(metrics.snapshot().sample_count, 10);
    }

    #[test]
    fn test_percentile_validation() {
        let mut metrics = LatencyMetrics::new(100, Duration::from_millis(1));
        for i in 1..=10 {
            metrics.record(Duration::from_micros(i));
        }
        assert!(metrics.percentile(50.0).is_some());
        assert!(metrics.percentile(-1.0).is_none());
        assert!(metrics.percentile(101.0).is_none());
        assert!(metrics.percentile(f64::NAN).is_none());
    }

    #[test]
    fn test_latest_tracks_most_recent_sample_not_the_mean() {
        let mut metrics = LatencyMetrics::new(100, Duration::from_millis(1));
        assert!(metrics.latest().is_none());

        metrics.record(Duration::from_micros(200));
        metrics.record(Duration::from_micros(200));
        metrics.record(Duration::from_millis(5));

        assert_eq!(metrics.latest(), Some(Duration::from_millis(5)));
        // The window mean stays low even though the latest sample spiked.
        assert!(metrics.mean().unwrap() < Duration::from_millis(2));
    }

    #[test]
    fn test_reset() {
        let mut metrics = LatencyMetrics::new(100, Duration::from_millis(1));
        metrics.record(Duration::from_micros(500));
        metrics.record(Duration::from_micros(1500));
        metrics.reset();
        assert_eq!(metrics.total_count(), 0);
        assert!(metrics.min().is_none());
        assert!(metrics.latest().is_none());
    }
}
