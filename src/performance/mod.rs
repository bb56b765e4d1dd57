//! # Throughput monitoring
//!
//! The background worker times every batch it executes and feeds the timings
//! into a [`ThroughputMonitor`]. The controller exposes the derived
//! [`ThroughputMetrics`] through
//! [`Simulation::throughput`](crate::simulation::Simulation::throughput).
//!
//! ```rust
//! use std::time::Duration;
//! use flexsim::performance::ThroughputMonitor;
//!
//! let mut monitor = ThroughputMonitor::new();
//! monitor.record_batch(16, Duration::from_millis(2));
//! let metrics = monitor.metrics();
//! assert_eq!(metrics.total_steps, 16);
//! assert_eq!(metrics.total_batches, 1);
//! ```

use std::collections::VecDeque;
use std::time::Duration;

/// Batch throughput over a window of recent batches.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ThroughputMetrics {
    /// Simulated steps per wall-clock second over the window
    pub steps_per_second: f64,
    /// Average wall-clock time per batch in milliseconds
    pub batch_time_ms: f64,
    /// Steps executed since the monitor was created
    pub total_steps: u64,
    /// Batches executed since the monitor was created
    pub total_batches: u64,
}

/// Ring buffer of recent batch timings
#[derive(Debug, Clone)]
pub struct ThroughputMonitor {
    /// (steps, elapsed) of recent batches
    samples: VecDeque<(u64, Duration)>,
    max_samples: usize,
    total_steps: u64,
    total_batches: u64,
}

impl ThroughputMonitor {
    /// Create a monitor averaging over the last 64 batches
    pub fn new() -> Self {
        Self::with_window(64)
    }

    /// Create a monitor averaging over the last `max_samples` batches
    pub fn with_window(max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
            total_steps: 0,
            total_batches: 0,
        }
    }

    /// Add one executed batch
    pub fn record_batch(&mut self, steps: u64, elapsed: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back((steps, elapsed));
        self.total_steps += steps;
        self.total_batches += 1;
    }

    /// Metrics over the current window
    pub fn metrics(&self) -> ThroughputMetrics {
        let steps: u64 = self.samples.iter().map(|(s, _)| s).sum();
        let time: Duration = self.samples.iter().map(|(_, t)| *t).sum();
        let seconds = time.as_secs_f64();
        ThroughputMetrics {
            steps_per_second: if seconds > 0.0 {
                steps as f64 / seconds
            } else {
                0.0
            },
            batch_time_ms: if self.samples.is_empty() {
                0.0
            } else {
                seconds * 1000.0 / self.samples.len() as f64
            },
            total_steps: self.total_steps,
            total_batches: self.total_batches,
        }
    }

    /// Forget the window and the totals, as when the body is reset
    pub fn reset(&mut self) {
        self.samples.clear();
        self.total_steps = 0;
        self.total_batches = 0;
    }
}

impl Default for ThroughputMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_monitor() {
        let metrics = ThroughputMonitor::new().metrics();
        assert_eq!(metrics, ThroughputMetrics::default());
    }

    #[test]
    fn test_rates_over_window() {
        let mut monitor = ThroughputMonitor::with_window(2);
        monitor.record_batch(100, Duration::from_millis(500));
        monitor.record_batch(10, Duration::from_millis(100));
        monitor.record_batch(30, Duration::from_millis(100));
        let metrics = monitor.metrics();
        // window holds the last two batches only
        assert!((metrics.steps_per_second - 200.0).abs() < 1e-9);
        assert!((metrics.batch_time_ms - 100.0).abs() < 1e-9);
        assert_eq!(metrics.total_steps, 140);
        assert_eq!(metrics.total_batches, 3);
    }

    #[test]
    fn test_reset() {
        let mut monitor = ThroughputMonitor::new();
        monitor.record_batch(4, Duration::from_millis(1));
        monitor.reset();
        assert_eq!(monitor.metrics().total_steps, 0);
    }
}
