//! Tap tempo estimation.
//!
//! Keeps the last few inter-tap intervals and reports their mean as BPM. A
//! pause of `reset_after` or longer abandons the sequence so an unrelated tap
//! never drags the average.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::TapConfig;

pub struct TapTempoEstimator {
    taps: VecDeque<Instant>,
    intervals: VecDeque<f64>,
    window: usize,
    reset_after: f64,
}

impl TapTempoEstimator {
    pub fn new(config: &TapConfig) -> Self {
        let window = config.window.max(1);
        Self {
            taps: VecDeque::with_capacity(window),
            intervals: VecDeque::with_capacity(window),
            window,
            reset_after: config.reset_after_secs,
        }
    }

    /// Registers a tap and returns the smoothed BPM once at least one
    /// accepted interval exists.
    pub fn record_tap(&mut self, now: Instant) -> Option<f64> {
        let previous = self.taps.back().copied();
        self.push_tap(now);

        let previous = previous?;
        let interval = now.saturating_duration_since(previous).as_secs_f64();

        if interval >= self.reset_after || interval <= 0.0 {
            tracing::debug!(interval, "tap sequence abandoned");
            self.taps.clear();
            self.intervals.clear();
            self.taps.push_back(now);
            return None;
        }

        if self.intervals.len() == self.window {
            self.intervals.pop_front();
        }
        self.intervals.push_back(interval);

        let mean = self.intervals.iter().sum::<f64>() / self.intervals.len() as f64;
        Some(60.0 / mean)
    }

    fn push_tap(&mut self, now: Instant) {
        if self.taps.len() == self.window {
            self.taps.pop_front();
        }
        self.taps.push_back(now);
    }

    pub fn reset(&mut self) {
        self.taps.clear();
        self.intervals.clear();
    }

    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    /// Reset threshold as a duration.
    pub fn reset_after(&self) -> Duration {
        Duration::from_secs_f64(self.reset_after.max(0.0))
    }
}

impl Default for TapTempoEstimator {
    fn default() -> Self {
        Self::new(&TapConfig::default())
    }
}
