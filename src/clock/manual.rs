use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::{HardwareClock, HostTime, WallClock};

/// Deterministic clock for tests and simulations.
///
/// Host time and wall time advance together only when told to, which lets
/// tests model devices whose host clocks have unrelated origins but share a
/// wall clock. The hardware side can be flagged unavailable to model an
/// audio engine that has not rendered yet.
pub struct ManualClock {
    host_nanos: AtomicU64,
    wall_origin_bits: AtomicU64,
    available: AtomicBool,
}

impl ManualClock {
    pub fn new(host_origin: HostTime, wall_origin_unix: f64) -> Self {
        Self {
            host_nanos: AtomicU64::new(host_origin.0),
            wall_origin_bits: AtomicU64::new(wall_origin_unix.to_bits()),
            available: AtomicBool::new(true),
        }
    }

    /// Moves both time lines forward by `step`.
    pub fn advance(&self, step: Duration) {
        self.host_nanos
            .fetch_add(step.as_nanos() as u64, Ordering::SeqCst);
        let wall = f64::from_bits(self.wall_origin_bits.load(Ordering::SeqCst));
        self.wall_origin_bits
            .store((wall + step.as_secs_f64()).to_bits(), Ordering::SeqCst);
    }

    /// Sets the wall clock without touching host time (models clock skew or NTP steps).
    pub fn set_wall(&self, unix: f64) {
        self.wall_origin_bits.store(unix.to_bits(), Ordering::SeqCst);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Host time regardless of availability.
    pub fn raw_host_time(&self) -> HostTime {
        HostTime(self.host_nanos.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(HostTime(0), 0.0)
    }
}

impl HardwareClock for ManualClock {
    fn current_host_time(&self) -> Option<HostTime> {
        if !self.available.load(Ordering::SeqCst) {
            return None;
        }
        Some(self.raw_host_time())
    }
}

impl WallClock for ManualClock {
    fn now_unix(&self) -> f64 {
        f64::from_bits(self.wall_origin_bits.load(Ordering::SeqCst))
    }
}
