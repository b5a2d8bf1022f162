//! Clock abstractions shared by the scheduler and the sync bridge.
//!
//! Two independent time lines exist on every device:
//! - *host time*, a monotonic counter tied to the audio render timeline
//!   ([`HardwareClock`]), which is what click triggers are scheduled against;
//! - *wall-clock* Unix time ([`WallClock`]), the only coordinate devices share.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

mod manual;

pub use manual::ManualClock;

/// Host-time ticks per second for clocks that count nanoseconds.
pub const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// A point on a [`HardwareClock`] timeline, in that clock's native ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct HostTime(pub u64);

impl HostTime {
    pub fn ticks(self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, ticks: u64) -> HostTime {
        HostTime(self.0.saturating_add(ticks))
    }

    pub fn saturating_sub(self, ticks: u64) -> HostTime {
        HostTime(self.0.saturating_sub(ticks))
    }

    /// Signed tick distance `self - earlier`.
    pub fn delta_ticks(self, earlier: HostTime) -> i128 {
        self.0 as i128 - earlier.0 as i128
    }
}

/// Monotonic hardware clock tied to the audio output.
///
/// `current_host_time` returns `None` while the audio engine is not yet
/// producing render callbacks. Callers treat that as transient and retry on
/// their next cycle.
pub trait HardwareClock: Send + Sync {
    fn current_host_time(&self) -> Option<HostTime>;

    fn ticks_per_second(&self) -> f64 {
        NANOS_PER_SECOND
    }

    /// Converts a non-negative span of seconds to host ticks. Negative spans map to zero.
    fn seconds_to_host_ticks(&self, seconds: f64) -> u64 {
        if !seconds.is_finite() || seconds <= 0.0 {
            return 0;
        }
        (seconds * self.ticks_per_second()).round() as u64
    }

    fn host_ticks_to_seconds(&self, ticks: u64) -> f64 {
        ticks as f64 / self.ticks_per_second()
    }

    /// `base` shifted by a signed number of seconds, saturating at zero.
    fn host_time_after(&self, base: HostTime, seconds: f64) -> HostTime {
        if seconds >= 0.0 {
            base.saturating_add(self.seconds_to_host_ticks(seconds))
        } else {
            base.saturating_sub(self.seconds_to_host_ticks(-seconds))
        }
    }
}

/// Wall-clock time source in floating-point Unix seconds.
pub trait WallClock: Send + Sync {
    fn now_unix(&self) -> f64;
}

static PROCESS_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Host clock backed by `Instant`, counting nanoseconds since first use in
/// this process. Always available.
#[derive(Default)]
pub struct SystemHostClock {
    _unit: (),
}

impl HardwareClock for SystemHostClock {
    fn current_host_time(&self) -> Option<HostTime> {
        Some(HostTime(PROCESS_EPOCH.elapsed().as_nanos() as u64))
    }
}

/// Wall clock backed by `SystemTime::now`.
#[derive(Default)]
pub struct SystemWallClock {
    _unit: (),
}

impl WallClock for SystemWallClock {
    fn now_unix(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or(0.0)
    }
}
