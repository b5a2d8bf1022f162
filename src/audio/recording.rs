//! Audio sink that records what it was asked to play.
//!
//! Used by tests and the CLI simulation: every trigger is stamped with the
//! host time it actually fired at, so timing can be asserted without real
//! audio hardware.

use std::sync::{Arc, Mutex};

use crate::clock::{HardwareClock, HostTime};
use crate::error::AudioError;

use super::{AudioSink, SoundRole};

/// One trigger call observed by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerRecord {
    pub role: SoundRole,
    /// Host time the scheduler targeted
    pub scheduled_at: HostTime,
    /// Host time when the trigger call landed (None if the clock was unavailable)
    pub fired_at: Option<HostTime>,
    pub muted: bool,
}

#[derive(Default)]
struct RecorderState {
    triggers: Vec<TriggerRecord>,
    loaded: Vec<(SoundRole, String)>,
    hi_volume: f32,
    lo_volume: f32,
    muted: bool,
    prime_count: usize,
}

pub struct RecordingSink {
    clock: Arc<dyn HardwareClock>,
    state: Mutex<RecorderState>,
}

impl RecordingSink {
    pub fn new(clock: Arc<dyn HardwareClock>) -> Self {
        Self {
            clock,
            state: Mutex::new(RecorderState {
                hi_volume: 1.0,
                lo_volume: 1.0,
                ..RecorderState::default()
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut RecorderState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub fn triggers(&self) -> Vec<TriggerRecord> {
        self.with_state(|state| state.triggers.clone())
    }

    /// Triggers that were audible (not muted).
    pub fn audible_triggers(&self) -> Vec<TriggerRecord> {
        self.with_state(|state| state.triggers.iter().filter(|t| !t.muted).cloned().collect())
    }

    pub fn loaded_samples(&self) -> Vec<(SoundRole, String)> {
        self.with_state(|state| state.loaded.clone())
    }

    pub fn volume(&self, role: SoundRole) -> f32 {
        self.with_state(|state| match role {
            SoundRole::Hi => state.hi_volume,
            SoundRole::Lo => state.lo_volume,
        })
    }

    pub fn is_muted(&self) -> bool {
        self.with_state(|state| state.muted)
    }

    pub fn prime_count(&self) -> usize {
        self.with_state(|state| state.prime_count)
    }

    pub fn clear(&self) {
        self.with_state(|state| state.triggers.clear());
    }
}

impl AudioSink for RecordingSink {
    fn load_sample(&self, role: SoundRole, identifier: &str) -> Result<(), AudioError> {
        if identifier.is_empty() {
            return Err(AudioError::SampleNotFound {
                identifier: identifier.to_string(),
            });
        }
        self.with_state(|state| state.loaded.push((role, identifier.to_string())));
        Ok(())
    }

    fn trigger(&self, role: SoundRole, at: HostTime) {
        let fired_at = self.clock.current_host_time();
        self.with_state(|state| {
            let muted = state.muted;
            state.triggers.push(TriggerRecord {
                role,
                scheduled_at: at,
                fired_at,
                muted,
            });
        });
    }

    fn set_volume(&self, role: SoundRole, level: f32) {
        let level = level.clamp(0.0, 1.0);
        self.with_state(|state| match role {
            SoundRole::Hi => state.hi_volume = level,
            SoundRole::Lo => state.lo_volume = level,
        });
    }

    fn set_muted(&self, muted: bool) {
        self.with_state(|state| state.muted = muted);
    }

    fn prime(&self) {
        self.with_state(|state| state.prime_count += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_trigger_is_stamped_with_fire_time() {
        let clock = Arc::new(ManualClock::new(HostTime(1_000), 0.0));
        let sink = RecordingSink::new(clock.clone());

        sink.trigger(SoundRole::Hi, HostTime(900));
        let records = sink.triggers();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].scheduled_at, HostTime(900));
        assert_eq!(records[0].fired_at, Some(HostTime(1_000)));
        assert!(!records[0].muted);
    }

    #[test]
    fn test_muted_triggers_are_not_audible() {
        let sink = RecordingSink::new(Arc::new(ManualClock::default()));
        sink.set_muted(true);
        sink.trigger(SoundRole::Lo, HostTime(0));
        sink.set_muted(false);
        sink.trigger(SoundRole::Lo, HostTime(1));

        assert_eq!(sink.triggers().len(), 2);
        assert_eq!(sink.audible_triggers().len(), 1);
    }

    #[test]
    fn test_volume_is_clamped() {
        let sink = RecordingSink::new(Arc::new(ManualClock::default()));
        sink.set_volume(SoundRole::Hi, 3.0);
        sink.set_volume(SoundRole::Lo, -1.0);
        assert_eq!(sink.volume(SoundRole::Hi), 1.0);
        assert_eq!(sink.volume(SoundRole::Lo), 0.0);
    }

    #[test]
    fn test_empty_identifier_is_rejected() {
        let sink = RecordingSink::new(Arc::new(ManualClock::default()));
        assert!(sink.load_sample(SoundRole::Hi, "").is_err());
        assert!(sink.load_sample(SoundRole::Hi, "Glass_hi").is_ok());
        assert_eq!(sink.loaded_samples(), vec![(SoundRole::Hi, "Glass_hi".to_string())]);
    }
}
