//! Sample-accurate trigger routine.
//!
//! Coarse timers jitter by tens of milliseconds, so each discovered tick gets
//! its own short-lived blocking job that sleeps in sub-millisecond steps
//! against the hardware clock and fires the sample the moment the target is
//! reached. The run id is re-checked before and after the wait; a job that
//! already passed its final check still plays (at most one extra click after
//! a stop).

use std::sync::Arc;
use std::time::Duration;

use crate::audio::{AudioSink, SoundRole};
use crate::clock::HardwareClock;
use crate::telemetry::{self, DiagnosticError};

use super::lookahead::ScheduledTick;
use super::run_id::RunId;
use super::SchedulerShared;

/// What became of one trigger job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Fired,
    /// The run was stopped or restarted before the target time
    Superseded,
    /// The hardware clock disappeared while waiting
    ClockLost,
}

/// Busy-waits until `tick.host_time`, then plays the tick if `run` is still live.
pub(crate) fn fire_when_due(
    shared: &SchedulerShared,
    clock: &dyn HardwareClock,
    sink: &dyn AudioSink,
    run: RunId,
    tick: &ScheduledTick,
    spin: Duration,
) -> TriggerOutcome {
    loop {
        if !shared.is_live(run) {
            return TriggerOutcome::Superseded;
        }
        let Some(now) = clock.current_host_time() else {
            return TriggerOutcome::ClockLost;
        };
        if now >= tick.host_time {
            break;
        }
        std::thread::sleep(spin);
    }

    if !shared.is_live(run) {
        return TriggerOutcome::Superseded;
    }

    sink.trigger(SoundRole::for_accent(tick.accented), tick.host_time);
    TriggerOutcome::Fired
}

/// Hands a tick to the blocking pool.
pub(crate) fn dispatch(
    shared: Arc<SchedulerShared>,
    clock: Arc<dyn HardwareClock>,
    sink: Arc<dyn AudioSink>,
    run: RunId,
    tick: ScheduledTick,
    spin: Duration,
) {
    tokio::task::spawn_blocking(move || {
        match fire_when_due(&shared, clock.as_ref(), sink.as_ref(), run, &tick, spin) {
            TriggerOutcome::Fired => {
                if let Some(now) = clock.current_host_time() {
                    let late = now.delta_ticks(tick.host_time).max(0) as u64;
                    let late_ms = clock.host_ticks_to_seconds(late) * 1000.0;
                    telemetry::hub().record_trigger_lateness(late_ms as f32);
                }
            }
            TriggerOutcome::Superseded => {}
            TriggerOutcome::ClockLost => {
                tracing::debug!(beat_index = tick.beat_index, "hardware clock lost, tick dropped");
                telemetry::hub().record_error(DiagnosticError::ClockUnavailable, "trigger wait");
            }
        }
    });
}
