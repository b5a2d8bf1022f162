//! Tick discovery inside the lookahead window.
//!
//! Polling only finds ticks that are due soon; firing them on time is the
//! trigger routine's job. Several ticks may be discovered in one poll, which
//! is what makes a jittery poll timer harmless as long as the poll interval
//! stays below the lookahead window.

use crate::clock::HostTime;
use crate::pattern::BeatPattern;

/// Upper bound on ticks handed out by a single poll.
const MAX_TICKS_PER_POLL: usize = 64;

/// One click discovered by the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTick {
    /// Run-relative counter, monotonic since start
    pub beat_index: u64,
    /// Position within the bar
    pub beat: u32,
    pub accented: bool,
    pub host_time: HostTime,
}

/// Run-time schedule state, owned exclusively by the poll loop.
#[derive(Debug, Clone)]
pub struct Lookahead {
    next_tick: HostTime,
    beat_index: u64,
}

impl Lookahead {
    pub fn new(start: HostTime) -> Self {
        Self {
            next_tick: start,
            beat_index: 0,
        }
    }

    pub fn next_tick(&self) -> HostTime {
        self.next_tick
    }

    pub fn beat_index(&self) -> u64 {
        self.beat_index
    }

    /// Collects every tick at or before `horizon`, advancing the schedule by
    /// `period_ticks` per tick.
    ///
    /// Ticks more than a full period behind `now` are skipped (their beat
    /// indices are still consumed so bar position is kept) instead of being
    /// fired as a burst.
    pub fn discover(
        &mut self,
        now: HostTime,
        horizon: HostTime,
        period_ticks: u64,
        pattern: &BeatPattern,
    ) -> Vec<ScheduledTick> {
        let period = period_ticks.max(1);

        let behind = now.delta_ticks(self.next_tick);
        if behind > period as i128 {
            let missed = (behind as u128 / period as u128) as u64;
            tracing::warn!(missed, "poll loop fell behind, skipping stale ticks");
            self.beat_index += missed;
            self.next_tick = self.next_tick.saturating_add(missed.saturating_mul(period));
        }

        let mut due = Vec::new();
        while self.next_tick <= horizon && due.len() < MAX_TICKS_PER_POLL {
            due.push(ScheduledTick {
                beat_index: self.beat_index,
                beat: pattern.beat_in_bar(self.beat_index),
                accented: pattern.is_accented(self.beat_index),
                host_time: self.next_tick,
            });
            self.beat_index += 1;
            self.next_tick = self.next_tick.saturating_add(period);
        }
        due
    }
}
