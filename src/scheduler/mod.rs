//! Transport scheduler: the running/stopped state machine and the lookahead
//! poll loop that turns tempo into sample-accurate click triggers.
//!
//! Three concurrency surfaces, none sharing a lock on the audio path:
//! - the poll loop, a tokio task that is the sole owner of the tick schedule;
//! - one blocking trigger job per discovered tick (see [`trigger`]);
//! - beat events, delivered in emission order over an unbounded channel to
//!   whichever serial context drives the UI.
//!
//! Control state (run id, running flag, tempo, pattern) is written only by
//! the control side and read by the other two.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audio::metronome::tick_period_secs;
use crate::audio::AudioSink;
use crate::clock::{HardwareClock, HostTime};
use crate::config::SchedulerConfig;
use crate::pattern::BeatPattern;
use crate::telemetry::{self, TransportPhase};

pub mod lookahead;
pub mod run_id;
pub mod trigger;

pub use lookahead::{Lookahead, ScheduledTick};
pub use run_id::{RunId, RunIdCell};
pub use trigger::TriggerOutcome;

/// Beat notification for the UI side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    pub run_id: RunId,
    pub beat_index: u64,
    /// Position within the bar
    pub beat: u32,
    pub accented: bool,
    pub host_time: Option<HostTime>,
    /// Emitted on start/stop to rewind the display to beat 0; not a click
    pub reset: bool,
}

impl BeatEvent {
    fn reset(run_id: RunId) -> Self {
        Self {
            run_id,
            beat_index: 0,
            beat: 0,
            accented: false,
            host_time: None,
            reset: true,
        }
    }

    fn tick(run_id: RunId, tick: &ScheduledTick) -> Self {
        Self {
            run_id,
            beat_index: tick.beat_index,
            beat: tick.beat,
            accented: tick.accented,
            host_time: Some(tick.host_time),
            reset: false,
        }
    }
}

/// State read by the poll loop and trigger jobs.
pub(crate) struct SchedulerShared {
    pub(crate) run_id: RunIdCell,
    pub(crate) running: AtomicBool,
    bpm_bits: AtomicU64,
    pattern: RwLock<BeatPattern>,
}

impl SchedulerShared {
    pub(crate) fn new(bpm: f64, pattern: BeatPattern) -> Self {
        Self {
            run_id: RunIdCell::new(),
            running: AtomicBool::new(false),
            bpm_bits: AtomicU64::new(bpm.to_bits()),
            pattern: RwLock::new(pattern),
        }
    }

    pub(crate) fn is_live(&self, run: RunId) -> bool {
        self.running.load(Ordering::SeqCst) && self.run_id.is_current(run)
    }

    fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm_bits.load(Ordering::SeqCst))
    }

    fn read_pattern(&self) -> RwLockReadGuard<'_, BeatPattern> {
        self.pattern.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_pattern<T>(&self, f: impl FnOnce(&mut BeatPattern) -> T) -> T {
        let mut guard = self.pattern.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Everything the poll loop needs, cloned into its task.
#[derive(Clone)]
struct LoopContext {
    shared: Arc<SchedulerShared>,
    clock: Arc<dyn HardwareClock>,
    sink: Arc<dyn AudioSink>,
    config: SchedulerConfig,
    beat_tx: mpsc::UnboundedSender<BeatEvent>,
}

pub struct TransportScheduler {
    ctx: LoopContext,
    runtime: Handle,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl TransportScheduler {
    /// Creates a stopped scheduler at `bpm` and the receiving end of its beat channel.
    pub fn new(
        clock: Arc<dyn HardwareClock>,
        sink: Arc<dyn AudioSink>,
        config: SchedulerConfig,
        bpm: f64,
        runtime: Handle,
    ) -> (Self, mpsc::UnboundedReceiver<BeatEvent>) {
        if !config.is_jitter_safe() {
            tracing::warn!(
                poll_ms = config.poll_interval_ms,
                lookahead_ms = config.lookahead_ms,
                "lookahead window does not exceed poll interval; ticks may be discovered late"
            );
        }
        let bpm = if bpm.is_finite() && bpm > 0.0 { bpm } else { 120.0 };
        let (beat_tx, beat_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            ctx: LoopContext {
                shared: Arc::new(SchedulerShared::new(bpm, BeatPattern::default())),
                clock,
                sink,
                config,
                beat_tx,
            },
            runtime,
            poll_task: Mutex::new(None),
        };
        (scheduler, beat_rx)
    }

    // ========================================================================
    // TRANSPORT
    // ========================================================================

    /// Starts (or restarts) a run whose first click lands at `at`.
    pub fn start(&self, at: HostTime) -> RunId {
        self.cancel_poll_loop();

        let shared = &self.ctx.shared;
        let run = shared.run_id.mint();
        shared.running.store(true, Ordering::SeqCst);
        self.emit(BeatEvent::reset(run));

        tracing::info!(run = run.0, at = at.0, bpm = shared.bpm(), "transport started");
        telemetry::hub().record_transport(TransportPhase::Started, run);

        let ctx = self.ctx.clone();
        let task = self.runtime.spawn(poll_loop(ctx, run, Lookahead::new(at)));
        if let Ok(mut guard) = self.poll_task.lock() {
            *guard = Some(task);
        }
        run
    }

    /// Starts at the current host time. Returns `None` if the clock is unavailable.
    pub fn start_now(&self) -> Option<RunId> {
        let now = self.ctx.clock.current_host_time()?;
        Some(self.start(now))
    }

    /// Stops the run and invalidates all pending triggers.
    pub fn stop(&self) -> RunId {
        let shared = &self.ctx.shared;
        let run = shared.run_id.mint();
        let was_running = shared.running.swap(false, Ordering::SeqCst);
        self.cancel_poll_loop();
        self.emit(BeatEvent::reset(run));
        if was_running {
            tracing::info!(run = run.0, "transport stopped");
            telemetry::hub().record_transport(TransportPhase::Stopped, run);
        }
        run
    }

    pub fn is_running(&self) -> bool {
        self.ctx.shared.running.load(Ordering::SeqCst)
    }

    pub fn run_id(&self) -> RunId {
        self.ctx.shared.run_id.current()
    }

    // ========================================================================
    // TEMPO & PATTERN
    // ========================================================================

    /// Sets the tick rate. The already-committed next tick keeps its time;
    /// the new period applies from the advance after it.
    pub fn set_tempo(&self, bpm: f64) -> bool {
        if !bpm.is_finite() || bpm <= 0.0 {
            tracing::warn!(bpm, "ignoring invalid tempo");
            return false;
        }
        self.ctx.shared.bpm_bits.store(bpm.to_bits(), Ordering::SeqCst);
        tracing::debug!(bpm, period = tick_period_secs(bpm), "tick period updated");
        telemetry::hub().record_tempo(bpm);
        true
    }

    pub fn tempo(&self) -> f64 {
        self.ctx.shared.bpm()
    }

    pub fn tick_period_secs(&self) -> f64 {
        tick_period_secs(self.ctx.shared.bpm())
    }

    /// Changes the bar length; with `restart`, a running transport restarts
    /// from beat 0 at the current host time.
    pub fn set_numerator(&self, numerator: u32, restart: bool) {
        self.ctx.shared.update_pattern(|pattern| pattern.set_numerator(numerator));
        if restart && self.is_running() && self.start_now().is_none() {
            tracing::warn!("hardware clock unavailable, numerator change applied without restart");
        }
    }

    pub fn toggle_accent(&self, beat: u32) -> bool {
        self.ctx.shared.update_pattern(|pattern| pattern.toggle_accent(beat))
    }

    pub fn pattern(&self) -> BeatPattern {
        self.ctx.shared.read_pattern().clone()
    }

    pub fn clock(&self) -> &Arc<dyn HardwareClock> {
        &self.ctx.clock
    }

    pub fn sink(&self) -> &Arc<dyn AudioSink> {
        &self.ctx.sink
    }

    // ========================================================================
    // PRIVATE HELPERS
    // ========================================================================

    fn emit(&self, event: BeatEvent) {
        let _ = self.ctx.beat_tx.send(event);
    }

    fn cancel_poll_loop(&self) {
        if let Ok(mut guard) = self.poll_task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}

impl Drop for TransportScheduler {
    fn drop(&mut self) {
        self.ctx.shared.running.store(false, Ordering::SeqCst);
        self.ctx.shared.run_id.mint();
        self.cancel_poll_loop();
    }
}

async fn poll_loop(ctx: LoopContext, run: RunId, mut lookahead: Lookahead) {
    let mut interval = tokio::time::interval(ctx.config.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let lookahead_secs = ctx.config.lookahead().as_secs_f64();
    let spin = ctx.config.spin_sleep();

    loop {
        interval.tick().await;
        if !ctx.shared.is_live(run) {
            break;
        }

        // Absent clock: the engine is not rendering yet, try again next poll
        let Some(now) = ctx.clock.current_host_time() else {
            continue;
        };
        let horizon = ctx.clock.host_time_after(now, lookahead_secs);
        let period = ctx
            .clock
            .seconds_to_host_ticks(tick_period_secs(ctx.shared.bpm()));

        let due = {
            let pattern = ctx.shared.read_pattern();
            lookahead.discover(now, horizon, period, &pattern)
        };

        for tick in due {
            trigger::dispatch(
                Arc::clone(&ctx.shared),
                Arc::clone(&ctx.clock),
                Arc::clone(&ctx.sink),
                run,
                tick,
                spin,
            );
            let _ = ctx.beat_tx.send(BeatEvent::tick(run, &tick));
        }
    }
}
