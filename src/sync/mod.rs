//! Wall-clock to host-time bridge for shared starts.
//!
//! Devices agree on a wall-clock instant `T`; each one converts `T` into its
//! own hardware clock coordinate right before starting, so clocks with
//! unrelated origins still click together. Assumes the devices' wall clocks
//! are already in agreement (NTP or equivalent); no offset estimation is done
//! here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::clock::{HardwareClock, WallClock};
use crate::config::SyncConfig;
use crate::scheduler::{RunId, RunIdCell, TransportScheduler};
use crate::telemetry::{self, DiagnosticError};

/// What [`SyncCoordinator::schedule_start`] arranged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartPlan {
    /// Token guarding the deferred work; superseded by the next schedule or cancel
    pub token: RunId,
    pub start_at_wall_clock: f64,
    /// Seconds until warm-up; zero when warm-up ran immediately
    pub warmup_delay_secs: f64,
    /// Seconds until start; zero or negative for a late command
    pub start_delay_secs: f64,
    /// The start instant had already passed; the run began at the current host time
    pub late: bool,
    /// Scheduler run started synchronously (late path with a live clock)
    pub started: Option<RunId>,
}

/// Outcomes of deferred work that the caller did not witness directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// The hardware clock never appeared; the start guarded by `token` was dropped
    Abandoned { token: RunId },
}

/// Result of one attempt to convert `T` and start the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaunchOutcome {
    Started(RunId),
    ClockAbsent,
    Superseded,
}

struct SyncInner {
    scheduler: Arc<TransportScheduler>,
    wall: Arc<dyn WallClock>,
    config: SyncConfig,
    retry_interval: Duration,
    token: RunIdCell,
    warming_up: AtomicBool,
    /// Held across "token still current" plus the scheduler call that acts on it
    gate: Mutex<()>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncInner {
    fn lock_gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clock(&self) -> &dyn HardwareClock {
        self.scheduler.clock().as_ref()
    }

    fn warm_up(&self, token: RunId) -> bool {
        if !self.token.is_current(token) {
            return false;
        }
        let sink = self.scheduler.sink();
        sink.set_muted(true);
        sink.prime();
        self.warming_up.store(true, Ordering::SeqCst);
        tracing::debug!(token = token.0, "sync warm-up: muted and primed");
        true
    }

    /// Converts `target_wall` to host time and starts; a target already in
    /// the past starts at the current host time.
    ///
    /// The sink is unmuted before `scheduler.start`, not after, so the first
    /// click never lands inside the warm-up mute. The final token check and
    /// the start run under `gate`, which `cancel` also holds while it mints
    /// and stops: a cancel either wins the check or stops this run.
    fn launch(&self, token: RunId, target_wall: f64) -> LaunchOutcome {
        if !self.token.is_current(token) {
            return LaunchOutcome::Superseded;
        }
        let clock = self.clock();
        let Some(now_host) = clock.current_host_time() else {
            return LaunchOutcome::ClockAbsent;
        };
        let now_wall = self.wall.now_unix();

        let _gate = self.lock_gate();
        if !self.token.is_current(token) {
            tracing::debug!(token = token.0, "start superseded while reading the clock");
            return LaunchOutcome::Superseded;
        }
        let remaining = (target_wall - now_wall).max(0.0);
        let start_host = clock.host_time_after(now_host, remaining);

        self.scheduler.sink().set_muted(false);
        self.warming_up.store(false, Ordering::SeqCst);
        let run = self.scheduler.start(start_host);
        tracing::info!(
            token = token.0,
            run = run.0,
            host = start_host.0,
            remaining_secs = remaining,
            "synchronized start"
        );
        LaunchOutcome::Started(run)
    }

    async fn launch_with_retry(&self, token: RunId, target_wall: f64) {
        let limit = self.config.clock_retry_limit;
        for attempt in 0..=limit {
            match self.launch(token, target_wall) {
                LaunchOutcome::Started(_) | LaunchOutcome::Superseded => return,
                LaunchOutcome::ClockAbsent => {
                    tracing::debug!(attempt, "hardware clock unavailable at start, retrying");
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
        self.abandon(token, limit);
    }

    fn abandon(&self, token: RunId, retries: u32) {
        let _gate = self.lock_gate();
        if !self.token.is_current(token) {
            return;
        }
        tracing::warn!(retries, "abandoning synchronized start, hardware clock never appeared");
        telemetry::hub().record_error(DiagnosticError::ClockUnavailable, "synchronized start");
        self.scheduler.sink().set_muted(false);
        self.warming_up.store(false, Ordering::SeqCst);
        let _ = self.events.send(SyncEvent::Abandoned { token });
    }
}

/// Schedules and cancels synchronized starts for one device.
pub struct SyncCoordinator {
    inner: Arc<SyncInner>,
    runtime: Handle,
}

impl SyncCoordinator {
    /// `retry_interval` is how long to wait between reads of an absent
    /// hardware clock; normally the scheduler's poll interval.
    pub fn new(
        scheduler: Arc<TransportScheduler>,
        wall: Arc<dyn WallClock>,
        config: SyncConfig,
        retry_interval: Duration,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                scheduler,
                wall,
                config,
                retry_interval,
                token: RunIdCell::new(),
                warming_up: AtomicBool::new(false),
                gate: Mutex::new(()),
                events: broadcast::channel(16).0,
            }),
            runtime,
        }
    }

    /// Arranges for the scheduler to start at wall-clock instant `start_at`.
    ///
    /// Any earlier pending start is superseded. Warm-up (mute and prime)
    /// happens `warmup_ms` before `start_at`, or right away if that moment
    /// has passed.
    pub fn schedule_start(&self, start_at: f64) -> StartPlan {
        let inner = &self.inner;
        let token = {
            let _gate = inner.lock_gate();
            inner.token.mint()
        };
        let now = inner.wall.now_unix();
        let warmup_deadline = start_at - inner.config.warmup_secs();
        let warmup_delay = warmup_deadline - now;
        let start_delay = start_at - now;
        let late = start_delay <= 0.0;

        telemetry::hub().record_sync_scheduled(start_at, start_delay, late);

        if late {
            tracing::warn!(start_at, late_by_secs = -start_delay, "start command arrived late");
            inner.warm_up(token);
            let started = match inner.launch(token, start_at) {
                LaunchOutcome::Started(run) => Some(run),
                LaunchOutcome::ClockAbsent => {
                    let retry = Arc::clone(inner);
                    self.runtime
                        .spawn(async move { retry.launch_with_retry(token, start_at).await });
                    None
                }
                LaunchOutcome::Superseded => None,
            };
            return StartPlan {
                token,
                start_at_wall_clock: start_at,
                warmup_delay_secs: 0.0,
                start_delay_secs: start_delay,
                late,
                started,
            };
        }

        tracing::info!(start_at, start_delay_secs = start_delay, "synchronized start scheduled");

        if warmup_delay <= 0.0 {
            inner.warm_up(token);
        }

        let deferred = Arc::clone(inner);
        self.runtime.spawn(async move {
            let base = Instant::now();
            if warmup_delay > 0.0 {
                tokio::time::sleep_until(base + Duration::from_secs_f64(warmup_delay)).await;
                if !deferred.warm_up(token) {
                    return;
                }
            }
            tokio::time::sleep_until(base + Duration::from_secs_f64(start_delay)).await;
            deferred.launch_with_retry(token, start_at).await;
        });

        StartPlan {
            token,
            start_at_wall_clock: start_at,
            warmup_delay_secs: warmup_delay.max(0.0),
            start_delay_secs: start_delay,
            late,
            started: None,
        }
    }

    /// Supersedes any pending start, stops the scheduler and unmutes.
    pub fn cancel(&self) -> RunId {
        let inner = &self.inner;
        let token = {
            let _gate = inner.lock_gate();
            let token = inner.token.mint();
            inner.scheduler.stop();
            token
        };
        inner.scheduler.sink().set_muted(false);
        inner.warming_up.store(false, Ordering::SeqCst);
        tracing::debug!(token = token.0, "synchronized start cancelled");
        token
    }

    /// True between warm-up and start.
    pub fn is_warming_up(&self) -> bool {
        self.inner.warming_up.load(Ordering::SeqCst)
    }

    /// Abandoned starts and similar outcomes of deferred work.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn token(&self) -> RunId {
        self.inner.token.current()
    }

    pub fn scheduler(&self) -> &Arc<TransportScheduler> {
        &self.inner.scheduler
    }
}
