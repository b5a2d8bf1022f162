//! Diagnostics telemetry collector and helpers.
//!
//! The collector multiplexes transport, sync, command and trigger-latency
//! events into a bounded history plus an async broadcast stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use tokio::sync::{broadcast, mpsc};

use crate::protocol::Action;
use crate::scheduler::RunId;

pub mod events;

pub use events::{CommandDirection, DiagnosticError, MetricEvent, TransportPhase};

/// Global telemetry hub shared across the crate.
static HUB: Lazy<TelemetryHub> = Lazy::new(TelemetryHub::default);

/// Access the global telemetry hub.
pub fn hub() -> &'static TelemetryHub {
    &HUB
}

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<MetricEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Broadcast-based collector retaining a bounded history of metrics.
pub struct TelemetryCollector {
    tx: broadcast::Sender<MetricEvent>,
    history: Mutex<VecDeque<MetricEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity: history_capacity.max(1),
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: MetricEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = lock(&self.history);
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.tx.subscribe()
    }

    /// Forwards the broadcast stream into an unbounded receiver. Must be
    /// called from within a tokio runtime.
    pub fn subscribe_unbounded(&self) -> mpsc::UnboundedReceiver<MetricEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut broadcast_rx = self.tx.subscribe();

        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::debug!("telemetry subscriber lagged by {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        rx
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let history = lock(&self.history);
        TelemetrySnapshot {
            recent: history.iter().cloned().collect(),
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Rolling window used to compute avg/max latency.
struct LatencyTracker {
    samples: VecDeque<f32>,
    max_samples: usize,
}

impl LatencyTracker {
    fn new(max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    fn observe(&mut self, value: f32) -> (f32, f32, usize) {
        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value.abs());

        let count = self.samples.len();
        let sum: f32 = self.samples.iter().copied().sum();
        let max = self
            .samples
            .iter()
            .copied()
            .fold(0.0_f32, |acc, next| acc.max(next));
        (sum / count as f32, max, count)
    }
}

/// Top-level hub wrapping collector state plus the trigger latency gauge.
pub struct TelemetryHub {
    collector: TelemetryCollector,
    latency: Mutex<LatencyTracker>,
}

impl TelemetryHub {
    pub fn new(channel_capacity: usize, history_capacity: usize, latency_window: usize) -> Self {
        Self {
            collector: TelemetryCollector::new(channel_capacity, history_capacity),
            latency: Mutex::new(LatencyTracker::new(latency_window)),
        }
    }

    pub fn collector(&self) -> &TelemetryCollector {
        &self.collector
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.collector.snapshot()
    }

    /// Records how late a click fired relative to its target.
    pub fn record_trigger_lateness(&self, late_ms: f32) {
        let (avg_ms, max_ms, sample_count) = lock(&self.latency).observe(late_ms);
        self.collector.publish(MetricEvent::TriggerLatency {
            avg_ms,
            max_ms,
            sample_count,
        });
    }

    pub fn record_transport(&self, phase: TransportPhase, run_id: RunId) {
        self.collector.publish(MetricEvent::Transport {
            phase,
            run_id: run_id.0,
            timestamp_ms: now_timestamp_ms(),
        });
    }

    pub fn record_tempo(&self, bpm: f64) {
        self.collector.publish(MetricEvent::TempoChanged { bpm });
    }

    pub fn record_sync_scheduled(&self, start_at_wall_clock: f64, start_delay_secs: f64, late: bool) {
        self.collector.publish(MetricEvent::SyncScheduled {
            start_at_wall_clock,
            start_delay_secs,
            late,
        });
    }

    pub fn record_command(&self, action: Action, direction: CommandDirection, followed: bool) {
        self.collector.publish(MetricEvent::Command {
            action,
            direction,
            followed,
        });
    }

    pub fn record_peers(&self, count: usize) {
        self.collector.publish(MetricEvent::PeersChanged { count });
    }

    pub fn record_error(&self, code: DiagnosticError, context: impl Into<String>) {
        self.collector.publish(MetricEvent::Error {
            code,
            context: context.into(),
        });
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(256, 64, 32)
    }
}

fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
