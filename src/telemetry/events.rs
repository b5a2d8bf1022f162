//! Telemetry event types describing transport, sync and command activity.

use serde::{Deserialize, Serialize};

use crate::protocol::Action;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportPhase {
    Started,
    Stopped,
}

/// Whether a command left or reached this device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandDirection {
    Sent,
    Received,
}

/// Diagnostic error codes surfaced via telemetry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticError {
    DecodeFailed,
    BroadcastFailed,
    ClockUnavailable,
    SampleLoad,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    /// Rolling lateness of fired clicks relative to their target host time
    TriggerLatency {
        avg_ms: f32,
        max_ms: f32,
        sample_count: usize,
    },
    Transport {
        phase: TransportPhase,
        run_id: u64,
        timestamp_ms: u64,
    },
    TempoChanged {
        bpm: f64,
    },
    SyncScheduled {
        start_at_wall_clock: f64,
        start_delay_secs: f64,
        late: bool,
    },
    Command {
        action: Action,
        direction: CommandDirection,
        followed: bool,
    },
    PeersChanged {
        count: usize,
    },
    Error {
        code: DiagnosticError,
        context: String,
    },
}
