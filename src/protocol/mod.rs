//! Wire command exchanged between devices, and the role rules that decide
//! who may send and who must follow.
//!
//! Commands travel as a single JSON object:
//!
//! ```json
//! {"action":"start","sender":"master","start_at_wall_clock":1767225601.0}
//! {"action":"set_tempo","sender":"master","tempo":132.0}
//! ```
//!
//! Decoding is strict: unknown fields or tags, a field the action does not
//! carry, a missing required field, and non-finite or non-positive values
//! are all rejected.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

pub mod role;

pub use role::{Inbound, Role, RoleCoordinator};

/// What a command asks the receiver to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Start playing at a shared wall-clock instant
    Start,
    Stop,
    /// Apply a tempo immediately
    SetTempo,
    /// Apply a tempo at the next bar boundary
    CueTempo,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::SetTempo => "set_tempo",
            Action::CueTempo => "cue_tempo",
        }
    }
}

/// Wire shape before per-action validation.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireCommand {
    action: Action,
    sender: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tempo: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_at_wall_clock: Option<f64>,
}

/// An immutable, validated command.
///
/// Built only through the per-action constructors or [`SyncCommand::decode`],
/// so a `Start` always carries a start instant and tempo actions always carry
/// a positive tempo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncCommand {
    action: Action,
    sender: Role,
    tempo: Option<f64>,
    start_at_wall_clock: Option<f64>,
}

impl SyncCommand {
    pub fn start(sender: Role, start_at_wall_clock: f64) -> Result<Self, ProtocolError> {
        validate_instant(start_at_wall_clock)?;
        Ok(Self {
            action: Action::Start,
            sender,
            tempo: None,
            start_at_wall_clock: Some(start_at_wall_clock),
        })
    }

    pub fn stop(sender: Role) -> Self {
        Self {
            action: Action::Stop,
            sender,
            tempo: None,
            start_at_wall_clock: None,
        }
    }

    pub fn set_tempo(sender: Role, bpm: f64) -> Result<Self, ProtocolError> {
        Self::tempo_command(Action::SetTempo, sender, bpm)
    }

    pub fn cue_tempo(sender: Role, bpm: f64) -> Result<Self, ProtocolError> {
        Self::tempo_command(Action::CueTempo, sender, bpm)
    }

    fn tempo_command(action: Action, sender: Role, bpm: f64) -> Result<Self, ProtocolError> {
        validate_tempo(bpm)?;
        Ok(Self {
            action,
            sender,
            tempo: Some(bpm),
            start_at_wall_clock: None,
        })
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn sender(&self) -> Role {
        self.sender
    }

    pub fn tempo(&self) -> Option<f64> {
        self.tempo
    }

    pub fn start_at_wall_clock(&self) -> Option<f64> {
        self.start_at_wall_clock
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let wire = WireCommand {
            action: self.action,
            sender: self.sender,
            tempo: self.tempo,
            start_at_wall_clock: self.start_at_wall_clock,
        };
        serde_json::to_vec(&wire).map_err(|err| ProtocolError::EncodeFailed {
            reason: err.to_string(),
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let wire: WireCommand = serde_json::from_slice(bytes)?;
        let action = wire.action.as_str();

        match wire.action {
            Action::Start => {
                if wire.tempo.is_some() {
                    return Err(ProtocolError::UnexpectedField {
                        action,
                        field: "tempo",
                    });
                }
                let at = wire.start_at_wall_clock.ok_or(ProtocolError::MissingField {
                    action,
                    field: "start_at_wall_clock",
                })?;
                Self::start(wire.sender, at)
            }
            Action::Stop => {
                if wire.tempo.is_some() {
                    return Err(ProtocolError::UnexpectedField {
                        action,
                        field: "tempo",
                    });
                }
                if wire.start_at_wall_clock.is_some() {
                    return Err(ProtocolError::UnexpectedField {
                        action,
                        field: "start_at_wall_clock",
                    });
                }
                Ok(Self::stop(wire.sender))
            }
            Action::SetTempo | Action::CueTempo => {
                if wire.start_at_wall_clock.is_some() {
                    return Err(ProtocolError::UnexpectedField {
                        action,
                        field: "start_at_wall_clock",
                    });
                }
                let bpm = wire.tempo.ok_or(ProtocolError::MissingField {
                    action,
                    field: "tempo",
                })?;
                Self::tempo_command(wire.action, wire.sender, bpm)
            }
        }
    }
}

fn validate_tempo(bpm: f64) -> Result<(), ProtocolError> {
    if !bpm.is_finite() || bpm <= 0.0 {
        return Err(ProtocolError::InvalidValue {
            field: "tempo",
            value: bpm,
        });
    }
    Ok(())
}

fn validate_instant(unix: f64) -> Result<(), ProtocolError> {
    if !unix.is_finite() || unix < 0.0 {
        return Err(ProtocolError::InvalidValue {
            field: "start_at_wall_clock",
            value: unix,
        });
    }
    Ok(())
}

/// Start instant a master proposes: the next whole second plus `margin_secs`.
///
/// Rounding to a whole second gives receivers a predictable instant; the
/// margin covers delivery latency.
pub fn pick_start_time(now_unix: f64, margin_secs: f64) -> f64 {
    now_unix.ceil() + margin_secs.max(0.0)
}
