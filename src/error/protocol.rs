// Wire protocol error types and constants

use crate::error::ErrorCode;
use log::warn;
use std::fmt;

/// Protocol error code constants
///
/// Error code range: 3001-3005
pub struct ProtocolErrorCodes {}

impl ProtocolErrorCodes {
    /// Inbound bytes are not a well-formed command object
    pub const DECODE_FAILED: i32 = 3001;

    /// Command could not be serialized
    pub const ENCODE_FAILED: i32 = 3002;

    /// A field required by the command's action is absent
    pub const MISSING_FIELD: i32 = 3003;

    /// A field is present but its value is unusable (NaN, negative tempo...)
    pub const INVALID_VALUE: i32 = 3004;

    /// A field is present that the action does not carry
    pub const UNEXPECTED_FIELD: i32 = 3005;
}

/// Log a protocol error with structured context
///
/// Decode failures are expected on a lossy mesh, so they are logged at warn
/// level and never propagated to the sender.
pub fn log_protocol_error(err: &ProtocolError, context: &str) {
    warn!(
        "Protocol error in {}: code={}, component=CommandProtocol, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised while encoding or decoding a [`crate::protocol::SyncCommand`]
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Bytes could not be parsed as a command
    DecodeFailed { reason: String },

    /// Command could not be serialized
    EncodeFailed { reason: String },

    /// Required field missing for the given action
    MissingField {
        action: &'static str,
        field: &'static str,
    },

    /// Field value rejected
    InvalidValue { field: &'static str, value: f64 },

    /// Field not allowed for the given action
    UnexpectedField {
        action: &'static str,
        field: &'static str,
    },
}

impl ErrorCode for ProtocolError {
    fn code(&self) -> i32 {
        match self {
            ProtocolError::DecodeFailed { .. } => ProtocolErrorCodes::DECODE_FAILED,
            ProtocolError::EncodeFailed { .. } => ProtocolErrorCodes::ENCODE_FAILED,
            ProtocolError::MissingField { .. } => ProtocolErrorCodes::MISSING_FIELD,
            ProtocolError::InvalidValue { .. } => ProtocolErrorCodes::INVALID_VALUE,
            ProtocolError::UnexpectedField { .. } => ProtocolErrorCodes::UNEXPECTED_FIELD,
        }
    }

    fn message(&self) -> String {
        match self {
            ProtocolError::DecodeFailed { reason } => {
                format!("Failed to decode command: {}", reason)
            }
            ProtocolError::EncodeFailed { reason } => {
                format!("Failed to encode command: {}", reason)
            }
            ProtocolError::MissingField { action, field } => {
                format!("Action '{}' requires field '{}'", action, field)
            }
            ProtocolError::InvalidValue { field, value } => {
                format!("Field '{}' has invalid value {}", field, value)
            }
            ProtocolError::UnexpectedField { action, field } => {
                format!("Action '{}' does not carry field '{}'", action, field)
            }
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ProtocolError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ProtocolError {}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::DecodeFailed {
            reason: err.to_string(),
        }
    }
}
