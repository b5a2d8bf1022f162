// Audio sink error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio error code constants
///
/// Error code range: 1001-1004
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// Requested sample identifier is unknown to the sink
    pub const SAMPLE_NOT_FOUND: i32 = 1001;

    /// No default output device available
    pub const NO_OUTPUT_DEVICE: i32 = 1002;

    /// Failed to open audio stream
    pub const STREAM_OPEN_FAILED: i32 = 1003;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1004;
}

/// Log an audio error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=AudioSink, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio-related errors
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Sample identifier could not be resolved
    SampleNotFound { identifier: String },

    /// No default output device found
    NoOutputDevice,

    /// Failed to open audio stream
    StreamOpenFailed { reason: String },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::SampleNotFound { .. } => AudioErrorCodes::SAMPLE_NOT_FOUND,
            AudioError::NoOutputDevice => AudioErrorCodes::NO_OUTPUT_DEVICE,
            AudioError::StreamOpenFailed { .. } => AudioErrorCodes::STREAM_OPEN_FAILED,
            AudioError::LockPoisoned { .. } => AudioErrorCodes::LOCK_POISONED,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::SampleNotFound { identifier } => {
                format!("Sample '{}' not found", identifier)
            }
            AudioError::NoOutputDevice => "No default output device found".to_string(),
            AudioError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned for component: {}", component)
            }
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}
