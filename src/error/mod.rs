// Error types for click_sync
//
// Structured error enums with stable numeric codes. Nothing in the sync or
// scheduling path is fatal: callers log these and degrade to "nothing happens
// this cycle".

mod audio;
mod protocol;
mod transport;

pub use audio::{log_audio_error, AudioError, AudioErrorCodes};
pub use protocol::{log_protocol_error, ProtocolError, ProtocolErrorCodes};
pub use transport::{log_transport_error, TransportError, TransportErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, so CLI output and telemetry can report them
/// uniformly.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
