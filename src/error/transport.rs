// Peer transport error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Peer transport error code constants
///
/// Error code range: 4001-4003
pub struct TransportErrorCodes {}

impl TransportErrorCodes {
    /// Broadcast attempted with nobody connected
    pub const NO_PEERS: i32 = 4001;

    /// The link to a peer (or the whole mesh) has gone away
    pub const LINK_CLOSED: i32 = 4002;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 4003;
}

/// Log a transport error with structured context
pub fn log_transport_error(err: &TransportError, context: &str) {
    error!(
        "Transport error in {}: code={}, component=PeerTransport, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors surfaced by [`crate::net::PeerTransport`] implementations
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// No connected peers to deliver to
    NoPeers,

    /// Link closed while sending
    LinkClosed { peer: String },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },
}

impl ErrorCode for TransportError {
    fn code(&self) -> i32 {
        match self {
            TransportError::NoPeers => TransportErrorCodes::NO_PEERS,
            TransportError::LinkClosed { .. } => TransportErrorCodes::LINK_CLOSED,
            TransportError::LockPoisoned { .. } => TransportErrorCodes::LOCK_POISONED,
        }
    }

    fn message(&self) -> String {
        match self {
            TransportError::NoPeers => "No connected peers".to_string(),
            TransportError::LinkClosed { peer } => format!("Link to peer '{}' closed", peer),
            TransportError::LockPoisoned { component } => {
                format!("Lock poisoned for component: {}", component)
            }
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TransportError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for TransportError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_codes() {
        assert_eq!(TransportError::NoPeers.code(), 4001);
        assert_eq!(
            TransportError::LinkClosed {
                peer: "a".to_string()
            }
            .code(),
            4002
        );
        assert_eq!(
            TransportError::LockPoisoned {
                component: "mesh".to_string()
            }
            .code(),
            4003
        );
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::LinkClosed {
            peer: "Drummer iPad".to_string(),
        };
        assert!(err.message().contains("Drummer iPad"));
        assert!(err.to_string().starts_with("TransportError::LinkClosed"));
    }
}
