//! Peer transport seam.
//!
//! The controller never talks to a concrete network stack. It holds a
//! [`PeerTransport`] for sending plus the single receiver of [`PeerEvent`]s
//! that the transport handed out when it was created; inbound bytes and peer
//! list changes arrive there in delivery order.

use crate::error::TransportError;

mod loopback;

pub use loopback::{LoopbackMesh, LoopbackPeer};

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Received { from: String, bytes: Vec<u8> },
    /// Full list of currently connected peer names
    PeersChanged(Vec<String>),
}

pub trait PeerTransport: Send + Sync {
    /// This device's display name on the mesh.
    fn local_name(&self) -> &str;

    /// Sends `bytes` reliably to every connected peer. Returns how many
    /// peers the message was handed to.
    fn broadcast(&self, bytes: &[u8]) -> Result<usize, TransportError>;

    fn connected_peers(&self) -> Vec<String>;
}
