//! In-process mesh used by tests and the CLI simulation.
//!
//! Every member is connected to every other member. Delivery to one member
//! is FIFO, so messages on a link never overtake each other even when
//! random latency is enabled.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{log_transport_error, TransportError};

use super::{PeerEvent, PeerTransport};

/// Route into one member's event receiver.
#[derive(Clone)]
enum Inbox {
    Direct(mpsc::UnboundedSender<PeerEvent>),
    Delayed(mpsc::UnboundedSender<(Instant, PeerEvent)>),
}

impl Inbox {
    fn deliver(&self, event: PeerEvent, delay: Duration) -> bool {
        match self {
            Inbox::Direct(tx) => tx.send(event).is_ok(),
            Inbox::Delayed(tx) => tx.send((Instant::now() + delay, event)).is_ok(),
        }
    }
}

#[derive(Default)]
struct MeshState {
    members: BTreeMap<String, Inbox>,
}

impl MeshState {
    fn names_except(&self, name: &str) -> Vec<String> {
        self.members
            .keys()
            .filter(|member| member.as_str() != name)
            .cloned()
            .collect()
    }
}

struct MeshInner {
    state: Mutex<MeshState>,
    latency: Option<(Duration, Duration)>,
}

impl MeshInner {
    fn lock(&self) -> MutexGuard<'_, MeshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_delay(&self) -> Duration {
        match self.latency {
            Some((min, max)) if max > min => rand::thread_rng().gen_range(min..=max),
            Some((min, _)) => min,
            None => Duration::ZERO,
        }
    }

    fn announce_membership(&self, state: &MeshState) {
        for (name, inbox) in &state.members {
            inbox.deliver(PeerEvent::PeersChanged(state.names_except(name)), self.next_delay());
        }
    }
}

/// Shared mesh that peers join by name.
#[derive(Clone)]
pub struct LoopbackMesh {
    inner: Arc<MeshInner>,
}

impl LoopbackMesh {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MeshInner {
                state: Mutex::new(MeshState::default()),
                latency: None,
            }),
        }
    }

    /// Each delivery is delayed by a random duration in `[min, max]`.
    /// Members must join from within a tokio runtime.
    pub fn with_latency(min: Duration, max: Duration) -> Self {
        Self {
            inner: Arc::new(MeshInner {
                state: Mutex::new(MeshState::default()),
                latency: Some((min, max.max(min))),
            }),
        }
    }

    /// Adds a member and announces the new peer list to everyone.
    ///
    /// Joining under a name already in use replaces the previous member.
    pub fn join(&self, name: &str) -> (LoopbackPeer, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inbox = match (self.inner.latency, Handle::try_current()) {
            (Some(_), Ok(runtime)) => {
                let (delayed_tx, delayed_rx) = mpsc::unbounded_channel();
                runtime.spawn(forward_delayed(delayed_rx, events_tx));
                Inbox::Delayed(delayed_tx)
            }
            (Some(_), Err(_)) => {
                log::warn!("loopback latency requires a tokio runtime; delivering '{}' immediately", name);
                Inbox::Direct(events_tx)
            }
            (None, _) => Inbox::Direct(events_tx),
        };

        {
            let mut state = self.inner.lock();
            state.members.insert(name.to_string(), inbox);
            self.inner.announce_membership(&state);
        }
        log::debug!("loopback peer '{}' joined", name);

        let peer = LoopbackPeer {
            name: name.to_string(),
            mesh: Arc::clone(&self.inner),
        };
        (peer, events_rx)
    }

    pub fn member_count(&self) -> usize {
        self.inner.lock().members.len()
    }
}

impl Default for LoopbackMesh {
    fn default() -> Self {
        Self::new()
    }
}

async fn forward_delayed(
    mut delayed: mpsc::UnboundedReceiver<(Instant, PeerEvent)>,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    while let Some((deliver_at, event)) = delayed.recv().await {
        tokio::time::sleep_until(deliver_at).await;
        if events.send(event).is_err() {
            break;
        }
    }
}

/// One member's handle on a [`LoopbackMesh`]. Leaves the mesh on drop.
pub struct LoopbackPeer {
    name: String,
    mesh: Arc<MeshInner>,
}

impl PeerTransport for LoopbackPeer {
    fn local_name(&self) -> &str {
        &self.name
    }

    fn broadcast(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        let state = self.mesh.lock();
        let mut delivered = 0;
        for (name, inbox) in &state.members {
            if name == &self.name {
                continue;
            }
            let event = PeerEvent::Received {
                from: self.name.clone(),
                bytes: bytes.to_vec(),
            };
            if inbox.deliver(event, self.mesh.next_delay()) {
                delivered += 1;
            } else {
                log_transport_error(
                    &TransportError::LinkClosed { peer: name.clone() },
                    "LoopbackPeer::broadcast",
                );
            }
        }
        if delivered == 0 {
            return Err(TransportError::NoPeers);
        }
        Ok(delivered)
    }

    fn connected_peers(&self) -> Vec<String> {
        self.mesh.lock().names_except(&self.name)
    }
}

impl Drop for LoopbackPeer {
    fn drop(&mut self) {
        let mut state = self.mesh.lock();
        if state.members.remove(&self.name).is_some() {
            self.mesh.announce_membership(&state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<PeerEvent>) -> Vec<PeerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_join_announces_peer_lists() {
        let mesh = LoopbackMesh::new();
        let (_a, mut a_rx) = mesh.join("a");
        let (b, mut b_rx) = mesh.join("b");

        assert_eq!(
            drain(&mut a_rx),
            vec![
                PeerEvent::PeersChanged(vec![]),
                PeerEvent::PeersChanged(vec!["b".to_string()])
            ]
        );
        assert_eq!(drain(&mut b_rx), vec![PeerEvent::PeersChanged(vec!["a".to_string()])]);
        assert_eq!(b.connected_peers(), vec!["a".to_string()]);
    }

    #[test]
    fn test_broadcast_reaches_everyone_but_sender() {
        let mesh = LoopbackMesh::new();
        let (a, mut a_rx) = mesh.join("a");
        let (_b, mut b_rx) = mesh.join("b");
        let (_c, mut c_rx) = mesh.join("c");
        drain(&mut a_rx);
        drain(&mut b_rx);
        drain(&mut c_rx);

        assert_eq!(a.broadcast(b"hello").unwrap(), 2);
        let expected = PeerEvent::Received {
            from: "a".to_string(),
            bytes: b"hello".to_vec(),
        };
        assert_eq!(drain(&mut b_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut c_rx), vec![expected]);
        assert!(drain(&mut a_rx).is_empty());
    }

    #[test]
    fn test_broadcast_without_peers_fails() {
        let mesh = LoopbackMesh::new();
        let (a, _rx) = mesh.join("a");
        assert_eq!(a.broadcast(b"x"), Err(TransportError::NoPeers));
    }

    #[test]
    fn test_drop_leaves_mesh() {
        let mesh = LoopbackMesh::new();
        let (_a, mut a_rx) = mesh.join("a");
        let (b, _b_rx) = mesh.join("b");
        drain(&mut a_rx);

        drop(b);
        assert_eq!(mesh.member_count(), 1);
        assert_eq!(drain(&mut a_rx), vec![PeerEvent::PeersChanged(vec![])]);
    }

    #[test]
    fn test_latency_preserves_link_order() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let mesh = LoopbackMesh::with_latency(Duration::from_millis(1), Duration::from_millis(15));
            let (a, _a_rx) = mesh.join("a");
            let (_b, mut b_rx) = mesh.join("b");

            for i in 0..20u8 {
                a.broadcast(&[i]).unwrap();
            }

            let mut received = Vec::new();
            while received.len() < 20 {
                match b_rx.recv().await {
                    Some(PeerEvent::Received { bytes, .. }) => received.push(bytes[0]),
                    Some(PeerEvent::PeersChanged(_)) => {}
                    None => break,
                }
            }
            assert_eq!(received, (0..20u8).collect::<Vec<_>>());
        });
    }
}
