// BroadcastChannelManager: fan-out of controller output to any number of UI subscribers

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

use crate::controller::MetronomeState;
use crate::scheduler::BeatEvent;

/// Manages the tokio broadcast channels the controller publishes on
///
/// The scheduler delivers beats to exactly one consumer (the controller's
/// serial loop). This manager re-publishes them, plus a state snapshot after
/// every change, to as many display subscribers as want them.
///
/// # Channel Types
/// - Beats: every tick and reset, in scheduler emission order
/// - State: full `MetronomeState` after each applied intent or command
pub struct BroadcastChannelManager {
    beats: Mutex<Option<broadcast::Sender<BeatEvent>>>,
    state: Mutex<Option<broadcast::Sender<MetronomeState>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BroadcastChannelManager {
    /// Create a new BroadcastChannelManager with all channels uninitialized
    pub fn new() -> Self {
        Self {
            beats: Mutex::new(None),
            state: Mutex::new(None),
        }
    }

    // ========================================================================
    // BEAT CHANNEL
    // ========================================================================

    /// Initialize the beat channel
    ///
    /// Buffer size: 256 events, a little over two minutes at 120 BPM before a
    /// stalled subscriber starts lagging.
    pub fn init_beats(&self) -> broadcast::Sender<BeatEvent> {
        let (tx, _) = broadcast::channel(256);
        *lock(&self.beats) = Some(tx.clone());
        tx
    }

    /// Subscribe to beats, or `None` if `init_beats` was never called
    pub fn subscribe_beats(&self) -> Option<broadcast::Receiver<BeatEvent>> {
        lock(&self.beats).as_ref().map(|tx| tx.subscribe())
    }

    pub fn get_beat_sender(&self) -> Option<broadcast::Sender<BeatEvent>> {
        lock(&self.beats).clone()
    }

    // ========================================================================
    // STATE CHANNEL
    // ========================================================================

    /// Initialize the state snapshot channel
    pub fn init_state(&self) -> broadcast::Sender<MetronomeState> {
        let (tx, _) = broadcast::channel(32);
        *lock(&self.state) = Some(tx.clone());
        tx
    }

    pub fn subscribe_state(&self) -> Option<broadcast::Receiver<MetronomeState>> {
        lock(&self.state).as_ref().map(|tx| tx.subscribe())
    }

    pub fn get_state_sender(&self) -> Option<broadcast::Sender<MetronomeState>> {
        lock(&self.state).clone()
    }
}

impl Default for BroadcastChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::RunId;

    #[test]
    fn test_beat_channel_lifecycle() {
        let manager = BroadcastChannelManager::new();

        assert!(manager.subscribe_beats().is_none());
        assert!(manager.get_beat_sender().is_none());

        let _tx = manager.init_beats();
        assert!(manager.subscribe_beats().is_some());
        assert!(manager.get_beat_sender().is_some());
    }

    #[test]
    fn test_beat_multiple_subscribers() {
        let manager = BroadcastChannelManager::new();
        let tx = manager.init_beats();

        let mut rx1 = manager.subscribe_beats().unwrap();
        let mut rx2 = manager.subscribe_beats().unwrap();

        let event = BeatEvent {
            run_id: RunId(2),
            beat_index: 5,
            beat: 1,
            accented: false,
            host_time: None,
            reset: false,
        };
        tx.send(event).unwrap();

        assert_eq!(rx1.try_recv().unwrap(), event);
        assert_eq!(rx2.try_recv().unwrap(), event);
    }

    #[test]
    fn test_state_channel_lifecycle() {
        let manager = BroadcastChannelManager::new();
        assert!(manager.subscribe_state().is_none());

        let _tx = manager.init_state();
        assert!(manager.subscribe_state().is_some());
    }

    #[test]
    fn test_default_implementation() {
        let manager = BroadcastChannelManager::default();
        assert!(manager.subscribe_beats().is_none());
        assert!(manager.subscribe_state().is_none());
    }
}
