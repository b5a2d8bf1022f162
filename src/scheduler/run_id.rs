use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Token identifying one continuous run.
///
/// Work scheduled asynchronously captures the id current at scheduling time
/// and becomes a no-op once a newer id has been minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub u64);

/// Generation counter handing out [`RunId`]s.
#[derive(Debug, Default)]
pub struct RunIdCell {
    generation: AtomicU64,
}

impl RunIdCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> RunId {
        RunId(self.generation.load(Ordering::SeqCst))
    }

    /// Invalidates every previously issued id and returns the new one.
    pub fn mint(&self) -> RunId {
        RunId(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, id: RunId) -> bool {
        self.current() == id
    }
}
