// ClickSync Core - networked metronome engine
// Lookahead transport scheduler, wall-clock synchronized starts and a
// master/client command protocol over a pluggable peer transport.

// Module declarations
pub mod audio;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod managers;
pub mod net;
pub mod pattern;
pub mod protocol;
pub mod scheduler;
pub mod sync;
pub mod telemetry;
pub mod tempo;

// Re-exports for convenience
pub use audio::{AudioSink, RecordingSink, SoundLibrary, SoundRole};
pub use clock::{HardwareClock, HostTime, ManualClock, SystemHostClock, SystemWallClock, WallClock};
pub use config::AppConfig;
pub use controller::{Intent, Metronome, MetronomeHandle, MetronomeState};
pub use net::{LoopbackMesh, PeerEvent, PeerTransport};
pub use pattern::BeatPattern;
pub use protocol::{Action, Role, SyncCommand};
pub use scheduler::{BeatEvent, RunId, TransportScheduler};
pub use sync::{StartPlan, SyncCoordinator, SyncEvent};

use once_cell::sync::OnceCell;
use tracing_subscriber::filter::LevelFilter;

static LOGGING: OnceCell<()> = OnceCell::new();

/// Install the global tracing subscriber. Later calls are no-ops.
///
/// `log` records from config and IO code are bridged into the same output.
pub fn init_logging(level: LevelFilter) {
    LOGGING.get_or_init(|| {
        let installed = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .try_init()
            .is_ok();
        if installed {
            log::debug!("logging initialized at {}", level);
        }
    });
}
