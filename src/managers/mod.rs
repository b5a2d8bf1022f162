// Managers Module
//
// Focused helpers the controller delegates to:
// - BroadcastChannelManager: tokio broadcast channels feeding display subscribers

pub mod broadcast_manager;

pub use broadcast_manager::BroadcastChannelManager;
