use serde::{Deserialize, Serialize};

use super::SyncCommand;

/// Manually chosen network role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Master,
    Client,
    #[default]
    None,
}

/// Verdict on an inbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Follow,
    /// This device is not a client
    NotClient,
    /// The command did not come from a master
    ForeignSender,
}

/// Tracks this device's role and connected peers.
#[derive(Debug, Clone, Default)]
pub struct RoleCoordinator {
    role: Role,
    peers: Vec<String>,
}

impl RoleCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Switches role. Leaving the network (`Role::None`) forgets all peers.
    pub fn set_role(&mut self, role: Role) {
        self.role = role;
        if role == Role::None {
            self.peers.clear();
        }
    }

    /// Replaces the peer list. Returns true when it actually changed.
    pub fn peers_changed(&mut self, mut peers: Vec<String>) -> bool {
        peers.sort();
        peers.dedup();
        if peers == self.peers {
            return false;
        }
        self.peers = peers;
        true
    }

    /// Only a master with at least one connected peer sends commands.
    pub fn can_originate(&self) -> bool {
        self.role == Role::Master && !self.peers.is_empty()
    }

    pub fn accepts(&self, command: &SyncCommand) -> Inbound {
        if self.role != Role::Client {
            Inbound::NotClient
        } else if command.sender() != Role::Master {
            Inbound::ForeignSender
        } else {
            Inbound::Follow
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_role_is_none_and_silent() {
        let roles = RoleCoordinator::new();
        assert_eq!(roles.role(), Role::None);
        assert!(!roles.can_originate());
    }

    #[test]
    fn test_master_needs_peers_to_originate() {
        let mut roles = RoleCoordinator::new();
        roles.set_role(Role::Master);
        assert!(!roles.can_originate());

        assert!(roles.peers_changed(vec!["drummer".into()]));
        assert!(roles.can_originate());

        roles.peers_changed(Vec::new());
        assert!(!roles.can_originate());
    }

    #[test]
    fn test_client_never_originates() {
        let mut roles = RoleCoordinator::new();
        roles.set_role(Role::Client);
        roles.peers_changed(vec!["conductor".into()]);
        assert!(!roles.can_originate());
    }

    #[test]
    fn test_client_follows_only_master() {
        let mut roles = RoleCoordinator::new();
        roles.set_role(Role::Client);
        assert_eq!(roles.accepts(&SyncCommand::stop(Role::Master)), Inbound::Follow);
        assert_eq!(roles.accepts(&SyncCommand::stop(Role::Client)), Inbound::ForeignSender);
        assert_eq!(roles.accepts(&SyncCommand::stop(Role::None)), Inbound::ForeignSender);
    }

    #[test]
    fn test_master_ignores_inbound_commands() {
        let mut roles = RoleCoordinator::new();
        roles.set_role(Role::Master);
        assert_eq!(roles.accepts(&SyncCommand::stop(Role::Master)), Inbound::NotClient);
    }

    #[test]
    fn test_disconnect_clears_peers() {
        let mut roles = RoleCoordinator::new();
        roles.set_role(Role::Master);
        roles.peers_changed(vec!["a".into(), "b".into()]);
        roles.set_role(Role::None);
        assert!(roles.peers().is_empty());
    }

    #[test]
    fn test_peer_list_change_detection() {
        let mut roles = RoleCoordinator::new();
        assert!(roles.peers_changed(vec!["b".into(), "a".into()]));
        assert!(!roles.peers_changed(vec!["a".into(), "b".into(), "a".into()]));
        assert_eq!(roles.peers(), &["a".to_string(), "b".to_string()]);
    }
}
