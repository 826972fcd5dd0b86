//! Small types shared across the crate.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// The role a process plays in a session pair.
///
/// The leader is the passive responder: it never blocks waiting for a
/// follower. The follower actively initiates every handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[display(fmt = "leader")]
    Leader,
    #[display(fmt = "follower")]
    Follower,
}

impl Role {
    /// The role of the other party of the pair.
    pub fn peer(self) -> Role {
        match self {
            Role::Leader => Role::Follower,
            Role::Follower => Role::Leader,
        }
    }

    pub fn is_leader(self) -> bool {
        matches!(self, Role::Leader)
    }

    pub fn is_follower(self) -> bool {
        matches!(self, Role::Follower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_role_is_involutive() {
        assert_eq!(Role::Leader.peer(), Role::Follower);
        assert_eq!(Role::Follower.peer(), Role::Leader);
        assert_eq!(Role::Leader.peer().peer(), Role::Leader);
    }
}
