//! Local Peer Status
//!
//! The node's belief about its own election role. Shared between the
//! election watcher, which drives transitions, and the heartbeat emitter,
//! which reads the role to decide what to advertise.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Election role of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum Role {
    /// Node is acting as the cluster master
    Master = 0,
    /// Node defers to an observed master
    Slave = 1,
    /// Node is trying to claim the master role
    Electing = 2,
}

impl Role {
    fn from_repr(value: u8) -> Self {
        match value {
            0 => Role::Master,
            1 => Role::Slave,
            _ => Role::Electing,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Master => write!(f, "MASTER"),
            Role::Slave => write!(f, "SLAVE"),
            Role::Electing => write!(f, "ELECTING"),
        }
    }
}

/// Atomically updated role cell
#[derive(Debug)]
pub struct PeerStatus {
    role: AtomicU8,
}

impl PeerStatus {
    /// Create a status cell holding the given role
    pub fn new(role: Role) -> Self {
        Self {
            role: AtomicU8::new(role as u8),
        }
    }

    /// Current role
    pub fn role(&self) -> Role {
        Role::from_repr(self.role.load(Ordering::Acquire))
    }

    /// Store a role, returning the one it replaced
    fn transition(&self, role: Role) -> Role {
        Role::from_repr(self.role.swap(role as u8, Ordering::AcqRel))
    }

    pub fn become_master(&self) -> Role {
        self.transition(Role::Master)
    }

    pub fn become_slave(&self) -> Role {
        self.transition(Role::Slave)
    }

    pub fn start_electing(&self) -> Role {
        self.transition(Role::Electing)
    }

    pub fn is_master(&self) -> bool {
        self.role() == Role::Master
    }

    pub fn is_slave(&self) -> bool {
        self.role() == Role::Slave
    }

    pub fn is_electing(&self) -> bool {
        self.role() == Role::Electing
    }
}

impl Default for PeerStatus {
    fn default() -> Self {
        Self::new(Role::Slave)
    }
}
