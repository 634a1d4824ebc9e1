//! Heartbeater - Multicast Heartbeat Leader Election
//!
//! A small cluster of peer processes discovers each other over IP multicast
//! and agrees, without a central coordinator, on exactly one MASTER while
//! every other node stays SLAVE.
//!
//! # Architecture
//!
//! Each node runs two dedicated threads sharing one [`PeerStatus`]:
//!
//! - the heartbeat emitter advertises the node's role on the multicast
//!   group while it is MASTER or ELECTING;
//! - the election watcher listens on the same group and moves the node
//!   between SLAVE, ELECTING and MASTER based on what it hears, or on
//!   hearing nothing at all.
//!
//! Two nodes that both end up MASTER resolve the conflict by stepping down
//! and backing off for a random delay before listening again.

pub mod config;
pub mod error;
pub mod state;
pub mod network;
pub mod election;
pub mod worker;

pub use config::HeartbeaterConfig;
pub use error::{Error, Result};
pub use state::{PeerStatus, Role};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::HeartbeaterConfig;
    pub use crate::error::{Error, Result};
    pub use crate::state::{PeerStatus, Role};
    pub use crate::network::{HeartbeatEmitter, HeartbeatEvent, EventCodec, JsonCodec};
    pub use crate::election::{ElectionWatcher, ElectionCallbacks, CommandHooks, WatcherSettings};
    pub use crate::worker::{StopSignal, WorkerHandle};
}
