//! State Module
//!
//! Holds the local node's election role, the only mutable state shared
//! between the watcher and the rest of the process.

mod status;

pub use status::{PeerStatus, Role};
