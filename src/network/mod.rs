//! Network Module
//!
//! Multicast sockets, the heartbeat wire codec and the heartbeat emitter.

pub mod event;
mod emitter;
mod multicast;

pub use emitter::HeartbeatEmitter;
pub use event::{EventCodec, HeartbeatEvent, JsonCodec, MAX_DATAGRAM_SIZE};
pub use multicast::{is_timeout, HeartbeatSink, HeartbeatSource, MulticastReceiver, MulticastSender};
