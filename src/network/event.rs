//! Heartbeat Events
//!
//! A heartbeat is one multicast datagram advertising who sent it and which
//! role the sender believed it held at send time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::state::Role;

/// Heartbeat wire format version
pub const WIRE_VERSION: u8 = 1;

/// Largest datagram the watcher will read
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// One observed heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    /// Wire format version
    pub version: u8,
    /// Identity of the emitting software instance
    pub software_id: String,
    /// Interface address the emitter sent from
    pub address: String,
    /// Role the emitter claimed
    pub role: Role,
    /// Emitter's clock at send time
    pub sent_at: DateTime<Utc>,
}

impl HeartbeatEvent {
    /// Build a heartbeat stamped with the current time
    pub fn new(software_id: impl Into<String>, address: impl Into<String>, role: Role) -> Self {
        Self {
            version: WIRE_VERSION,
            software_id: software_id.into(),
            address: address.into(),
            role,
            sent_at: Utc::now(),
        }
    }

    /// True if this heartbeat is our own broadcast looped back to us
    pub fn is_local_to(&self, software_id: &str, address: &str) -> bool {
        self.software_id == software_id && self.address == address
    }

    pub fn claims_master(&self) -> bool {
        self.role == Role::Master
    }
}

/// Turns heartbeats into datagrams and back
pub trait EventCodec: Send + Sync {
    fn encode(&self, event: &HeartbeatEvent) -> Result<Vec<u8>>;

    /// Decode one datagram. Any error means the datagram is noise.
    fn decode(&self, datagram: &[u8]) -> Result<HeartbeatEvent>;
}

/// JSON heartbeat codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl EventCodec for JsonCodec {
    fn encode(&self, event: &HeartbeatEvent) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(event)?)
    }

    fn decode(&self, datagram: &[u8]) -> Result<HeartbeatEvent> {
        let event: HeartbeatEvent = serde_json::from_slice(datagram)?;

        if event.version != WIRE_VERSION {
            return Err(Error::MalformedHeartbeat(format!(
                "unsupported wire version {}",
                event.version
            )));
        }

        if event.software_id.is_empty() {
            return Err(Error::MalformedHeartbeat("empty software_id".into()));
        }

        Ok(event)
    }
}
