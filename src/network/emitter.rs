//! Heartbeat Emitter
//!
//! Periodically advertises this node on the multicast group. Only a node
//! that is MASTER, or racing to become MASTER, speaks; slaves stay silent
//! so that total silence on the group means there is no master.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::HeartbeaterConfig;
use crate::error::Result;
use crate::network::event::{EventCodec, HeartbeatEvent, JsonCodec};
use crate::network::multicast::{HeartbeatSink, MulticastSender};
use crate::state::{PeerStatus, Role};
use crate::worker::{StopSignal, WorkerHandle};

/// Periodic heartbeat sender
pub struct HeartbeatEmitter {
    software_id: String,
    address: String,
    interval: Duration,
    status: Arc<PeerStatus>,
    codec: Arc<dyn EventCodec>,
    sink: Box<dyn HeartbeatSink>,
}

impl HeartbeatEmitter {
    /// Create an emitter writing to `sink`
    pub fn new(
        software_id: String,
        interface: Ipv4Addr,
        interval: Duration,
        status: Arc<PeerStatus>,
        sink: Box<dyn HeartbeatSink>,
    ) -> Self {
        Self {
            software_id,
            address: interface.to_string(),
            interval,
            status,
            codec: Arc::new(JsonCodec),
            sink,
        }
    }

    /// Create an emitter sending to the configured multicast group
    pub fn from_config(
        config: &HeartbeaterConfig,
        software_id: String,
        status: Arc<PeerStatus>,
    ) -> Result<Self> {
        let sender = MulticastSender::connect(
            config.multicast.group,
            config.multicast.port,
            config.multicast.interface,
            config.multicast.ttl,
        )?;

        Ok(Self::new(
            software_id,
            config.multicast.interface,
            config.heartbeat_interval(),
            status,
            Box::new(sender),
        ))
    }

    /// Replace the wire codec
    pub fn with_codec(mut self, codec: Arc<dyn EventCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Send one heartbeat if our role calls for it.
    /// Returns the heartbeat that was handed to the socket, if any.
    pub fn tick(&mut self) -> Option<HeartbeatEvent> {
        let role = self.status.role();
        if role == Role::Slave {
            return None;
        }

        let event = HeartbeatEvent::new(self.software_id.clone(), self.address.clone(), role);
        let datagram = match self.codec.encode(&event) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Failed to encode heartbeat: {}", e);
                return None;
            }
        };

        match self.sink.send(&datagram) {
            Ok(()) => {
                tracing::trace!("Heartbeat sent as {}", role);
                Some(event)
            }
            Err(e) => {
                tracing::debug!("Heartbeat send failed: {}", e);
                None
            }
        }
    }

    /// Emit until `signal` is stopped
    pub fn run(&mut self, signal: &StopSignal) -> Result<()> {
        tracing::info!(
            "Heartbeat emitter started for {} (every {:?})",
            self.software_id,
            self.interval
        );

        while signal.is_running() {
            self.tick();
            thread::sleep(self.interval);
        }

        tracing::info!("Heartbeat emitter stopped");
        Ok(())
    }

    /// Run the emitter on its own thread
    pub fn start(mut self) -> Result<WorkerHandle> {
        let signal = StopSignal::new();
        let flag = signal.clone();
        WorkerHandle::spawn("heartbeat-emitter", signal, move || self.run(&flag))
    }
}
