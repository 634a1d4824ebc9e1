//! Election Watcher
//!
//! Watches the heartbeat group and drives this node's role:
//!
//! - SLAVE hears silence: starts an election (ELECTING).
//! - ELECTING hears its own heartbeat, or silence: becomes MASTER.
//! - ELECTING hears anyone else: concedes (SLAVE).
//! - MASTER hears another MASTER: steps down (SLAVE) without firing a hook
//!   and backs off for a random delay so the two former masters do not
//!   re-contend in lockstep.
//!
//! Each loop iteration performs exactly one blocking receive whose timeout
//! is half the failure detection window. The same timeout bounds how long
//! a stop request takes to be observed.

use std::net::Ipv4Addr;
use std::ops::Range;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::HeartbeaterConfig;
use crate::election::hooks::ElectionCallbacks;
use crate::error::{Error, Result};
use crate::network::{
    is_timeout, EventCodec, HeartbeatEvent, HeartbeatSource, JsonCodec, MulticastReceiver,
    MAX_DATAGRAM_SIZE,
};
use crate::state::{PeerStatus, Role};
use crate::worker::{StopSignal, WorkerHandle};

/// Static watcher configuration
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// Identity of this software instance
    pub software_id: String,
    /// Multicast group to watch
    pub group: Ipv4Addr,
    /// Heartbeat port
    pub port: u16,
    /// Local interface the group is joined on
    pub interface: Ipv4Addr,
    /// Silence window treated as a failure signal
    pub failure_detection_timeout: Duration,
    /// Master conflict backoff, upper bound exclusive
    pub backoff: Range<Duration>,
}

impl WatcherSettings {
    pub fn from_config(config: &HeartbeaterConfig, software_id: String) -> Self {
        Self {
            software_id,
            group: config.multicast.group,
            port: config.multicast.port,
            interface: config.multicast.interface,
            failure_detection_timeout: config.failure_detection_timeout(),
            backoff: config.backoff_range(),
        }
    }
}

/// Result of one receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// A well-formed heartbeat, ours or a peer's
    Heartbeat(HeartbeatEvent),
    /// Nothing arrived within the poll window
    Timeout,
    /// A datagram that did not decode
    Noise,
}

/// What the watcher did with one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// No role change
    Steady,
    /// Heard our own claim while electing and became MASTER
    SelfCrowned,
    /// Stepped down from MASTER; wait `backoff` before receiving again
    MasterConflict { backoff: Duration },
    /// Someone else spoke while we were electing
    Conceded,
    /// Heard nothing while electing and became MASTER
    ClaimedBySilence,
    /// Heard nothing as SLAVE and started an election
    ElectionStarted,
    /// Malformed datagram dropped
    Discarded,
}

/// The election loop
pub struct ElectionWatcher {
    software_id: String,
    address: String,
    group: Ipv4Addr,
    port: u16,
    interface: Ipv4Addr,
    failure_detection_timeout: Duration,
    backoff: Range<Duration>,
    status: Arc<PeerStatus>,
    callbacks: Box<dyn ElectionCallbacks>,
    codec: Arc<dyn EventCodec>,
    rng: StdRng,
    signal: StopSignal,
}

impl ElectionWatcher {
    /// Create a watcher with an entropy-seeded backoff RNG and the JSON codec.
    ///
    /// The backoff range must be non-empty so every draw lands strictly
    /// below its upper bound.
    pub fn new(
        settings: WatcherSettings,
        status: Arc<PeerStatus>,
        callbacks: Box<dyn ElectionCallbacks>,
    ) -> Result<Self> {
        if settings.backoff.is_empty() {
            return Err(Error::Config(format!(
                "conflict backoff range {:?}..{:?} is empty",
                settings.backoff.start, settings.backoff.end
            )));
        }

        Ok(Self {
            address: settings.interface.to_string(),
            software_id: settings.software_id,
            group: settings.group,
            port: settings.port,
            interface: settings.interface,
            failure_detection_timeout: settings.failure_detection_timeout,
            backoff: settings.backoff,
            status,
            callbacks,
            codec: Arc::new(JsonCodec),
            rng: StdRng::from_entropy(),
            signal: StopSignal::new(),
        })
    }

    /// Use a deterministic backoff RNG
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Replace the wire codec
    pub fn with_codec(mut self, codec: Arc<dyn EventCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Receive timeout: half the failure detection window
    pub fn poll_timeout(&self) -> Duration {
        self.failure_detection_timeout / 2
    }

    /// Flag that stops the loop at its next iteration boundary
    pub fn stop_signal(&self) -> StopSignal {
        self.signal.clone()
    }

    pub fn status(&self) -> &Arc<PeerStatus> {
        &self.status
    }

    /// Join the group and run the loop on a dedicated thread.
    ///
    /// Socket setup happens before the thread is spawned, so a bind or join
    /// failure is returned here and no half-started watcher is left behind.
    pub fn start(mut self) -> Result<WorkerHandle> {
        let mut receiver =
            MulticastReceiver::join(self.group, self.port, self.interface, self.poll_timeout())?;

        let signal = self.signal.clone();
        WorkerHandle::spawn("election-watcher", signal, move || self.run(&mut receiver))
    }

    /// Run the loop on the current thread until stopped or the source fails
    pub fn run(&mut self, source: &mut dyn HeartbeatSource) -> Result<()> {
        tracing::info!(
            "Election watcher started for {} on {}:{} as {} (poll {:?})",
            self.software_id,
            self.group,
            self.port,
            self.status.role(),
            self.poll_timeout()
        );

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];

        while self.signal.is_running() {
            let observation = match self.observe(source, &mut buf) {
                Ok(observation) => observation,
                Err(e) => {
                    tracing::error!("Election watcher stopping: {}", e);
                    return Err(e);
                }
            };

            if let Step::MasterConflict { backoff } = self.handle(observation) {
                tracing::debug!("Backing off for {:?}", backoff);
                thread::sleep(backoff);
            }
        }

        tracing::info!("Election watcher stopped");
        Ok(())
    }

    /// Perform one receive and classify it
    pub fn observe(&self, source: &mut dyn HeartbeatSource, buf: &mut [u8]) -> Result<Observation> {
        match source.recv(buf) {
            Ok(len) => match self.codec.decode(&buf[..len]) {
                Ok(event) => Ok(Observation::Heartbeat(event)),
                Err(e) => {
                    tracing::debug!("Discarding undecodable heartbeat: {}", e);
                    Ok(Observation::Noise)
                }
            },
            Err(e) if is_timeout(&e) => Ok(Observation::Timeout),
            Err(e) => Err(Error::Network(format!("heartbeat receive failed: {}", e))),
        }
    }

    /// Apply the election rules to one observation
    pub fn handle(&mut self, observation: Observation) -> Step {
        match observation {
            Observation::Noise => Step::Discarded,
            Observation::Heartbeat(event) => {
                if event.is_local_to(&self.software_id, &self.address) {
                    self.handle_own_heartbeat()
                } else {
                    self.handle_peer_heartbeat(&event)
                }
            }
            Observation::Timeout => self.handle_silence(),
        }
    }

    fn handle_own_heartbeat(&mut self) -> Step {
        tracing::debug!("Heard our own heartbeat");

        if !self.status.is_electing() {
            return Step::Steady;
        }

        tracing::info!("Our claim went unchallenged, becoming MASTER");
        self.status.become_master();
        self.callbacks.on_become_master();
        Step::SelfCrowned
    }

    fn handle_peer_heartbeat(&mut self, event: &HeartbeatEvent) -> Step {
        if self.status.is_master() && event.claims_master() {
            tracing::warn!(
                "Master conflict with {} at {}, stepping down",
                event.software_id,
                event.address
            );
            self.status.become_slave();
            return Step::MasterConflict {
                backoff: self.backoff_delay(),
            };
        }

        if self.status.is_electing() {
            tracing::info!(
                "{} at {} spoke first ({}), conceding the election",
                event.software_id,
                event.address,
                event.role
            );
            self.status.become_slave();
            return Step::Conceded;
        }

        tracing::trace!(
            "Heartbeat from {} at {} claiming {} (sent {})",
            event.software_id,
            event.address,
            event.role,
            event.sent_at
        );
        Step::Steady
    }

    fn handle_silence(&mut self) -> Step {
        match self.status.role() {
            Role::Master => {
                tracing::debug!("Silence on the group, staying MASTER");
                Step::Steady
            }
            Role::Electing => {
                tracing::info!("No contender heard while electing, becoming MASTER");
                self.status.become_master();
                self.callbacks.on_become_master();
                Step::ClaimedBySilence
            }
            Role::Slave => {
                tracing::info!("No master heard within {:?}, starting election", self.poll_timeout());
                self.status.start_electing();
                self.callbacks.on_start_electing();
                Step::ElectionStarted
            }
        }
    }

    /// Draw a conflict backoff from the configured range
    fn backoff_delay(&mut self) -> Duration {
        self.rng.gen_range(self.backoff.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Hook {
        Master,
        Slave,
        Electing,
    }

    #[derive(Clone, Default)]
    struct RecordingCallbacks {
        fired: Arc<Mutex<Vec<Hook>>>,
    }

    impl RecordingCallbacks {
        fn fired(&self) -> Vec<Hook> {
            self.fired.lock().unwrap().clone()
        }
    }

    impl ElectionCallbacks for RecordingCallbacks {
        fn on_become_master(&mut self) {
            self.fired.lock().unwrap().push(Hook::Master);
        }

        fn on_become_slave(&mut self) {
            self.fired.lock().unwrap().push(Hook::Slave);
        }

        fn on_start_electing(&mut self) {
            self.fired.lock().unwrap().push(Hook::Electing);
        }
    }

    /// Replays a fixed sequence of receive results
    struct ScriptedSource {
        script: VecDeque<io::Result<Vec<u8>>>,
        stop_when_drained: Option<StopSignal>,
        received_at: Vec<Instant>,
    }

    impl ScriptedSource {
        fn new(script: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                script: script.into(),
                stop_when_drained: None,
                received_at: Vec::new(),
            }
        }

        fn stopping(mut self, signal: StopSignal) -> Self {
            self.stop_when_drained = Some(signal);
            self
        }
    }

    impl HeartbeatSource for ScriptedSource {
        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.received_at.push(Instant::now());
            let next = self
                .script
                .pop_front()
                .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::ConnectionAborted, "socket closed")));

            if self.script.is_empty() {
                if let Some(signal) = &self.stop_when_drained {
                    signal.stop();
                }
            }

            let bytes = next?;
            buf[..bytes.len()].copy_from_slice(&bytes);
            Ok(bytes.len())
        }
    }

    /// Codec whose decoder fails with a non-codec error
    struct TruncatingCodec;

    impl EventCodec for TruncatingCodec {
        fn encode(&self, event: &HeartbeatEvent) -> Result<Vec<u8>> {
            JsonCodec.encode(event)
        }

        fn decode(&self, _datagram: &[u8]) -> Result<HeartbeatEvent> {
            Err(Error::Io(io::Error::new(io::ErrorKind::InvalidData, "truncated frame")))
        }
    }

    fn settings() -> WatcherSettings {
        WatcherSettings {
            software_id: "A".to_string(),
            group: Ipv4Addr::new(239, 192, 74, 66),
            port: 7699,
            interface: Ipv4Addr::new(10, 0, 0, 1),
            failure_detection_timeout: Duration::from_secs(2),
            backoff: Duration::ZERO..Duration::from_secs(1),
        }
    }

    fn watcher(role: Role) -> (ElectionWatcher, RecordingCallbacks) {
        let callbacks = RecordingCallbacks::default();
        let watcher = ElectionWatcher::new(
            settings(),
            Arc::new(PeerStatus::new(role)),
            Box::new(callbacks.clone()),
        )
        .unwrap()
        .with_seed(42);
        (watcher, callbacks)
    }

    fn heartbeat(software_id: &str, address: &str, role: Role) -> Observation {
        Observation::Heartbeat(HeartbeatEvent::new(software_id, address, role))
    }

    fn own(role: Role) -> Observation {
        heartbeat("A", "10.0.0.1", role)
    }

    fn peer(role: Role) -> Observation {
        heartbeat("B", "10.0.0.2", role)
    }

    fn datagram(software_id: &str, address: &str, role: Role) -> io::Result<Vec<u8>> {
        Ok(JsonCodec
            .encode(&HeartbeatEvent::new(software_id, address, role))
            .unwrap())
    }

    fn timed_out() -> io::Result<Vec<u8>> {
        Err(io::Error::from(io::ErrorKind::WouldBlock))
    }

    #[test]
    fn test_poll_timeout_is_half_the_window() {
        let (watcher, _) = watcher(Role::Slave);
        assert_eq!(watcher.poll_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_electing_node_crowns_itself_on_own_heartbeat() {
        let (mut watcher, callbacks) = watcher(Role::Electing);

        assert_eq!(watcher.handle(own(Role::Electing)), Step::SelfCrowned);
        assert!(watcher.status().is_master());
        assert_eq!(callbacks.fired(), vec![Hook::Master]);

        // Already master: hearing ourselves again changes nothing
        assert_eq!(watcher.handle(own(Role::Master)), Step::Steady);
        assert_eq!(callbacks.fired(), vec![Hook::Master]);
    }

    #[test]
    fn test_own_heartbeat_from_other_interface_is_a_peer() {
        let (mut watcher, callbacks) = watcher(Role::Electing);

        let step = watcher.handle(heartbeat("A", "10.0.0.9", Role::Electing));
        assert_eq!(step, Step::Conceded);
        assert!(watcher.status().is_slave());
        assert!(callbacks.fired().is_empty());
    }

    #[test]
    fn test_master_conflict_steps_down_with_backoff() {
        let (mut watcher, callbacks) = watcher(Role::Master);

        match watcher.handle(peer(Role::Master)) {
            Step::MasterConflict { backoff } => assert!(backoff < Duration::from_secs(1)),
            other => panic!("expected master conflict, got {:?}", other),
        }
        assert!(watcher.status().is_slave());
        // Stepping down is silent, like conceding
        assert!(callbacks.fired().is_empty());
    }

    #[test]
    fn test_empty_backoff_range_is_rejected() {
        let mut settings = settings();
        settings.backoff = Duration::from_millis(500)..Duration::from_millis(500);

        let result = ElectionWatcher::new(
            settings,
            Arc::new(PeerStatus::new(Role::Master)),
            Box::new(RecordingCallbacks::default()),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_conflict_backoff_stays_in_range() {
        let mut settings = settings();
        settings.backoff = Duration::from_millis(200)..Duration::from_millis(300);

        for seed in 0..200 {
            let mut watcher = ElectionWatcher::new(
                settings.clone(),
                Arc::new(PeerStatus::new(Role::Master)),
                Box::new(RecordingCallbacks::default()),
            )
            .unwrap()
            .with_seed(seed);

            match watcher.handle(peer(Role::Master)) {
                Step::MasterConflict { backoff } => {
                    assert!(backoff >= Duration::from_millis(200));
                    assert!(backoff < Duration::from_millis(300));
                }
                other => panic!("expected master conflict, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_seeded_backoff_is_reproducible() {
        let draw = |seed| {
            let mut watcher = ElectionWatcher::new(
                settings(),
                Arc::new(PeerStatus::new(Role::Master)),
                Box::new(RecordingCallbacks::default()),
            )
            .unwrap()
            .with_seed(seed);
            watcher.handle(peer(Role::Master))
        };

        assert_eq!(draw(7), draw(7));
    }

    #[test]
    fn test_electing_node_concedes_to_any_peer() {
        for claimed in [Role::Master, Role::Slave, Role::Electing] {
            let (mut watcher, callbacks) = watcher(Role::Electing);

            assert_eq!(watcher.handle(peer(claimed)), Step::Conceded);
            assert!(watcher.status().is_slave());
            assert!(callbacks.fired().is_empty());
        }
    }

    #[test]
    fn test_master_survives_silence() {
        let (mut watcher, callbacks) = watcher(Role::Master);

        for _ in 0..10 {
            assert_eq!(watcher.handle(Observation::Timeout), Step::Steady);
        }
        assert!(watcher.status().is_master());
        assert!(callbacks.fired().is_empty());
    }

    #[test]
    fn test_slave_starts_election_on_silence() {
        let (mut watcher, callbacks) = watcher(Role::Slave);

        assert_eq!(watcher.handle(Observation::Timeout), Step::ElectionStarted);
        assert!(watcher.status().is_electing());
        assert_eq!(callbacks.fired(), vec![Hook::Electing]);
    }

    /// Silence while electing commits MASTER and fires the master hook.
    /// Earlier releases fired the slave hook on this path while still
    /// committing MASTER; the pairing is now consistent and the slave hook
    /// must stay quiet here.
    #[test]
    fn test_electing_silence_fires_master_hook_not_slave_hook() {
        let (mut watcher, callbacks) = watcher(Role::Electing);

        assert_eq!(watcher.handle(Observation::Timeout), Step::ClaimedBySilence);
        assert!(watcher.status().is_master());
        assert_eq!(callbacks.fired(), vec![Hook::Master]);
        assert!(!callbacks.fired().contains(&Hook::Slave));
    }

    #[test]
    fn test_slave_ignores_well_behaved_peers() {
        let (mut watcher, callbacks) = watcher(Role::Slave);

        for claimed in [Role::Slave, Role::Electing, Role::Master] {
            assert_eq!(watcher.handle(peer(claimed)), Step::Steady);
            assert!(watcher.status().is_slave());
        }
        assert!(callbacks.fired().is_empty());
    }

    #[test]
    fn test_master_ignores_non_master_peers() {
        let (mut watcher, callbacks) = watcher(Role::Master);

        assert_eq!(watcher.handle(peer(Role::Slave)), Step::Steady);
        assert_eq!(watcher.handle(peer(Role::Electing)), Step::Steady);
        assert!(watcher.status().is_master());
        assert!(callbacks.fired().is_empty());
    }

    #[test]
    fn test_noise_never_changes_role() {
        for role in [Role::Master, Role::Slave, Role::Electing] {
            let (mut watcher, callbacks) = watcher(role);
            let mut source = ScriptedSource::new(vec![Ok(b"not a heartbeat".to_vec())]);
            let mut buf = [0u8; MAX_DATAGRAM_SIZE];

            let observation = watcher.observe(&mut source, &mut buf).unwrap();
            assert_eq!(observation, Observation::Noise);
            assert_eq!(watcher.handle(observation), Step::Discarded);
            assert_eq!(watcher.status().role(), role);
            assert!(callbacks.fired().is_empty());
        }
    }

    #[test]
    fn test_observe_classifies_receive_results() {
        let (watcher, _) = watcher(Role::Slave);
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let mut source = ScriptedSource::new(vec![
            datagram("B", "10.0.0.2", Role::Master),
            timed_out(),
            Err(io::Error::from(io::ErrorKind::TimedOut)),
            Err(io::Error::from(io::ErrorKind::PermissionDenied)),
        ]);

        match watcher.observe(&mut source, &mut buf).unwrap() {
            Observation::Heartbeat(event) => {
                assert_eq!(event.software_id, "B");
                assert!(event.claims_master());
            }
            other => panic!("expected heartbeat, got {:?}", other),
        }
        assert_eq!(watcher.observe(&mut source, &mut buf).unwrap(), Observation::Timeout);
        assert_eq!(watcher.observe(&mut source, &mut buf).unwrap(), Observation::Timeout);
        assert!(matches!(
            watcher.observe(&mut source, &mut buf),
            Err(Error::Network(_))
        ));
    }

    #[test]
    fn test_run_through_election_and_conflict() {
        let callbacks = RecordingCallbacks::default();
        let mut settings = settings();
        settings.backoff = Duration::ZERO..Duration::from_millis(20);

        let mut watcher = ElectionWatcher::new(
            settings,
            Arc::new(PeerStatus::new(Role::Slave)),
            Box::new(callbacks.clone()),
        )
        .unwrap()
        .with_seed(1);

        let mut source = ScriptedSource::new(vec![
            timed_out(),
            datagram("A", "10.0.0.1", Role::Electing),
            datagram("B", "10.0.0.2", Role::Master),
        ])
        .stopping(watcher.stop_signal());

        assert!(watcher.run(&mut source).is_ok());
        assert_eq!(callbacks.fired(), vec![Hook::Electing, Hook::Master]);
        assert!(watcher.status().is_slave());
    }

    #[test]
    fn test_run_sleeps_the_backoff_after_a_conflict() {
        let mut settings = settings();
        settings.backoff = Duration::from_millis(50)..Duration::from_millis(60);

        let callbacks = RecordingCallbacks::default();
        let mut watcher = ElectionWatcher::new(
            settings,
            Arc::new(PeerStatus::new(Role::Master)),
            Box::new(callbacks.clone()),
        )
        .unwrap()
        .with_seed(3);

        let mut source = ScriptedSource::new(vec![datagram("B", "10.0.0.2", Role::Master), timed_out()])
            .stopping(watcher.stop_signal());

        assert!(watcher.run(&mut source).is_ok());
        assert_eq!(source.received_at.len(), 2);
        let gap = source.received_at[1] - source.received_at[0];
        assert!(gap >= Duration::from_millis(50), "next receive came after {:?}", gap);

        // Stepped down on the conflict, then the silence started an election
        assert!(watcher.status().is_electing());
        assert_eq!(callbacks.fired(), vec![Hook::Electing]);
    }

    #[test]
    fn test_undecodable_datagram_does_not_end_the_loop() {
        for role in [Role::Master, Role::Slave, Role::Electing] {
            let (watcher, callbacks) = watcher(role);
            let mut watcher = watcher.with_codec(Arc::new(TruncatingCodec));
            let mut source = ScriptedSource::new(vec![datagram("B", "10.0.0.2", Role::Master)])
                .stopping(watcher.stop_signal());

            assert!(watcher.run(&mut source).is_ok());
            assert_eq!(watcher.status().role(), role);
            assert!(callbacks.fired().is_empty());
        }
    }

    #[test]
    fn test_run_propagates_socket_failure() {
        let (mut watcher, callbacks) = watcher(Role::Slave);
        let mut source = ScriptedSource::new(vec![Err(io::Error::from(io::ErrorKind::ConnectionReset))]);

        let err = watcher.run(&mut source).unwrap_err();
        assert!(err.is_fatal());
        assert!(watcher.status().is_slave());
        assert!(callbacks.fired().is_empty());
    }

    #[test]
    fn test_stopped_watcher_does_not_receive() {
        let (mut watcher, _) = watcher(Role::Slave);
        watcher.stop_signal().stop();

        // An empty script would fail on the first receive
        let mut source = ScriptedSource::new(Vec::new());
        assert!(watcher.run(&mut source).is_ok());
    }
}
