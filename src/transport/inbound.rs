//! Inbound reordering engine.
//!
//! Admits datagrams from one peer, restores sequence order for sequenced
//! kinds, asks the sender for gaps, and consumes the transport's own control
//! traffic (acks, retransmit requests, probes, handshake echoes) before the
//! application sees anything.
//!
//! ```text
//!  receive_at ─┬─ Connect ──────── key check, restart, connect outbound
//!              ├─ sequenced ────── in window?  buffer : rejected queue
//!              └─ unsequenced ──── FIFO
//!
//!  next_packet_at:  FIFO ─► buffer[expected] ─► gap skip | request missing
//!                      └──────── intercept control kinds ──► caller
//! ```

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;

use super::error::{TransportError, TransportResult};
use super::outbound::OutboundEngine;
use super::timing::{RttEstimator, WindowEstimator, monotonic_ms};
use crate::core::constants::{HANDSHAKE_SEQUENCE, LIVENESS_TIMEOUT, PROBE_INTERVAL};
use crate::packet::{
    Envelope, Handshake, PacketKind, Probe, Role, decode_ack, decode_retransmit_request,
};

/// Sequenced datagrams further ahead of the expected sequence are rejected.
pub const SEQUENCE_WINDOW: u16 = 1000;

/// Missing sequences asked for in one retransmit request.
pub const MAX_REQUESTED: u16 = 10;

/// Slack added to the RTT before a retransmit request may be repeated.
const REQUEST_SLACK: Duration = Duration::from_millis(20);

/// How the engine treats handshakes and end-to-end probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundMode {
    /// Initiated the handshake; the peer's echo completes it.
    Dial,
    /// Accepts one peer directly; echoes handshakes and answers every probe.
    Accept,
    /// Relay slot; echoes handshakes and passes end-to-end probes through
    /// to be forwarded.
    Relay,
}

/// Key policy and mode of an inbound engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Handshake and probe handling.
    pub mode: InboundMode,
    /// Key expected from drones and controllers.
    pub control_key: String,
    /// Key expected from viewers; `None` refuses viewers.
    pub viewer_key: Option<String>,
}

impl SessionConfig {
    /// Endpoint dialing a peer with `key`.
    pub fn dial(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            mode: InboundMode::Dial,
            viewer_key: Some(key.clone()),
            control_key: key,
        }
    }

    /// Endpoint accepting a peer that presents `key`.
    pub fn accept(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            mode: InboundMode::Accept,
            viewer_key: Some(key.clone()),
            control_key: key,
        }
    }

    /// Relay slot.
    pub fn relay(control_key: impl Into<String>, viewer_key: impl Into<String>) -> Self {
        Self {
            mode: InboundMode::Relay,
            control_key: control_key.into(),
            viewer_key: Some(viewer_key.into()),
        }
    }

    fn key_for(&self, role: Role) -> Option<&str> {
        match role {
            Role::Drone | Role::Controller => Some(&self.control_key),
            Role::Viewer => self.viewer_key.as_deref(),
        }
    }
}

/// What `receive_at` did with a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Valid handshake: engine restarted and connected.
    Handshake,
    /// Sequenced datagram stored for in-order delivery.
    Buffered,
    /// Unsequenced datagram queued for delivery.
    Queued,
    /// Sequenced datagram outside the window.
    Rejected,
    /// Too many rejections: the engine jumped to the datagram's sequence.
    Resynced,
    /// Handshake while already connected.
    Ignored,
}

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Maintenance {
    /// The session just went from connected to disconnected.
    pub timed_out: bool,
}

/// Counters kept by the inbound engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InboundStats {
    /// Datagrams admitted to the buffer or FIFO.
    pub accepted: u64,
    /// Sequenced datagrams outside the window.
    pub rejected: u64,
    /// Gaps abandoned because the buffer filled up.
    pub gap_skips: u64,
    /// Jumps to a new sequence after sustained rejection.
    pub resyncs: u64,
    /// Sequences asked for again.
    pub requested: u64,
    /// Buffered datagrams dropped as too old.
    pub purged: u64,
}

/// Receiver half of a peer session.
#[derive(Debug)]
pub struct InboundEngine {
    config: SessionConfig,
    expected: u16,
    buffer: HashMap<u16, Envelope>,
    fifo: VecDeque<Envelope>,
    rejected: VecDeque<Envelope>,
    /// Requested sequence -> when it may be requested again.
    requested: HashMap<u16, Instant>,
    recover_counter: usize,
    rtt: RttEstimator,
    window: WindowEstimator,
    active: bool,
    connected: bool,
    deadline: Option<Instant>,
    last_activity: Option<Instant>,
    last_keepalive: Option<Instant>,
    reported_connected: bool,
    handshake: Option<Handshake>,
    stats: InboundStats,
}

impl InboundEngine {
    /// Create an active, not yet connected engine.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            expected: HANDSHAKE_SEQUENCE,
            buffer: HashMap::new(),
            fifo: VecDeque::new(),
            rejected: VecDeque::new(),
            requested: HashMap::new(),
            recover_counter: 0,
            rtt: RttEstimator::new(),
            window: WindowEstimator::new(),
            active: true,
            connected: false,
            deadline: None,
            last_activity: None,
            last_keepalive: None,
            reported_connected: false,
            handshake: None,
            stats: InboundStats::default(),
        }
    }

    /// Admit one datagram from `from`.
    ///
    /// Errors are protocol violations (see
    /// [`TransportError::is_silent_drop`]) and leave the engine untouched,
    /// except [`TransportError::Inactive`] after `close`.
    pub fn receive_at(
        &mut self,
        data: Bytes,
        from: SocketAddr,
        now: Instant,
        out: &mut OutboundEngine,
    ) -> TransportResult<Admission> {
        if !self.active {
            return Err(TransportError::Inactive);
        }
        let env = Envelope::parse(data, from, now)?;

        let mut admission = None;
        if env.kind() == PacketKind::Connect {
            if self.is_connected_at(now) {
                return Ok(Admission::Ignored);
            }
            let handshake = Handshake::decode(&mut env.reader())?;
            self.check_key(&handshake)?;
            log::debug!(
                "handshake from {} as {} (version {})",
                from,
                handshake.role,
                handshake.version
            );
            self.restart();
            out.connect(from);
            self.connected = true;
            self.handshake = Some(handshake);
            admission = Some(Admission::Handshake);
        }
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.deadline = Some(now + LIVENESS_TIMEOUT);
        self.last_activity = Some(now);

        let Some(seq) = env.sequence() else {
            self.fifo.push_back(env);
            self.stats.accepted += 1;
            return Ok(Admission::Queued);
        };

        if seq.wrapping_sub(self.expected) < SEQUENCE_WINDOW {
            self.buffer.insert(seq, env);
            self.window.record_arrival();
            self.recover_counter = 0;
            self.stats.accepted += 1;
            return Ok(admission.unwrap_or(Admission::Buffered));
        }

        self.stats.rejected += 1;
        self.recover_counter += 1;
        if self.recover_counter > self.window.window() * 2 {
            log::debug!("resyncing {} from {} to {}", from, self.expected, seq);
            self.restart();
            self.buffer.insert(seq, env);
            self.expected = seq;
            self.stats.resyncs += 1;
            return Ok(Admission::Resynced);
        }
        log::trace!("rejected seq {} from {} (expected {})", seq, from, self.expected);
        self.rejected.push_back(env);
        Ok(Admission::Rejected)
    }

    /// Next datagram for the application, in order.
    ///
    /// Unsequenced datagrams come first, then the expected sequence. Control
    /// traffic is consumed on the way. When the expected sequence is missing
    /// the engine either skips the gap (buffer full) or asks the sender for
    /// it and returns `None`.
    pub fn next_packet_at(&mut self, now: Instant, out: &mut OutboundEngine) -> Option<Envelope> {
        if !self.active {
            return None;
        }
        loop {
            if let Some(env) = self.fifo.pop_front() {
                match self.intercept(env, now, out) {
                    Some(env) => return Some(env),
                    None => continue,
                }
            }

            if let Some(env) = self.buffer.remove(&self.expected) {
                self.expected = self.expected.wrapping_add(1);
                match self.intercept(env, now, out) {
                    Some(env) => return Some(env),
                    None => continue,
                }
            }

            if self.buffer.is_empty() {
                return None;
            }

            if self.buffer.len() >= self.window.window() {
                let expected = self.expected;
                if let Some(lowest) = self
                    .buffer
                    .keys()
                    .copied()
                    .min_by_key(|k| k.wrapping_sub(expected))
                {
                    log::debug!("skipping gap {}..{}", expected, lowest);
                    self.expected = lowest;
                    self.stats.gap_skips += 1;
                    continue;
                }
            }

            self.request_missing(now, out);
            return None;
        }
    }

    /// Periodic housekeeping; call every tick.
    pub fn maintain_at(&mut self, now: Instant, out: &mut OutboundEngine) -> Maintenance {
        if !self.active {
            return Maintenance::default();
        }

        self.requested.retain(|_, retry_at| now < *retry_at);

        let grace = self.rtt.rtt() * 4;
        let before = self.buffer.len();
        self.buffer.retain(|_, env| !env.is_expired_at(now, grace));
        self.stats.purged += (before - self.buffer.len()) as u64;

        let connected = self.is_connected_at(now);
        let timed_out = self.reported_connected && !connected;
        self.reported_connected = connected;
        if timed_out {
            log::debug!("peer {:?} timed out", out.remote());
        }

        if connected && self.last_keepalive.is_none_or(|t| now >= t + PROBE_INTERVAL) {
            out.send_ping(false, now);
            self.last_keepalive = Some(now);
        }

        self.window.sample_at(now, self.rtt.rtt());

        while let Some(env) = self.rejected.pop_front() {
            if let Some(seq) = env.sequence()
                && env.kind().is_ack_required()
            {
                out.send_ack(seq, now);
            }
        }

        Maintenance { timed_out }
    }

    /// Active, handshaken and heard from within the liveness timeout.
    pub fn is_connected_at(&self, now: Instant) -> bool {
        self.active && self.connected && self.deadline.is_some_and(|d| now < d)
    }

    /// Forget the peer but keep admitting handshakes.
    pub fn disconnect(&mut self) {
        self.connected = false;
        self.deadline = None;
        self.reported_connected = false;
        self.restart();
    }

    /// Stop admitting datagrams and drop everything buffered.
    pub fn close(&mut self) {
        self.active = false;
        self.connected = false;
        self.deadline = None;
        self.reported_connected = false;
        self.clear_buffers();
    }

    /// Current RTT estimate in milliseconds.
    pub fn rtt_ms(&self) -> u32 {
        self.rtt.rtt_ms()
    }

    /// Current reorder window.
    pub fn window(&self) -> usize {
        self.window.window()
    }

    /// Next sequence to deliver.
    pub fn expected(&self) -> u16 {
        self.expected
    }

    /// When the last datagram was admitted.
    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    /// Handshake that connected the engine.
    pub fn handshake(&self) -> Option<&Handshake> {
        self.handshake.as_ref()
    }

    /// Configured mode.
    pub fn mode(&self) -> InboundMode {
        self.config.mode
    }

    /// Whether `close` was called.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Sequenced datagrams waiting for delivery.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Counters so far.
    pub fn stats(&self) -> InboundStats {
        self.stats
    }

    fn check_key(&self, handshake: &Handshake) -> TransportResult<()> {
        let role = handshake.role().ok_or(TransportError::UnknownRole(handshake.role))?;
        match self.config.key_for(role) {
            Some(key) if key == handshake.key => Ok(()),
            _ => Err(TransportError::KeyMismatch {
                role: handshake.role,
            }),
        }
    }

    fn restart(&mut self) {
        self.expected = HANDSHAKE_SEQUENCE;
        self.recover_counter = 0;
        self.last_keepalive = None;
        self.clear_buffers();
    }

    fn clear_buffers(&mut self) {
        self.buffer.clear();
        self.fifo.clear();
        self.rejected.clear();
        self.requested.clear();
    }

    fn request_missing(&mut self, now: Instant, out: &mut OutboundEngine) {
        let retry_at = now + self.rtt.rtt() + REQUEST_SLACK;
        let mut missing = Vec::new();
        for i in 0..MAX_REQUESTED {
            let seq = self.expected.wrapping_add(i);
            if self.buffer.contains_key(&seq) {
                break;
            }
            if self.requested.contains_key(&seq) {
                continue;
            }
            missing.push(seq);
            self.requested.insert(seq, retry_at);
        }
        self.stats.requested += missing.len() as u64;
        out.request_missing(&missing, now);
    }

    /// Consume transport control traffic; returns what the caller should see.
    fn intercept(
        &mut self,
        env: Envelope,
        now: Instant,
        out: &mut OutboundEngine,
    ) -> Option<Envelope> {
        let kind = env.kind();
        if let Some(seq) = env.sequence()
            && kind.is_ack_required()
        {
            out.send_ack(seq, now);
        }

        match kind {
            PacketKind::Ping | PacketKind::Pong => {
                let probe = match Probe::decode(&mut env.reader()) {
                    Ok(probe) => probe,
                    Err(e) => {
                        log::trace!("malformed {} from {}: {}", kind, env.remote(), e);
                        return None;
                    }
                };
                if probe.to_endpoint && self.config.mode == InboundMode::Relay {
                    return Some(env);
                }
                if kind == PacketKind::Ping {
                    out.send_pong(&probe, now);
                    None
                } else if probe.to_endpoint {
                    Some(env)
                } else {
                    // The timestamp is peer-controlled
                    let rtt = monotonic_ms(now)
                        .checked_sub(probe.timestamp_ms)
                        .and_then(|sample| self.rtt.update(sample));
                    if let Some(rtt) = rtt {
                        out.set_rtt(rtt);
                    }
                    None
                }
            }
            PacketKind::PacketReceived => {
                if let Ok(seq) = decode_ack(&mut env.reader()) {
                    out.acknowledge(seq);
                }
                None
            }
            PacketKind::RequestPackets => {
                if let Ok(seqs) = decode_retransmit_request(&mut env.reader()) {
                    out.resend_all(&seqs);
                }
                None
            }
            PacketKind::Connect => {
                if self.config.mode != InboundMode::Dial {
                    out.send_at(env.data(), now);
                }
                None
            }
            _ => Some(env),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireReader;
    use crate::packet::{encode_ack, encode_retransmit_request, packet_writer};
    use crate::transport::testing::RecordingSink;
    use std::sync::Arc;

    fn peer() -> SocketAddr {
        "10.0.0.2:5000".parse().unwrap()
    }

    fn sequenced(kind: PacketKind, seq: u16) -> Bytes {
        let mut w = packet_writer(kind);
        w.put_u8(0xab);
        let mut data = w.into_vec();
        data[1..3].copy_from_slice(&seq.to_be_bytes());
        Bytes::from(data)
    }

    fn handshake(role: Role, key: &str) -> Bytes {
        Handshake::new(role, key, 7).encode().unwrap()
    }

    struct Harness {
        sink: Arc<RecordingSink>,
        inbound: InboundEngine,
        out: OutboundEngine,
        now: Instant,
    }

    impl Harness {
        fn new(config: SessionConfig) -> Self {
            let sink = RecordingSink::new();
            Self {
                out: OutboundEngine::new(sink.clone()),
                sink,
                inbound: InboundEngine::new(config),
                now: Instant::now(),
            }
        }

        /// Accepting engine already past the handshake.
        fn connected() -> Self {
            let mut h = Self::new(SessionConfig::accept("DD"));
            h.recv(handshake(Role::Controller, "DD")).unwrap();
            assert!(h.drain().is_empty());
            h.sink.take();
            h
        }

        fn recv(&mut self, data: Bytes) -> TransportResult<Admission> {
            self.inbound.receive_at(data, peer(), self.now, &mut self.out)
        }

        fn drain(&mut self) -> Vec<Envelope> {
            std::iter::from_fn(|| self.inbound.next_packet_at(self.now, &mut self.out)).collect()
        }

        fn advance(&mut self, ms: u64) {
            self.now += Duration::from_millis(ms);
        }
    }

    fn seqs(envs: &[Envelope]) -> Vec<u16> {
        envs.iter().filter_map(|e| e.sequence()).collect()
    }

    #[test]
    fn test_handshake_connects_and_echoes() {
        let mut h = Harness::new(SessionConfig::accept("DD"));
        assert_eq!(h.recv(handshake(Role::Drone, "DD")).unwrap(), Admission::Handshake);
        assert!(h.inbound.is_connected_at(h.now));
        assert_eq!(h.out.remote(), Some(peer()));

        assert!(h.drain().is_empty());
        // Ack of 0xFFFF plus the echoed handshake
        assert_eq!(h.sink.count(PacketKind::PacketReceived), 1);
        assert_eq!(h.sink.count(PacketKind::Connect), 1);
        assert_eq!(h.inbound.expected(), 0);
        assert_eq!(h.inbound.handshake().unwrap().role(), Some(Role::Drone));
    }

    #[test]
    fn test_dial_mode_does_not_echo() {
        let mut h = Harness::new(SessionConfig::dial("DD"));
        h.recv(handshake(Role::Controller, "DD")).unwrap();
        h.drain();
        assert_eq!(h.sink.count(PacketKind::Connect), 0);
    }

    #[test]
    fn test_wrong_key_mutates_nothing() {
        let mut h = Harness::new(SessionConfig::relay("DD", "VV"));
        let err = h.recv(handshake(Role::Controller, "VV")).unwrap_err();
        assert!(matches!(err, TransportError::KeyMismatch { role: 1 }));
        assert!(err.is_silent_drop());
        assert!(!h.inbound.is_connected_at(h.now));
        assert!(!h.out.is_active());
        assert!(h.inbound.last_activity().is_none());

        assert_eq!(h.recv(handshake(Role::Viewer, "VV")).unwrap(), Admission::Handshake);
    }

    #[test]
    fn test_unknown_role_rejected() {
        let mut h = Harness::new(SessionConfig::accept("DD"));
        let mut hs = Handshake::new(Role::Drone, "DD", 7);
        hs.role = 9;
        let err = h.recv(hs.encode().unwrap()).unwrap_err();
        assert!(matches!(err, TransportError::UnknownRole(9)));
    }

    #[test]
    fn test_viewer_refused_without_viewer_key() {
        let mut config = SessionConfig::accept("DD");
        config.viewer_key = None;
        let mut h = Harness::new(config);
        assert!(h.recv(handshake(Role::Viewer, "DD")).is_err());
    }

    #[test]
    fn test_data_before_handshake() {
        let mut h = Harness::new(SessionConfig::accept("DD"));
        let err = h.recv(sequenced(PacketKind::Config, 0)).unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        let err = h.recv(Bytes::from_static(&[19, 1])).unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[test]
    fn test_handshake_while_connected_ignored() {
        let mut h = Harness::connected();
        h.recv(sequenced(PacketKind::Config, 0)).unwrap();
        assert_eq!(h.recv(handshake(Role::Controller, "DD")).unwrap(), Admission::Ignored);
        assert_eq!(h.inbound.buffered(), 1);
    }

    #[test]
    fn test_reorder_delivers_in_sequence() {
        let mut h = Harness::connected();
        for seq in [5, 4, 3] {
            assert_eq!(h.recv(sequenced(PacketKind::Config, seq)).unwrap(), Admission::Buffered);
        }
        // 0..=2 missing: nothing delivered, a retransmit request goes out
        assert!(h.drain().is_empty());
        for seq in [2, 0, 1] {
            h.recv(sequenced(PacketKind::Config, seq)).unwrap();
        }
        assert_eq!(seqs(&h.drain()), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(h.inbound.expected(), 6);
    }

    #[test]
    fn test_shuffled_arrivals_delivered_in_order() {
        use rand::seq::SliceRandom;
        use rand::{SeedableRng, rngs::StdRng};

        let mut h = Harness::connected();
        let mut order: Vec<u16> = (0..25).collect();
        order.shuffle(&mut StdRng::seed_from_u64(7));

        let mut delivered = Vec::new();
        for seq in order {
            h.recv(sequenced(PacketKind::Config, seq)).unwrap();
            delivered.extend(seqs(&h.drain()));
        }
        assert_eq!(delivered, (0..25).collect::<Vec<u16>>());
        assert_eq!(h.inbound.stats().gap_skips, 0);
    }

    #[test]
    fn test_unsequenced_delivered_first() {
        let mut h = Harness::connected();
        h.recv(sequenced(PacketKind::Config, 0)).unwrap();
        assert_eq!(h.recv(Bytes::from_static(&[19, 1, 2])).unwrap(), Admission::Queued);

        let out = h.drain();
        assert_eq!(out[0].kind(), PacketKind::TelemetryData);
        assert_eq!(out[1].kind(), PacketKind::Config);
    }

    #[test]
    fn test_missing_sequences_requested_once() {
        let mut h = Harness::connected();
        h.recv(sequenced(PacketKind::Config, 0)).unwrap();
        h.recv(sequenced(PacketKind::Config, 3)).unwrap();

        assert_eq!(seqs(&h.drain()), vec![0]);
        let sent = h.sink.take();
        let request = sent
            .iter()
            .find(|(d, _)| d[0] == PacketKind::RequestPackets.code())
            .unwrap();
        let asked = decode_retransmit_request(&mut WireReader::new(&request.0[1..])).unwrap();
        assert_eq!(asked, vec![1, 2]);

        // Still pending: no duplicate request
        h.drain();
        assert_eq!(h.sink.count(PacketKind::RequestPackets), 0);

        // After rtt + 20 ms the request may repeat
        h.advance(120);
        h.inbound.maintain_at(h.now, &mut h.out);
        h.drain();
        assert_eq!(h.sink.count(PacketKind::RequestPackets), 1);
        assert_eq!(h.inbound.stats().requested, 4);
    }

    #[test]
    fn test_request_capped_at_ten() {
        let mut h = Harness::connected();
        h.recv(sequenced(PacketKind::Config, 50)).unwrap();
        h.drain();
        let sent = h.sink.take();
        let request = sent
            .iter()
            .find(|(d, _)| d[0] == PacketKind::RequestPackets.code())
            .unwrap();
        let asked = decode_retransmit_request(&mut WireReader::new(&request.0[1..])).unwrap();
        assert_eq!(asked, (0..10).collect::<Vec<u16>>());
    }

    #[test]
    fn test_gap_skipped_when_buffer_full() {
        let mut h = Harness::connected();
        // Initial window is 30; sequence 0 never arrives
        for seq in 1..=30 {
            h.recv(sequenced(PacketKind::Config, seq)).unwrap();
        }
        let delivered = h.drain();
        assert_eq!(seqs(&delivered), (1..=30).collect::<Vec<u16>>());
        assert_eq!(h.inbound.stats().gap_skips, 1);
    }

    #[test]
    fn test_wraparound_delivery() {
        let mut h = Harness::connected();
        h.inbound.expected = 65534;
        for seq in [1, 65535, 0, 65534] {
            h.recv(sequenced(PacketKind::Config, seq)).unwrap();
        }
        assert_eq!(seqs(&h.drain()), vec![65534, 65535, 0, 1]);
    }

    #[test]
    fn test_gap_skip_picks_circular_lowest() {
        let mut h = Harness::connected();
        h.inbound.expected = 65500;
        // 65500..65509 missing; 30 entries straddling the wrap
        for seq in (65510..=65535).chain(0..4) {
            h.recv(sequenced(PacketKind::Config, seq)).unwrap();
        }
        let delivered = seqs(&h.drain());
        assert_eq!(delivered.first(), Some(&65510));
        assert_eq!(delivered.last(), Some(&3));
    }

    #[test]
    fn test_out_of_window_rejected_and_acked() {
        let mut h = Harness::connected();
        h.inbound.expected = 2000;
        // Duplicate of an already delivered packet
        assert_eq!(h.recv(sequenced(PacketKind::Config, 1990)).unwrap(), Admission::Rejected);
        assert_eq!(h.inbound.buffered(), 0);

        h.inbound.maintain_at(h.now, &mut h.out);
        let acks: Vec<u16> = h
            .sink
            .take()
            .iter()
            .filter(|(d, _)| d[0] == PacketKind::PacketReceived.code())
            .map(|(d, _)| u16::from_be_bytes([d[1], d[2]]))
            .collect();
        assert_eq!(acks, vec![1990]);
    }

    #[test]
    fn test_sustained_rejection_resyncs() {
        let mut h = Harness::connected();
        // Window 30: the 61st consecutive rejection resyncs
        for i in 0..60u16 {
            assert_eq!(
                h.recv(sequenced(PacketKind::Config, 30000 + i)).unwrap(),
                Admission::Rejected
            );
        }
        assert_eq!(
            h.recv(sequenced(PacketKind::Config, 30060)).unwrap(),
            Admission::Resynced
        );
        assert_eq!(h.inbound.expected(), 30060);
        assert_eq!(seqs(&h.drain()), vec![30060]);
        assert_eq!(h.inbound.stats().resyncs, 1);
    }

    #[test]
    fn test_liveness_times_out_once() {
        let mut h = Harness::connected();
        h.advance(3999);
        assert!(!h.inbound.maintain_at(h.now, &mut h.out).timed_out);
        assert!(h.inbound.is_connected_at(h.now));

        h.advance(1);
        assert!(!h.inbound.is_connected_at(h.now));
        assert!(h.inbound.maintain_at(h.now, &mut h.out).timed_out);
        h.advance(10);
        assert!(!h.inbound.maintain_at(h.now, &mut h.out).timed_out);

        // A fresh handshake rejoins
        assert_eq!(h.recv(handshake(Role::Controller, "DD")).unwrap(), Admission::Handshake);
    }

    #[test]
    fn test_keepalive_every_probe_interval() {
        let mut h = Harness::connected();
        h.inbound.maintain_at(h.now, &mut h.out);
        assert_eq!(h.sink.count(PacketKind::Ping), 1);

        h.advance(499);
        h.inbound.maintain_at(h.now, &mut h.out);
        assert_eq!(h.sink.count(PacketKind::Ping), 1);

        h.advance(1);
        h.inbound.maintain_at(h.now, &mut h.out);
        assert_eq!(h.sink.count(PacketKind::Ping), 2);
    }

    #[test]
    fn test_ping_answered_with_pong() {
        let mut h = Harness::connected();
        let ping = Probe {
            to_endpoint: true,
            timestamp_ms: 77,
            target: Some(3),
        };
        h.recv(ping.encode(PacketKind::Ping)).unwrap();
        assert!(h.drain().is_empty());

        let sent = h.sink.take();
        assert_eq!(sent.len(), 1);
        let pong = Probe::decode(&mut WireReader::new(&sent[0].0[1..])).unwrap();
        assert_eq!(sent[0].0[0], PacketKind::Pong.code());
        assert_eq!(pong, ping);
    }

    #[test]
    fn test_relay_passes_end_to_end_probes() {
        let mut h = Harness::new(SessionConfig::relay("DD", "DD"));
        h.recv(handshake(Role::Controller, "DD")).unwrap();
        h.drain();
        h.sink.take();

        let e2e = Probe {
            to_endpoint: true,
            timestamp_ms: 1,
            target: None,
        };
        let hop = Probe {
            to_endpoint: false,
            ..e2e
        };
        h.recv(e2e.encode(PacketKind::Ping)).unwrap();
        h.recv(hop.encode(PacketKind::Ping)).unwrap();

        let delivered = h.drain();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].kind(), PacketKind::Ping);
        assert_eq!(h.sink.count(PacketKind::Pong), 1);
    }

    #[test]
    fn test_pong_updates_rtt() {
        let mut h = Harness::connected();
        let pong = Probe {
            to_endpoint: false,
            timestamp_ms: monotonic_ms(h.now) - 40,
            target: None,
        };
        h.recv(pong.encode(PacketKind::Pong)).unwrap();
        assert!(h.drain().is_empty());
        assert_eq!(h.inbound.rtt_ms(), 40);
        assert_eq!(h.out.rtt_ms(), 40);

        let e2e = Probe {
            to_endpoint: true,
            ..pong
        };
        h.recv(e2e.encode(PacketKind::Pong)).unwrap();
        assert_eq!(h.drain().len(), 1);
    }

    #[test]
    fn test_pong_with_extreme_timestamp_is_discarded() {
        let mut h = Harness::connected();
        for timestamp_ms in [i64::MIN, i64::MAX] {
            let pong = Probe {
                to_endpoint: false,
                timestamp_ms,
                target: None,
            };
            h.recv(pong.encode(PacketKind::Pong)).unwrap();
            assert!(h.drain().is_empty());
        }
        assert_eq!(h.inbound.rtt_ms(), 100);
        assert!(h.inbound.is_connected_at(h.now));
    }

    #[test]
    fn test_ack_and_request_reach_outbound() {
        let mut h = Harness::connected();
        let mut w = packet_writer(PacketKind::Config);
        w.put_u8(1);
        let data = w.freeze();
        h.out.send_at(&data, h.now);
        h.out.send_at(&data, h.now);
        h.sink.take();

        h.recv(encode_retransmit_request(&[1])).unwrap();
        h.recv(encode_ack(0)).unwrap();
        assert!(h.drain().is_empty());

        let sent = h.sink.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(u16::from_be_bytes([sent[0].0[1], sent[0].0[2]]), 1);
        assert!(!h.out.is_retained(0));
        assert!(h.out.is_retained(1));
    }

    #[test]
    fn test_stale_buffer_entries_purged() {
        let mut h = Harness::connected();
        h.recv(sequenced(PacketKind::Config, 5)).unwrap();
        // Lifetime 1000 ms + 4 x 100 ms RTT
        h.advance(1399);
        h.recv(Bytes::from_static(&[19])).unwrap();
        h.inbound.maintain_at(h.now, &mut h.out);
        assert_eq!(h.inbound.buffered(), 1);
        h.advance(1);
        h.inbound.maintain_at(h.now, &mut h.out);
        assert_eq!(h.inbound.buffered(), 0);
        assert_eq!(h.inbound.stats().purged, 1);
    }

    #[test]
    fn test_disconnect_allows_rejoin() {
        let mut h = Harness::connected();
        h.recv(sequenced(PacketKind::Config, 0)).unwrap();
        h.inbound.disconnect();
        assert!(!h.inbound.is_connected_at(h.now));
        assert_eq!(h.inbound.buffered(), 0);
        assert!(matches!(
            h.recv(sequenced(PacketKind::Config, 1)),
            Err(TransportError::NotConnected)
        ));
        assert_eq!(h.recv(handshake(Role::Controller, "DD")).unwrap(), Admission::Handshake);
    }

    #[test]
    fn test_closed_engine_refuses() {
        let mut h = Harness::connected();
        h.inbound.close();
        assert!(matches!(
            h.recv(sequenced(PacketKind::Config, 0)),
            Err(TransportError::Inactive)
        ));
        assert!(h.inbound.next_packet_at(h.now, &mut h.out).is_none());
    }
}
