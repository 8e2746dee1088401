//! Outbound reliability engine.
//!
//! Numbers sequenced datagrams, keeps every one of them for its kind's
//! lifetime so the peer can ask for it again, and retransmits ack-required
//! datagrams until they are acknowledged or expire.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use super::error::{TransportError, TransportResult};
use super::timing::monotonic_ms;
use crate::core::DatagramSink;
use crate::core::constants::{HANDSHAKE_SEQUENCE, INITIAL_RTT_MS, MAX_RTT_MS, SEQUENCED_HEADER_SIZE};
use crate::packet::{
    Envelope, Handshake, PacketKind, Probe, encode_ack, encode_disconnect,
    encode_retransmit_request,
};

/// Socket attempts per datagram before it is dropped.
pub const MAX_SEND_ATTEMPTS: usize = 10;

/// Fixed slack added to the retransmit timeout.
const RETRANSMIT_SLACK: Duration = Duration::from_millis(5);

/// Counters kept by the outbound engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboundStats {
    /// Datagrams handed to the socket for the first time.
    pub sent: u64,
    /// Retransmissions, timed or requested.
    pub retransmitted: u64,
    /// Datagrams dropped after exhausting every send attempt.
    pub send_failures: u64,
    /// Retained datagrams removed because their lifetime ran out.
    pub expired: u64,
}

/// Sender half of a peer session.
pub struct OutboundEngine {
    sink: Arc<dyn DatagramSink>,
    remote: Option<SocketAddr>,
    /// Last sequence handed out; the next one is its successor.
    last_seq: u16,
    retained: HashMap<u16, Envelope>,
    rtt_ms: u32,
    active: bool,
    generation: u64,
    stats: OutboundStats,
}

impl std::fmt::Debug for OutboundEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundEngine")
            .field("remote", &self.remote)
            .field("last_seq", &self.last_seq)
            .field("retained", &self.retained.len())
            .field("rtt_ms", &self.rtt_ms)
            .field("active", &self.active)
            .field("generation", &self.generation)
            .finish()
    }
}

impl OutboundEngine {
    /// Create an inactive engine writing to `sink`.
    pub fn new(sink: Arc<dyn DatagramSink>) -> Self {
        Self {
            sink,
            remote: None,
            last_seq: HANDSHAKE_SEQUENCE,
            retained: HashMap::new(),
            rtt_ms: INITIAL_RTT_MS,
            active: false,
            generation: 0,
            stats: OutboundStats::default(),
        }
    }

    /// Bind to `remote` and start numbering from 0.
    ///
    /// Clears the retained table and returns the new generation; callers
    /// holding an older generation know the engine was reconnected.
    pub fn connect(&mut self, remote: SocketAddr) -> u64 {
        self.remote = Some(remote);
        self.last_seq = HANDSHAKE_SEQUENCE;
        self.retained.clear();
        self.active = true;
        self.generation += 1;
        log::debug!("outbound connected to {} (generation {})", remote, self.generation);
        self.generation
    }

    /// Deactivate and forget every retained datagram.
    pub fn close(&mut self) {
        if self.active {
            self.generation += 1;
        }
        self.active = false;
        self.retained.clear();
    }

    /// Whether the engine sends.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Peer datagrams go to.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Bumped by every `connect` and `close`.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// RTT used for retransmit timing.
    pub fn rtt_ms(&self) -> u32 {
        self.rtt_ms
    }

    /// Adopt a new RTT estimate; values above the ceiling are ignored.
    pub fn set_rtt(&mut self, rtt_ms: u32) {
        if rtt_ms <= MAX_RTT_MS {
            self.rtt_ms = rtt_ms;
        }
    }

    /// Datagrams currently kept for retransmission.
    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }

    /// Whether `seq` is still retained.
    pub fn is_retained(&self, seq: u16) -> bool {
        self.retained.contains_key(&seq)
    }

    /// Counters so far.
    pub fn stats(&self) -> OutboundStats {
        self.stats
    }

    /// Send a complete datagram.
    ///
    /// Sequenced kinds other than Connect get the next sequence number
    /// stamped into bytes 1..3. Every sequenced datagram is retained.
    /// Returns the sequence carried, or `None` for unsequenced datagrams and
    /// for datagrams dropped because the engine is inactive, has no peer or
    /// the data is empty or unclassifiable.
    pub fn send_at(&mut self, data: &[u8], now: Instant) -> Option<u16> {
        if !self.active || data.is_empty() {
            return None;
        }
        let remote = self.remote?;
        let Some(kind) = PacketKind::from_code(data[0]) else {
            log::trace!("dropping outbound datagram with unknown kind {}", data[0]);
            return None;
        };

        let mut seq = None;
        let data = if kind.is_sequenced() {
            if data.len() < SEQUENCED_HEADER_SIZE {
                return None;
            }
            let num = if kind == PacketKind::Connect {
                HANDSHAKE_SEQUENCE
            } else {
                self.next_sequence()
            };
            let mut buf = BytesMut::from(data);
            buf[1..3].copy_from_slice(&num.to_be_bytes());
            let data = buf.freeze();
            self.retained.insert(
                num,
                Envelope::new(kind, Some(num), data.clone(), remote, now),
            );
            seq = Some(num);
            data
        } else {
            Bytes::copy_from_slice(data)
        };

        match self.transmit(&data, remote) {
            Ok(_) => self.stats.sent += 1,
            Err(e) => log::warn!("dropping {} to {}: {}", kind, remote, e),
        }
        seq
    }

    /// Expire and retransmit retained datagrams.
    ///
    /// Entries whose lifetime has run out are removed; ack-required entries
    /// not sent for `1.2 × rtt + 5 ms` are sent again.
    pub fn tick_at(&mut self, now: Instant) {
        if !self.active {
            return;
        }
        let before = self.retained.len();
        self.retained.retain(|_, env| !env.is_expired_at(now, Duration::ZERO));
        self.stats.expired += (before - self.retained.len()) as u64;

        let timeout = self.retransmit_timeout();
        let due: Vec<u16> = self
            .retained
            .iter()
            .filter(|(_, env)| env.kind().is_ack_required() && now >= env.last_sent_at() + timeout)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in due {
            if let Some(env) = self.retained.get_mut(&seq) {
                env.mark_sent(now);
            }
            self.resend(seq);
        }
    }

    /// The peer acknowledged `seq`. Returns whether it was retained.
    pub fn acknowledge(&mut self, seq: u16) -> bool {
        self.retained.remove(&seq).is_some()
    }

    /// Resend `seq` if it is still retained.
    ///
    /// Requested resends leave the retransmit timer alone.
    pub fn resend(&mut self, seq: u16) -> bool {
        if !self.active {
            return false;
        }
        let Some((data, remote)) = self
            .retained
            .get(&seq)
            .map(|env| (env.data().clone(), env.remote()))
        else {
            return false;
        };
        self.stats.retransmitted += 1;
        match self.transmit(&data, remote) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("resend of {} to {} failed: {}", seq, remote, e);
                false
            }
        }
    }

    /// Resend every listed sequence still retained.
    pub fn resend_all(&mut self, seqs: &[u16]) {
        for &seq in seqs {
            self.resend(seq);
        }
    }

    /// Acknowledge `seq` to the peer.
    pub fn send_ack(&mut self, seq: u16, now: Instant) {
        self.send_at(&encode_ack(seq), now);
    }

    /// Ask the peer to resend `seqs`; nothing is sent for an empty list.
    pub fn request_missing(&mut self, seqs: &[u16], now: Instant) {
        if seqs.is_empty() {
            return;
        }
        self.send_at(&encode_retransmit_request(seqs), now);
    }

    /// Send a ping stamped with the current monotonic time.
    pub fn send_ping(&mut self, to_endpoint: bool, now: Instant) {
        let probe = Probe {
            to_endpoint,
            timestamp_ms: monotonic_ms(now),
            target: None,
        };
        self.send_at(&probe.encode(PacketKind::Ping), now);
    }

    /// Send an end-to-end ping carrying a target placeholder the relay
    /// overwrites with the viewer's slot.
    pub fn send_ping_for_viewer(&mut self, now: Instant) {
        let probe = Probe {
            to_endpoint: true,
            timestamp_ms: monotonic_ms(now),
            target: Some(0),
        };
        self.send_at(&probe.encode(PacketKind::Ping), now);
    }

    /// Answer `ping`, echoing its flag, timestamp and target.
    pub fn send_pong(&mut self, ping: &Probe, now: Instant) {
        self.send_at(&ping.encode(PacketKind::Pong), now);
    }

    /// Send a handshake.
    pub fn send_handshake(&mut self, handshake: &Handshake, now: Instant) -> TransportResult<()> {
        let data = handshake.encode()?;
        self.send_at(&data, now);
        Ok(())
    }

    /// Tell the peer the session is over.
    pub fn send_disconnect(&mut self, now: Instant) {
        self.send_at(&encode_disconnect(), now);
    }

    fn next_sequence(&mut self) -> u16 {
        self.last_seq = self.last_seq.wrapping_add(1);
        self.last_seq
    }

    fn retransmit_timeout(&self) -> Duration {
        Duration::from_millis((self.rtt_ms as u64 * 6) / 5) + RETRANSMIT_SLACK
    }

    fn transmit(&mut self, data: &[u8], to: SocketAddr) -> TransportResult<usize> {
        let mut last_err = None;
        for _ in 0..MAX_SEND_ATTEMPTS {
            match self.sink.send_datagram(data, to) {
                Ok(n) => return Ok(n),
                Err(e) => last_err = Some(e),
            }
        }
        self.stats.send_failures += 1;
        if let Some(e) = last_err {
            log::debug!("last send error to {}: {}", to, e);
        }
        Err(TransportError::SendExhausted {
            attempts: MAX_SEND_ATTEMPTS,
        })
    }
}
