//! One peer's transport state: an inbound and an outbound engine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;

use super::error::TransportResult;
use super::inbound::{Admission, InboundEngine, Maintenance, SessionConfig};
use super::outbound::OutboundEngine;
use crate::core::DatagramSink;
use crate::packet::Envelope;

/// Session shared between a receive loop and a tick task.
pub type SharedSession = Arc<Mutex<PeerSession>>;

/// Inbound and outbound engines of one peer.
///
/// The inbound engine answers control traffic through the outbound one, so
/// both live behind the same lock.
#[derive(Debug)]
pub struct PeerSession {
    inbound: InboundEngine,
    outbound: OutboundEngine,
}

impl PeerSession {
    /// Create a session writing to `sink`.
    pub fn new(config: SessionConfig, sink: Arc<dyn DatagramSink>) -> Self {
        Self {
            inbound: InboundEngine::new(config),
            outbound: OutboundEngine::new(sink),
        }
    }

    /// Wrap in the shared handle.
    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    /// Admit a received datagram.
    pub fn receive_at(
        &mut self,
        data: Bytes,
        from: SocketAddr,
        now: Instant,
    ) -> TransportResult<Admission> {
        self.inbound.receive_at(data, from, now, &mut self.outbound)
    }

    /// Next datagram for the application.
    pub fn next_packet_at(&mut self, now: Instant) -> Option<Envelope> {
        self.inbound.next_packet_at(now, &mut self.outbound)
    }

    /// Every datagram currently deliverable.
    pub fn drain_at(&mut self, now: Instant) -> Vec<Envelope> {
        std::iter::from_fn(|| self.next_packet_at(now)).collect()
    }

    /// Retransmit, expire and run inbound maintenance.
    pub fn tick_at(&mut self, now: Instant) -> Maintenance {
        self.outbound.tick_at(now);
        self.inbound.maintain_at(now, &mut self.outbound)
    }

    /// Send a complete datagram to the peer.
    pub fn send_at(&mut self, data: &[u8], now: Instant) -> Option<u16> {
        self.outbound.send_at(data, now)
    }

    /// Whether the peer is live.
    pub fn is_connected_at(&self, now: Instant) -> bool {
        self.inbound.is_connected_at(now)
    }

    /// Drop the current peer; a new handshake may reconnect.
    pub fn disconnect(&mut self) {
        self.inbound.disconnect();
        self.outbound.close();
    }

    /// Close both engines.
    pub fn close(&mut self) {
        self.inbound.close();
        self.outbound.close();
    }

    /// Receiver half.
    pub fn inbound(&self) -> &InboundEngine {
        &self.inbound
    }

    /// Sender half.
    pub fn outbound(&self) -> &OutboundEngine {
        &self.outbound
    }

    /// Sender half, for probes, handshakes and control messages.
    pub fn outbound_mut(&mut self) -> &mut OutboundEngine {
        &mut self.outbound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireReader;
    use crate::packet::{Handshake, PacketKind, Role, packet_writer};
    use std::collections::{HashSet, VecDeque};
    use std::io;
    use std::time::Duration;

    /// One direction of a simulated link that loses the first copy of
    /// selected datagrams.
    struct Wire {
        queue: Mutex<VecDeque<Vec<u8>>>,
        lost_once: Mutex<HashSet<Vec<u8>>>,
        lose_first: fn(&[u8]) -> bool,
    }

    impl Wire {
        fn new(lose_first: fn(&[u8]) -> bool) -> Arc<Self> {
            Arc::new(Self {
                queue: Mutex::new(VecDeque::new()),
                lost_once: Mutex::new(HashSet::new()),
                lose_first,
            })
        }

        fn take(&self) -> Vec<Vec<u8>> {
            self.queue.lock().drain(..).collect()
        }
    }

    impl DatagramSink for Wire {
        fn send_datagram(&self, data: &[u8], _to: SocketAddr) -> io::Result<usize> {
            if (self.lose_first)(data) && self.lost_once.lock().insert(data.to_vec()) {
                return Ok(data.len());
            }
            self.queue.lock().push_back(data.to_vec());
            Ok(data.len())
        }
    }

    fn seq_of(data: &[u8]) -> Option<u16> {
        (data.len() >= 3).then(|| u16::from_be_bytes([data[1], data[2]]))
    }

    fn deliver(wire: &Wire, from: SocketAddr, to: &mut PeerSession, now: Instant) -> Vec<Envelope> {
        for datagram in wire.take() {
            let _ = to.receive_at(Bytes::from(datagram), from, now);
        }
        to.drain_at(now)
    }

    #[test]
    fn test_reliable_messages_delivered_exactly_once_under_loss() {
        let a_addr: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let b_addr: SocketAddr = "10.0.0.2:6286".parse().unwrap();

        // A -> B loses the first copy of every even-numbered Config
        let a_to_b = Wire::new(|d| {
            d[0] == PacketKind::Config.code() && seq_of(d).is_some_and(|s| s % 2 == 0)
        });
        // B -> A loses the first ack of every third sequence
        let b_to_a = Wire::new(|d| {
            d[0] == PacketKind::PacketReceived.code() && seq_of(d).is_some_and(|s| s % 3 == 0)
        });

        let mut a = PeerSession::new(SessionConfig::dial("DD"), a_to_b.clone());
        let mut b = PeerSession::new(SessionConfig::accept("DD"), b_to_a.clone());

        let mut now = Instant::now();
        a.outbound_mut().connect(b_addr);
        a.outbound_mut()
            .send_handshake(&Handshake::new(Role::Controller, "DD", 7), now)
            .unwrap();

        let mut sent = 0u16;
        let mut received = Vec::new();
        for _ in 0..400 {
            if a.is_connected_at(now) && sent < 50 {
                let mut w = packet_writer(PacketKind::Config);
                w.put_u16(sent);
                a.send_at(w.as_slice(), now);
                sent += 1;
            }
            for _ in 0..4 {
                for env in deliver(&a_to_b, a_addr, &mut b, now) {
                    if env.kind() == PacketKind::Config {
                        received.push(WireReader::new(env.payload()).get_u16().unwrap());
                    }
                }
                deliver(&b_to_a, b_addr, &mut a, now);
            }
            a.tick_at(now);
            b.tick_at(now);
            now += Duration::from_millis(10);
        }

        assert_eq!(sent, 50);
        assert_eq!(received, (0..50).collect::<Vec<u16>>());
        assert!(a.outbound().stats().retransmitted > 0);
        assert_eq!(b.inbound().stats().gap_skips, 0);
        assert!(a.is_connected_at(now) && b.is_connected_at(now));
    }

    #[test]
    fn test_close_stops_both_halves() {
        let wire = Wire::new(|_| false);
        let mut session = PeerSession::new(SessionConfig::accept("DD"), wire.clone());
        let now = Instant::now();
        let hs = Handshake::new(Role::Drone, "DD", 7).encode().unwrap();
        session
            .receive_at(hs, "10.0.0.1:1".parse().unwrap(), now)
            .unwrap();
        assert!(session.is_connected_at(now));

        session.close();
        assert!(!session.is_connected_at(now));
        assert!(!session.outbound().is_active());
        assert_eq!(session.send_at(&[19, 1], now), None);
    }
}
