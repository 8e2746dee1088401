//! The in-flight unit held by the engines.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;

use super::kind::PacketKind;
use crate::codec::{WireReader, WireWriter};
use crate::core::PacketError;
use crate::core::constants::{HANDSHAKE_SEQUENCE, SEQUENCED_HEADER_SIZE};

/// One datagram together with its classification and timestamps.
///
/// `data` always holds the whole datagram, header included, so the sender
/// can retransmit it byte-for-byte and the relay can forward it unchanged.
#[derive(Debug, Clone)]
pub struct Envelope {
    kind: PacketKind,
    sequence: Option<u16>,
    data: Bytes,
    remote: SocketAddr,
    created_at: Instant,
    last_sent_at: Instant,
}

impl Envelope {
    /// Build an envelope from already-classified parts.
    pub fn new(
        kind: PacketKind,
        sequence: Option<u16>,
        data: Bytes,
        remote: SocketAddr,
        now: Instant,
    ) -> Self {
        Self {
            kind,
            sequence,
            data,
            remote,
            created_at: now,
            last_sent_at: now,
        }
    }

    /// Classify a received datagram.
    ///
    /// Fails on an empty datagram, an unknown kind byte, or a sequenced
    /// datagram too short to hold its sequence number.
    pub fn parse(data: Bytes, remote: SocketAddr, now: Instant) -> Result<Self, PacketError> {
        let code = *data.first().ok_or(PacketError::Empty)?;
        let kind = PacketKind::try_from(code)?;
        let sequence = if kind.is_sequenced() {
            if data.len() < SEQUENCED_HEADER_SIZE {
                return Err(PacketError::Truncated { len: data.len() });
            }
            Some(u16::from_be_bytes([data[1], data[2]]))
        } else {
            None
        };
        Ok(Self::new(kind, sequence, data, remote, now))
    }

    /// Packet kind.
    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    /// Sequence number, for sequenced kinds.
    pub fn sequence(&self) -> Option<u16> {
        self.sequence
    }

    /// Whole datagram.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Bytes after the header.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.kind.header_len().min(self.data.len())..]
    }

    /// Reader positioned at the payload.
    pub fn reader(&self) -> WireReader<'_> {
        WireReader::new(self.payload())
    }

    /// Peer the datagram came from or goes to.
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// When the envelope was built.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the datagram last went out.
    pub fn last_sent_at(&self) -> Instant {
        self.last_sent_at
    }

    /// Record a (re)transmission.
    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent_at = now;
    }

    /// Whether the kind's lifetime plus `grace` has elapsed.
    pub fn is_expired_at(&self, now: Instant, grace: Duration) -> bool {
        now >= self.created_at + self.kind.lifetime() + grace
    }
}

/// Start a datagram of `kind`.
///
/// Sequenced kinds get a placeholder sequence that the outbound engine
/// overwrites when it numbers the datagram.
pub fn packet_writer(kind: PacketKind) -> WireWriter {
    let mut w = WireWriter::with_capacity(32);
    w.put_u8(kind.code());
    if kind.is_sequenced() {
        w.put_u16(HANDSHAKE_SEQUENCE);
    }
    w
}
