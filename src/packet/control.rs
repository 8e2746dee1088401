//! Transport control messages: handshake, probes, acknowledgments,
//! retransmit requests and disconnect.

use bytes::Bytes;

use super::envelope::packet_writer;
use super::kind::PacketKind;
use crate::codec::WireReader;
use crate::core::CodecError;

/// Offset of the optional target-slot byte in a probe datagram
/// (kind byte, `to_endpoint` flag, 8-byte timestamp).
pub const PROBE_TARGET_OFFSET: usize = 10;

/// Role a peer declares in its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Role {
    /// Flight side; relay slot 0.
    Drone = 0,
    /// Hand controller; relay slot 1.
    Controller = 1,
    /// Passive viewer; relay slots 2 and up.
    Viewer = 2,
}

impl Role {
    /// Look up a role by its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Role::Drone),
            1 => Some(Role::Controller),
            2 => Some(Role::Viewer),
            _ => None,
        }
    }

    /// Wire code.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Drone => write!(f, "drone"),
            Role::Controller => write!(f, "controller"),
            Role::Viewer => write!(f, "viewer"),
        }
    }
}

/// Handshake payload.
///
/// The role is kept as a raw code so a receiver can reject unknown roles
/// with its own error instead of failing the decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Declared role code (see [`Role`]).
    pub role: u8,
    /// Pre-shared key.
    pub key: String,
    /// Application compatibility code; 0 when the peer sent none.
    pub version: u16,
}

impl Handshake {
    /// Create a handshake for `role`.
    pub fn new(role: Role, key: impl Into<String>, version: u16) -> Self {
        Self {
            role: role.code(),
            key: key.into(),
            version,
        }
    }

    /// The declared role, if known.
    pub fn role(&self) -> Option<Role> {
        Role::from_code(self.role)
    }

    /// Encode as a complete Connect datagram.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let mut w = packet_writer(PacketKind::Connect);
        w.put_u8(self.role);
        w.put_str(&self.key)?;
        w.put_u16(self.version);
        Ok(w.freeze())
    }

    /// Decode from a Connect payload.
    pub fn decode(reader: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let role = reader.get_u8()?;
        let key = reader.get_str()?.to_owned();
        let version = if reader.remaining() >= 2 {
            reader.get_u16()?
        } else {
            0
        };
        Ok(Self { role, key, version })
    }
}

/// Ping or pong payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    /// Whether the far endpoint (not the next hop) should answer.
    pub to_endpoint: bool,
    /// Sender's monotonic milliseconds, echoed unchanged in the pong.
    pub timestamp_ms: i64,
    /// Slot the pong should return to through a relay.
    pub target: Option<u8>,
}

impl Probe {
    /// Encode as a datagram of `kind` (`Ping` or `Pong`).
    pub fn encode(&self, kind: PacketKind) -> Bytes {
        let mut w = packet_writer(kind);
        w.put_bool(self.to_endpoint);
        w.put_i64(self.timestamp_ms);
        if let Some(target) = self.target {
            w.put_u8(target);
        }
        w.freeze()
    }

    /// Decode from a probe payload.
    pub fn decode(reader: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let to_endpoint = reader.get_bool()?;
        let timestamp_ms = reader.get_i64()?;
        let target = if reader.remaining() > 0 {
            Some(reader.get_u8()?)
        } else {
            None
        };
        Ok(Self {
            to_endpoint,
            timestamp_ms,
            target,
        })
    }
}

/// Encode a PacketReceived datagram acknowledging `seq`.
pub fn encode_ack(seq: u16) -> Bytes {
    let mut w = packet_writer(PacketKind::PacketReceived);
    w.put_u16(seq);
    w.freeze()
}

/// Decode the sequence carried by a PacketReceived payload.
pub fn decode_ack(reader: &mut WireReader<'_>) -> Result<u16, CodecError> {
    reader.get_u16()
}

/// Encode a RequestPackets datagram listing missing sequences.
pub fn encode_retransmit_request(seqs: &[u16]) -> Bytes {
    let mut w = packet_writer(PacketKind::RequestPackets);
    for &seq in seqs {
        w.put_u16(seq);
    }
    w.freeze()
}

/// Decode the sequences listed in a RequestPackets payload.
///
/// A trailing odd byte is ignored.
pub fn decode_retransmit_request(reader: &mut WireReader<'_>) -> Result<Vec<u16>, CodecError> {
    let count = reader.remaining() / 2;
    let mut seqs = Vec::with_capacity(count);
    for _ in 0..count {
        seqs.push(reader.get_u16()?);
    }
    Ok(seqs)
}

/// Encode a Disconnect datagram.
pub fn encode_disconnect() -> Bytes {
    packet_writer(PacketKind::Disconnect).freeze()
}
