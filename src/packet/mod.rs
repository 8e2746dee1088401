//! Packet taxonomy, envelopes and transport control messages.

mod control;
mod envelope;
mod kind;

pub use control::{
    decode_ack, decode_retransmit_request, encode_ack, encode_disconnect,
    encode_retransmit_request, Handshake, Probe, Role, PROBE_TARGET_OFFSET,
};
pub use envelope::{packet_writer, Envelope};
pub use kind::{KindInfo, PacketKind, Route};
