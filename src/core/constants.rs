//! Protocol constants shared by every peer.
//!
//! These values are part of the wire contract between drone, controller,
//! viewers and the relay. Changing them breaks interoperability.

use std::time::Duration;

// =============================================================================
// WIRE
// =============================================================================

/// Default relay and direct-link UDP port.
pub const DEFAULT_PORT: u16 = 6286;

/// Largest datagram a peer emits; media fragments are cut to fit.
pub const PACKET_LENGTH: usize = 1100;

/// Largest frame a receiver will reassemble; bigger declared sizes are dropped.
pub const MAX_FRAME_SIZE: usize = 4096 * PACKET_LENGTH;

/// Receive buffer size for sockets (largest possible UDP payload).
pub const RECV_BUFFER_SIZE: usize = 65535;

/// Size of the kind byte that opens every datagram.
pub const KIND_SIZE: usize = 1;

/// Size of the big-endian sequence number that follows the kind byte.
pub const SEQUENCE_SIZE: usize = 2;

/// Header length of a sequenced datagram.
pub const SEQUENCED_HEADER_SIZE: usize = KIND_SIZE + SEQUENCE_SIZE;

/// Sequence number carried by every handshake (`-1` as a signed short).
pub const HANDSHAKE_SEQUENCE: u16 = 0xFFFF;

/// Application compatibility code sent in the handshake.
pub const PROTOCOL_VERSION: u16 = 7;

// =============================================================================
// KEYS AND SLOTS
// =============================================================================

/// Pre-shared key used when nothing else is configured.
pub const DEFAULT_KEY: &str = "DD";

/// Longest accepted pre-shared key, in characters.
pub const MAX_KEY_CHARS: usize = 16;

/// Viewer slots a relay opens by default.
pub const DEFAULT_VIEWERS: usize = 2;

/// Upper bound on viewer slots.
pub const MAX_VIEWERS: usize = 8;

/// Lowest port accepted for a relay listener.
pub const MIN_PORT: u16 = 1024;

// =============================================================================
// TIMING
// =============================================================================

/// Period of the engine tick (retransmission, maintenance, liveness).
pub const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// A session with no accepted datagram for this long is disconnected.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_millis(4000);

/// Interval of keep-alive and end-to-end probes.
pub const PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// A relay slot silent this long while disconnected is torn down.
pub const SLOT_IDLE_TEARDOWN: Duration = Duration::from_secs(10);

/// RTT assumed before the first probe returns.
pub const INITIAL_RTT_MS: u32 = 100;

/// Largest RTT the engines accept.
pub const MAX_RTT_MS: u32 = 1000;

// =============================================================================
// MEDIA
// =============================================================================

/// Frames further ahead than this are treated as stale during eviction.
pub const FRAME_WINDOW: u16 = 1000;
