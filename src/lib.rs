//! # skylink
//!
//! Partially reliable UDP links between a drone, its hand controller and
//! passive viewers, either directly or through a rendezvous relay.
//!
//! Every datagram starts with a one-byte kind. A static table decides, per
//! kind, whether it is sequenced, whether the receiver acknowledges it, how
//! long the sender keeps it for retransmission and how a relay forwards it.
//! On top of raw datagrams the crate provides:
//!
//! - **Reliability**: retransmission of acknowledged kinds until they are
//!   acked or their lifetime runs out, and retransmit requests for gaps
//! - **Ordering**: an adaptive reorder window that skips gaps it cannot fill
//! - **Liveness**: keep-alive probes, RTT estimation and disconnect detection
//! - **Media**: fragmentation and reassembly of frames larger than a datagram
//! - **Relay**: role slots with shared-key authentication and fixed routing
//!
//! ## Feature Flags
//!
//! - `transport` (default): engines, sessions, sockets and endpoint links
//! - `relay` (default): slot table, routing, relay server and its config file
//! - `cli` (default): the `skylink-relay` executable
//!
//! ## Modules
//!
//! - [`core`]: constants, error types and the datagram sink seam (always included)
//! - [`codec`]: big-endian wire primitives (always included)
//! - [`packet`]: kinds, envelopes and control messages (always included)
//! - [`media`]: frame fragmentation and reassembly (always included)
//! - [`transport`]: reliability engines and endpoint links (requires `transport`)
//! - [`relay`]: the session relay (requires `relay`)
//!
//! ## Example Usage
//!
//! ```rust
//! use skylink::prelude::*;
//!
//! // A controller command, ready for `Link::send`
//! let mut w = packet_writer(PacketKind::StartVideo);
//! w.put_bool(true);
//! assert_eq!(w.as_slice(), &[3, 0xFF, 0xFF, 1]);
//!
//! // Frames larger than a datagram are fragmented
//! let mut fragmenter = Fragmenter::new(PACKET_LENGTH);
//! let datagrams = fragmenter.split(&[0u8; 3000], true).unwrap();
//! assert!(datagrams.iter().all(|d| d.len() <= PACKET_LENGTH));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Always included
pub mod codec;
pub mod core;
pub mod media;
pub mod packet;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Session relay (feature-gated)
#[cfg(feature = "relay")]
#[cfg_attr(docsrs, doc(cfg(feature = "relay")))]
pub mod relay;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::codec::{WireReader, WireWriter};
    pub use crate::core::constants::*;
    pub use crate::core::{CodecError, DatagramSink, PacketError};
    pub use crate::media::{AssembledFrame, FrameAssembler, FrameStats, Fragmenter};
    pub use crate::packet::{
        Envelope, Handshake, PacketKind, Probe, Role, Route, packet_writer,
    };

    #[cfg(feature = "transport")]
    pub use crate::transport::{
        Link, LinkBuilder, LinkConfig, LinkEvent, PeerSession, SessionConfig, TransportError,
        TransportResult,
    };

    #[cfg(feature = "relay")]
    pub use crate::relay::{RelayConfig, RelayError, RelayEvent, RelayServer};
}

// Re-export commonly used items at crate root
pub use packet::{Envelope, PacketKind, Role};

#[cfg(feature = "transport")]
pub use transport::{Link, LinkEvent, PeerSession};
