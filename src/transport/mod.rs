//! Transport layer.
//!
//! Partially reliable datagram delivery between two peers:
//!
//! - **Outbound**: [`OutboundEngine`] numbers, retains and retransmits
//!   sequenced datagrams until acknowledged or expired
//! - **Inbound**: [`InboundEngine`] restores order, requests gaps, skips
//!   what cannot be recovered and answers acks, probes and handshakes
//! - **Timing**: [`RttEstimator`] and [`WindowEstimator`]
//! - **Sessions**: [`PeerSession`] pairs both engines behind one lock
//! - **Sockets**: [`LinkSocket`] wraps a tokio UDP socket
//! - **Endpoints**: [`Link`] runs a session over a socket for drones,
//!   controllers and viewers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     Application / Relay server          │
//! ├─────────────────────────────────────────┤
//! │   PeerSession                           │  ← This module
//! │   inbound order + outbound retransmit   │
//! ├─────────────────────────────────────────┤
//! │   Envelope / PacketKind (packet)        │
//! ├─────────────────────────────────────────┤
//! │              UDP                        │
//! └─────────────────────────────────────────┘
//! ```

mod error;
mod inbound;
mod link;
mod outbound;
mod session;
mod socket;
#[cfg(test)]
pub(crate) mod testing;
mod timing;

pub use error::*;
pub use inbound::{
    Admission, InboundEngine, InboundMode, InboundStats, MAX_REQUESTED, Maintenance,
    SEQUENCE_WINDOW, SessionConfig,
};
pub use link::{Link, LinkBuilder, LinkConfig, LinkEvent};
pub use outbound::{MAX_SEND_ATTEMPTS, OutboundEngine, OutboundStats};
pub use session::{PeerSession, SharedSession};
pub use socket::LinkSocket;
pub use timing::{RttEstimator, WindowEstimator, constants as timing_constants, monotonic_ms};
