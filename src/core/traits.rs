//! Seam between the reliability engines and the network.

use std::io;
use std::net::SocketAddr;

/// Destination for outgoing datagrams.
///
/// Engines call this while holding a session lock, so implementations must
/// never block: a socket that cannot take the datagram right now returns an
/// error and the engine decides whether to retry.
pub trait DatagramSink: Send + Sync {
    /// Send one datagram to `to`, returning the number of bytes written.
    fn send_datagram(&self, data: &[u8], to: SocketAddr) -> io::Result<usize>;
}
