//! Async UDP socket wrapper.
//!
//! Receiving goes through [`LinkSocket`] and its reusable buffer; sending is
//! done by the engines through [`DatagramSink`], implemented for tokio's
//! `UdpSocket` with a non-blocking `try_send_to` so it can run under a
//! session lock.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::core::DatagramSink;
use crate::core::constants::RECV_BUFFER_SIZE;

impl DatagramSink for UdpSocket {
    fn send_datagram(&self, data: &[u8], to: SocketAddr) -> io::Result<usize> {
        self.try_send_to(data, to)
    }
}

/// UDP socket with a receive buffer, shared with the engines as their sink.
#[derive(Debug)]
pub struct LinkSocket {
    socket: Arc<UdpSocket>,
    recv_buffer: Vec<u8>,
}

impl LinkSocket {
    /// Bind to `addr` with a buffer for the largest UDP payload.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            recv_buffer: vec![0u8; RECV_BUFFER_SIZE],
        })
    }

    /// Local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Wait for a datagram.
    pub async fn recv_from(&mut self) -> io::Result<(&[u8], SocketAddr)> {
        let (len, addr) = self.socket.recv_from(&mut self.recv_buffer).await?;
        Ok((&self.recv_buffer[..len], addr))
    }

    /// The socket as an engine sink.
    pub fn sink(&self) -> Arc<dyn DatagramSink> {
        self.socket.clone()
    }
}
