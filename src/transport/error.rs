//! Transport layer error types.

use std::io;

use thiserror::Error;

use crate::core::{CodecError, PacketError};

/// Errors raised by the engines, sessions and links.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Malformed or unknown datagram.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// Socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The engine was closed or never connected to a peer.
    #[error("session inactive")]
    Inactive,

    /// Non-handshake datagram before the handshake completed.
    #[error("datagram before handshake")]
    NotConnected,

    /// Handshake carried the wrong pre-shared key.
    #[error("handshake key mismatch for role {role}")]
    KeyMismatch {
        /// Role code the peer declared.
        role: u8,
    },

    /// Handshake declared a role this endpoint does not serve.
    #[error("unknown role: {0}")]
    UnknownRole(u8),

    /// A datagram could not be sent after every retry.
    #[error("send failed after {attempts} attempts")]
    SendExhausted {
        /// Attempts made.
        attempts: usize,
    },
}

impl From<CodecError> for TransportError {
    fn from(err: CodecError) -> Self {
        TransportError::Packet(PacketError::Codec(err))
    }
}

impl TransportError {
    /// Protocol violations: the datagram is discarded and no state changed.
    pub fn is_silent_drop(&self) -> bool {
        matches!(
            self,
            TransportError::Packet(_)
                | TransportError::NotConnected
                | TransportError::KeyMismatch { .. }
                | TransportError::UnknownRole(_)
        )
    }

    /// Conditions that end the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Inactive)
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
