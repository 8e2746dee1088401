//! Error types for the wire codec and packet parsing.

use thiserror::Error;

/// Errors raised while reading or writing wire primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes remain than the read needs.
    #[error("unexpected end of data: needed {needed}, remaining {remaining}")]
    UnexpectedEof {
        /// Bytes the read needed.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// A length-prefixed string is not valid UTF-8.
    #[error("invalid utf-8 string")]
    InvalidUtf8,

    /// A string does not fit a u16 length prefix.
    #[error("string too long: {0} bytes")]
    StringTooLong(usize),

    /// A media frame is larger than a u32 offset can address.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
}

/// Errors raised while classifying a datagram.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Zero-length datagram.
    #[error("empty datagram")]
    Empty,

    /// The kind byte names no known packet kind.
    #[error("unknown packet kind: {0}")]
    UnknownKind(u8),

    /// A sequenced datagram is shorter than its header.
    #[error("truncated header: {len} bytes")]
    Truncated {
        /// Length of the datagram.
        len: usize,
    },

    /// The payload could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}
