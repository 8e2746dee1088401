//! Relay error types.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::core::constants::{MAX_KEY_CHARS, MAX_VIEWERS, MIN_PORT};

/// Invalid or unreadable relay configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key longer than the handshake allows.
    #[error("key has {chars} characters, at most {max} allowed", max = MAX_KEY_CHARS)]
    KeyTooLong {
        /// Characters in the rejected key.
        chars: usize,
    },

    /// Viewer count outside `0..=MAX_VIEWERS`.
    #[error("{0} viewers requested, values from 0 to {max} are allowed", max = MAX_VIEWERS)]
    ViewersOutOfRange(usize),

    /// Port below the unprivileged range.
    #[error("port {0} rejected, values from {min} to 65535 are allowed", min = MIN_PORT)]
    PortOutOfRange(u16),

    /// Reading or writing the file failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file is not valid TOML for this configuration.
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be serialized.
    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Relay server failure.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The listening socket could not be bound.
    #[error("bind to {addr} failed: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        source: io::Error,
    },

    /// I/O error on the bound socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration rejected.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
