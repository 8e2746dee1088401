//! Core constants, error types and traits (always included).

pub mod constants;
mod error;
mod traits;

pub use error::{CodecError, PacketError};
pub use traits::DatagramSink;
