//! Wire codec.
//!
//! Fixed big-endian encoding for the primitives every datagram is built from:
//! bytes, shorts, ints, longs, IEEE-754 floats and doubles, one-byte booleans
//! and UTF-8 strings with a 2-byte length prefix.

mod reader;
mod writer;

pub use reader::WireReader;
pub use writer::WireWriter;
