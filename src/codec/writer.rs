//! Big-endian writer for outgoing datagrams.

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::CodecError;

/// Growable buffer that encodes wire primitives.
#[derive(Debug, Clone, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Write an unsigned byte.
    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    /// Write a signed byte.
    pub fn put_i8(&mut self, v: i8) {
        self.buf.put_i8(v);
    }

    /// Write a boolean as one byte.
    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    /// Write a signed short.
    pub fn put_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    /// Write an unsigned short.
    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    /// Write a signed int.
    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    /// Write an unsigned int.
    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    /// Write a signed long.
    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    /// Write an IEEE-754 single.
    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32(v);
    }

    /// Write an IEEE-754 double.
    pub fn put_f64(&mut self, v: f64) {
        self.buf.put_f64(v);
    }

    /// Write raw bytes.
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.buf.put_slice(v);
    }

    /// Write a UTF-8 string prefixed by its u16 byte length.
    pub fn put_str(&mut self, v: &str) -> Result<(), CodecError> {
        let len = u16::try_from(v.len()).map_err(|_| CodecError::StringTooLong(v.len()))?;
        self.buf.put_u16(len);
        self.buf.put_slice(v.as_bytes());
        Ok(())
    }

    /// Finish writing and hand out an immutable buffer.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    /// Finish writing into a plain vector.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}
