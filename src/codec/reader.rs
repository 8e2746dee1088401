//! Big-endian reader over a received datagram.

use bytes::Buf;

use crate::core::CodecError;

/// Cursor over a byte slice that decodes wire primitives.
///
/// Every read checks the remaining length first, so a truncated datagram
/// yields [`CodecError::UnexpectedEof`] instead of a panic.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    len: usize,
}

impl<'a> WireReader<'a> {
    /// Create a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            len: buf.len(),
        }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.len - self.buf.len()
    }

    /// The unread tail, without consuming it.
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    fn ensure(&self, needed: usize) -> Result<(), CodecError> {
        if self.buf.len() < needed {
            return Err(CodecError::UnexpectedEof {
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }

    /// Skip `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        self.ensure(n)?;
        self.buf.advance(n);
        Ok(())
    }

    /// Read an unsigned byte.
    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a signed byte.
    pub fn get_i8(&mut self) -> Result<i8, CodecError> {
        self.ensure(1)?;
        Ok(self.buf.get_i8())
    }

    /// Read a boolean; any non-zero byte is `true`.
    pub fn get_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.get_u8()? != 0)
    }

    /// Read a signed short.
    pub fn get_i16(&mut self) -> Result<i16, CodecError> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    /// Read an unsigned short.
    pub fn get_u16(&mut self) -> Result<u16, CodecError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    /// Read a signed int.
    pub fn get_i32(&mut self) -> Result<i32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    /// Read an unsigned int.
    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    /// Read a signed long.
    pub fn get_i64(&mut self) -> Result<i64, CodecError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    /// Read an IEEE-754 single.
    pub fn get_f32(&mut self) -> Result<f32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_f32())
    }

    /// Read an IEEE-754 double.
    pub fn get_f64(&mut self) -> Result<f64, CodecError> {
        self.ensure(8)?;
        Ok(self.buf.get_f64())
    }

    /// Borrow the next `n` bytes.
    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.ensure(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Read a UTF-8 string prefixed by its u16 byte length.
    pub fn get_str(&mut self) -> Result<&'a str, CodecError> {
        let len = self.get_u16()? as usize;
        let raw = self.get_bytes(len)?;
        std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)
    }
}
