//! Offset-tagged media fragments.
//!
//! A frame larger than one datagram travels as several `VideoFrame` or
//! `KeyFrame` datagrams, each carrying the frame sequence, the fragment's
//! byte offset and, on the first fragment only, the total frame size.

use bytes::Bytes;

use crate::codec::WireReader;
use crate::core::CodecError;
use crate::core::constants::PACKET_LENGTH;
use crate::packet::{packet_writer, PacketKind};

/// Frame sequence plus offset.
const FRAGMENT_HEADER_SIZE: usize = 2 + 4;

/// Total size, first fragment only.
const TOTAL_SIZE_FIELD: usize = 4;

/// Parsed fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    /// Frame this fragment belongs to.
    pub frame_seq: u16,
    /// Byte offset inside the frame.
    pub offset: u32,
    /// Declared frame size; present on the first fragment only.
    pub total: Option<u32>,
    /// Fragment bytes.
    pub data: &'a [u8],
}

impl<'a> Fragment<'a> {
    /// Parse a fragment from a media datagram payload.
    pub fn parse(reader: &mut WireReader<'a>) -> Result<Self, CodecError> {
        let frame_seq = reader.get_u16()?;
        let offset = reader.get_u32()?;
        let total = if offset == 0 {
            Some(reader.get_u32()?)
        } else {
            None
        };
        let data = reader.get_bytes(reader.remaining())?;
        Ok(Self {
            frame_seq,
            offset,
            total,
            data,
        })
    }
}

/// Sender-side splitter numbering frames and cutting them into datagrams.
#[derive(Debug, Clone)]
pub struct Fragmenter {
    packet_length: usize,
    frame_seq: u16,
}

impl Default for Fragmenter {
    fn default() -> Self {
        Self::new(PACKET_LENGTH)
    }
}

impl Fragmenter {
    /// Create a fragmenter producing datagrams of at most `packet_length` bytes.
    pub fn new(packet_length: usize) -> Self {
        let min = 1 + FRAGMENT_HEADER_SIZE + TOTAL_SIZE_FIELD + 1;
        Self {
            packet_length: packet_length.max(min),
            frame_seq: 0,
        }
    }

    /// Sequence assigned to the most recent frame.
    pub fn last_frame_seq(&self) -> u16 {
        self.frame_seq
    }

    /// Split `frame` into ready-to-send datagrams.
    ///
    /// Fails only when the frame is larger than a u32 offset can address.
    pub fn split(&mut self, frame: &[u8], key_frame: bool) -> Result<Vec<Bytes>, CodecError> {
        let total =
            u32::try_from(frame.len()).map_err(|_| CodecError::FrameTooLarge(frame.len()))?;
        let kind = if key_frame {
            PacketKind::KeyFrame
        } else {
            PacketKind::VideoFrame
        };
        self.frame_seq = self.frame_seq.wrapping_add(1);

        let header = kind.header_len() + FRAGMENT_HEADER_SIZE;
        let mut datagrams = Vec::new();
        let mut offset = 0usize;
        loop {
            let mut w = packet_writer(kind);
            w.put_u16(self.frame_seq);
            w.put_u32(offset as u32);
            let mut room = self.packet_length - header;
            if offset == 0 {
                w.put_u32(total);
                room -= TOTAL_SIZE_FIELD;
            }
            let end = (offset + room).min(frame.len());
            w.put_bytes(&frame[offset..end]);
            datagrams.push(w.freeze());
            offset = end;
            if offset >= frame.len() {
                break;
            }
        }
        Ok(datagrams)
    }
}
