//! Reassembly of one fragmented frame.

use std::collections::BTreeMap;

/// Collects the fragments of one frame of known total size.
#[derive(Debug, Clone)]
pub struct FrameReassembler {
    total: usize,
    received: usize,
    key_frame: bool,
    start_received: bool,
    end_received: bool,
    complete: bool,
    fragments: BTreeMap<usize, Vec<u8>>,
}

impl FrameReassembler {
    /// Create a reassembler for a frame of `total` bytes.
    pub fn new(total: usize, key_frame: bool) -> Self {
        Self {
            total,
            received: 0,
            key_frame,
            start_received: false,
            end_received: false,
            complete: false,
            fragments: BTreeMap::new(),
        }
    }

    /// Store the fragment at `offset`.
    ///
    /// Returns `false` when the fragment was ignored: a repeat of an offset
    /// already held, or bytes running past the declared total.
    pub fn put_fragment(&mut self, offset: usize, bytes: &[u8]) -> bool {
        if self.fragments.contains_key(&offset) || offset + bytes.len() > self.total {
            return false;
        }
        self.received += bytes.len();
        if offset == 0 {
            self.start_received = true;
        }
        if offset + bytes.len() == self.total {
            self.end_received = true;
        }
        if self.received == self.total {
            self.complete = true;
        }
        self.fragments.insert(offset, bytes.to_vec());
        true
    }

    /// Declared frame size.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Whether this is a key frame.
    pub fn is_key_frame(&self) -> bool {
        self.key_frame
    }

    /// Whether the fragment at offset 0 arrived.
    pub fn is_start_received(&self) -> bool {
        self.start_received
    }

    /// Whether the fragment ending at the declared total arrived.
    pub fn is_end_received(&self) -> bool {
        self.end_received
    }

    /// Whether every byte arrived.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Complete, or first and last fragments present.
    pub fn is_usable(&self) -> bool {
        self.complete || (self.start_received && self.end_received)
    }

    /// Copy the fragments into one buffer; missing ranges stay zero.
    pub fn assemble(&self) -> Vec<u8> {
        let mut frame = vec![0u8; self.total];
        for (&offset, bytes) in &self.fragments {
            frame[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        frame
    }
}
