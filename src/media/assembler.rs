//! Per-stream frame table: feeds fragments to their reassemblers, decides
//! when a frame is usable and evicts frames that will never finish.

use std::collections::HashMap;

use super::fragment::Fragment;
use super::reassembler::FrameReassembler;
use crate::core::PacketError;
use crate::core::constants::{FRAME_WINDOW, MAX_FRAME_SIZE};
use crate::packet::{Envelope, PacketKind};

/// Loss weight of an incomplete key frame.
const KEY_FRAME_LOSS: u64 = 5;

/// A frame ready for the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFrame {
    /// Frame sequence.
    pub frame_seq: u16,
    /// Whether the frame is a key frame.
    pub key_frame: bool,
    /// Whether every byte arrived; `false` means zero-filled gaps.
    pub complete: bool,
    /// Frame bytes.
    pub data: Vec<u8>,
}

/// Delivery and loss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames handed to the caller.
    pub delivered: u64,
    /// Frames finished with gaps.
    pub incomplete: u64,
    /// Weighted loss events (incomplete key frames weigh 5).
    pub lost: u64,
    /// Unfinished frames dropped by eviction.
    pub evicted: u64,
}

/// Reassembles a stream of `VideoFrame`/`KeyFrame` datagrams.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    frames: HashMap<u16, FrameReassembler>,
    stats: FrameStats,
}

impl FrameAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters so far.
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Frames currently waiting for fragments.
    pub fn pending(&self) -> usize {
        self.frames.len()
    }

    /// Feed a media envelope; other kinds are ignored.
    pub fn push(&mut self, envelope: &Envelope) -> Result<Option<AssembledFrame>, PacketError> {
        let key_frame = match envelope.kind() {
            PacketKind::KeyFrame => true,
            PacketKind::VideoFrame => false,
            _ => return Ok(None),
        };
        let mut reader = envelope.reader();
        let fragment = Fragment::parse(&mut reader)?;
        Ok(self.push_fragment(fragment, key_frame))
    }

    /// Feed one parsed fragment.
    pub fn push_fragment(&mut self, fragment: Fragment<'_>, key_frame: bool) -> Option<AssembledFrame> {
        let seq = fragment.frame_seq;

        if let Some(total) = fragment.total {
            if total as usize > MAX_FRAME_SIZE {
                log::debug!("frame {} declares {} bytes, dropped", seq, total);
                return None;
            }
            if fragment.data.len() == total as usize {
                self.stats.delivered += 1;
                return Some(AssembledFrame {
                    frame_seq: seq,
                    key_frame,
                    complete: true,
                    data: fragment.data.to_vec(),
                });
            }
            self.frames
                .entry(seq)
                .or_insert_with(|| FrameReassembler::new(total as usize, key_frame));
        }

        // Fragments of a frame whose first fragment never arrived are dropped
        let frame = self.frames.get_mut(&seq)?;
        frame.put_fragment(fragment.offset as usize, fragment.data);
        if !frame.is_usable() {
            return None;
        }

        let complete = frame.is_complete();
        let frame_key = frame.is_key_frame();
        let result = if complete || !frame_key {
            self.stats.delivered += 1;
            Some(AssembledFrame {
                frame_seq: seq,
                key_frame: frame_key,
                complete,
                data: frame.assemble(),
            })
        } else {
            None
        };
        if !complete {
            self.stats.incomplete += 1;
            self.stats.lost += if frame_key { KEY_FRAME_LOSS } else { 1 };
            log::debug!("frame {} finished with gaps (key: {})", seq, frame_key);
        }

        self.evict(seq, key_frame);
        result
    }

    /// Drop the finished frame plus every frame at or behind it, or implausibly
    /// far ahead. Pending key frames survive unless a key frame finished.
    fn evict(&mut self, finished: u16, key_frame: bool) {
        let stale: Vec<u16> = self
            .frames
            .iter()
            .filter(|(k, f)| {
                let ahead = k.wrapping_sub(finished);
                (ahead == 0 || ahead > FRAME_WINDOW) && (key_frame || !f.is_key_frame())
            })
            .map(|(k, _)| *k)
            .collect();

        for k in stale {
            self.frames.remove(&k);
            if k != finished {
                self.stats.evicted += 1;
                self.stats.lost += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Fragmenter;
    use bytes::Bytes;
    use std::time::Instant;

    fn envelope(data: Bytes) -> Envelope {
        Envelope::parse(data, "127.0.0.1:1".parse().unwrap(), Instant::now()).unwrap()
    }

    fn frag(frame_seq: u16, offset: u32, total: Option<u32>, data: &[u8]) -> Fragment<'_> {
        Fragment {
            frame_seq,
            offset,
            total,
            data,
        }
    }

    #[test]
    fn test_fragmenter_output_reassembles() {
        let frame: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let mut fragmenter = Fragmenter::new(1100);
        let mut assembler = FrameAssembler::new();

        let datagrams = fragmenter.split(&frame, true).unwrap();
        assert!(datagrams.len() > 1);

        let mut out = None;
        for d in datagrams {
            if let Some(f) = assembler.push(&envelope(d)).unwrap() {
                out = Some(f);
            }
        }
        let out = out.unwrap();
        assert!(out.complete);
        assert!(out.key_frame);
        assert_eq!(out.data, frame);
        assert_eq!(assembler.pending(), 0);
        assert_eq!(assembler.stats().delivered, 1);
    }

    #[test]
    fn test_single_datagram_frame_delivered_directly() {
        let mut assembler = FrameAssembler::new();
        let out = assembler.push_fragment(frag(3, 0, Some(2), &[9, 9]), false).unwrap();
        assert_eq!(out.data, vec![9, 9]);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_fragment_before_first_is_dropped() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push_fragment(frag(1, 4, None, &[1; 4]), false).is_none());
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_oversized_frame_is_dropped() {
        let mut assembler = FrameAssembler::new();
        assert!(
            assembler
                .push_fragment(frag(1, 0, Some(u32::MAX), &[1; 4]), true)
                .is_none()
        );
        assert!(assembler.push_fragment(frag(1, 4, None, &[2; 4]), true).is_none());
        assert_eq!(assembler.pending(), 0);
        assert_eq!(assembler.stats(), FrameStats::default());
    }

    #[test]
    fn test_incomplete_delta_frame_delivered_with_loss() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push_fragment(frag(1, 0, Some(12), &[1; 4]), false).is_none());
        let out = assembler.push_fragment(frag(1, 8, None, &[3; 4]), false).unwrap();

        assert!(!out.complete);
        assert_eq!(out.data, [[1u8; 4], [0; 4], [3; 4]].concat());
        assert_eq!(assembler.stats().incomplete, 1);
        assert_eq!(assembler.stats().lost, 1);
    }

    #[test]
    fn test_incomplete_key_frame_is_a_loss() {
        let mut assembler = FrameAssembler::new();
        assembler.push_fragment(frag(1, 0, Some(12), &[1; 4]), true);
        let out = assembler.push_fragment(frag(1, 8, None, &[3; 4]), true);

        assert!(out.is_none());
        assert_eq!(assembler.stats().lost, KEY_FRAME_LOSS);
        assert_eq!(assembler.stats().delivered, 0);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_finished_frame_evicts_older_frames() {
        let mut assembler = FrameAssembler::new();
        // Frame 1 stalls, frame 2 completes
        assembler.push_fragment(frag(1, 0, Some(8), &[1; 4]), false);
        assembler.push_fragment(frag(2, 0, Some(8), &[2; 4]), false);
        let out = assembler.push_fragment(frag(2, 4, None, &[2; 4]), false).unwrap();

        assert!(out.complete);
        assert_eq!(assembler.pending(), 0);
        assert_eq!(assembler.stats().evicted, 1);
        assert_eq!(assembler.stats().lost, 1);
    }

    #[test]
    fn test_delta_frame_does_not_evict_pending_key_frame() {
        let mut assembler = FrameAssembler::new();
        assembler.push_fragment(frag(1, 0, Some(8), &[1; 4]), true);
        assembler.push_fragment(frag(2, 0, Some(8), &[2; 4]), false);
        assembler.push_fragment(frag(2, 4, None, &[2; 4]), false).unwrap();

        assert_eq!(assembler.pending(), 1);
        // The key frame can still finish
        let out = assembler.push_fragment(frag(1, 4, None, &[1; 4]), true).unwrap();
        assert!(out.key_frame && out.complete);
    }

    #[test]
    fn test_newer_frames_survive_eviction_across_wrap() {
        let mut assembler = FrameAssembler::new();
        assembler.push_fragment(frag(2, 0, Some(8), &[2; 4]), false);
        assembler.push_fragment(frag(u16::MAX, 0, Some(8), &[7; 4]), false);
        assembler.push_fragment(frag(u16::MAX, 4, None, &[7; 4]), false).unwrap();

        // Frame 2 is three ahead of 65535 in circular order
        assert_eq!(assembler.pending(), 1);
        assert_eq!(assembler.stats().evicted, 0);
    }

    #[test]
    fn test_non_media_envelope_ignored() {
        let mut assembler = FrameAssembler::new();
        let env = envelope(Bytes::from_static(&[19, 1, 2]));
        assert_eq!(assembler.push(&env).unwrap(), None);
    }
}
