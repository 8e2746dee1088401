//! Media fragmentation and frame reassembly.
//!
//! Video frames larger than one datagram are split by [`Fragmenter`] and put
//! back together on the receiving side by [`FrameAssembler`], which also
//! decides when a partially received frame is still worth decoding.

mod assembler;
mod fragment;
mod reassembler;

pub use assembler::{AssembledFrame, FrameAssembler, FrameStats};
pub use fragment::{Fragment, Fragmenter};
pub use reassembler::FrameReassembler;
