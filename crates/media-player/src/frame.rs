//! Per-chunk decode contract and the unit types tracks consume.

use std::sync::Arc;

use crate::error::DecodeError;
use crate::source::ChunkPayload;

/// One stereo sample-frame (`[left, right]`).
pub type StereoFrame = [f32; 2];

/// One decoded RGBA video frame.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

impl VideoFrame {
    /// An all-black opaque frame.
    pub fn blank(width: u32, height: u32) -> Self {
        let mut pixels = vec![0u8; (width as usize) * (height as usize) * 4];
        for px in pixels.chunks_exact_mut(4) {
            px[3] = 0xff;
        }
        Self {
            width,
            height,
            pixels: pixels.into(),
        }
    }
}

/// Result of one [`FrameDecoder::read_units`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkRead {
    /// Units appended to the output vector.
    pub units: usize,
    /// The decoder has no more units in this chunk.
    pub end_of_chunk: bool,
}

/// Decodes a single chunk into a sequence of units, advancing a read cursor.
pub trait FrameDecoder: Send {
    type Unit: Send + 'static;

    /// Append up to `max` units to `out`.
    fn read_units(&mut self, max: usize, out: &mut Vec<Self::Unit>)
    -> Result<ChunkRead, DecodeError>;

    /// Move the read cursor back to the first unit of the chunk.
    fn rewind(&mut self) -> Result<(), DecodeError>;
}

/// Builds a [`FrameDecoder`] over one fetched chunk.
pub trait DecoderFactory: Send + Sync {
    type Unit: Send + 'static;

    fn open(
        &self,
        index: usize,
        payload: ChunkPayload,
    ) -> Result<Box<dyn FrameDecoder<Unit = Self::Unit>>, DecodeError>;
}

/// Map one interleaved frame with `channels` channels onto stereo.
///
/// - mono: duplicated on both sides
/// - stereo: pass-through
/// - more channels: first two kept
pub fn to_stereo(frame: &[f32]) -> StereoFrame {
    match frame {
        [] => [0.0, 0.0],
        [m] => [*m, *m],
        [l, r, ..] => [*l, *r],
    }
}
