//! Video chunk decoding for pre-scaled raw RGBA frame chunks.
//!
//! A chunk payload is a plain concatenation of `width * height * 4` byte frames.
//! Frames are read lazily so spooled chunks never have to be loaded whole.

use std::io::{self, Read, Seek, SeekFrom};

use crate::error::DecodeError;
use crate::frame::{ChunkRead, DecoderFactory, FrameDecoder, VideoFrame};
use crate::source::ChunkPayload;

/// Opens a [`RawFrameDecoder`] for each video chunk of a track.
#[derive(Clone, Copy, Debug)]
pub struct RawFrameFactory {
    pub width: u32,
    pub height: u32,
}

impl RawFrameFactory {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl DecoderFactory for RawFrameFactory {
    type Unit = VideoFrame;

    fn open(
        &self,
        index: usize,
        payload: ChunkPayload,
    ) -> Result<Box<dyn FrameDecoder<Unit = VideoFrame>>, DecodeError> {
        let dec = RawFrameDecoder::new(payload, self.width, self.height)?;
        tracing::debug!(chunk = index, frames = dec.frame_count, "video chunk opened");
        Ok(Box::new(dec))
    }
}

pub struct RawFrameDecoder {
    payload: ChunkPayload,
    width: u32,
    height: u32,
    frame_len: usize,
    frame_count: u64,
    next_frame: u64,
}

impl RawFrameDecoder {
    pub fn new(payload: ChunkPayload, width: u32, height: u32) -> Result<Self, DecodeError> {
        let frame_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(4))
            .filter(|len| *len > 0)
            .ok_or_else(|| DecodeError::Unsupported(format!("frame size {width}x{height}")))?;
        let len = payload.len();
        if len % frame_len as u64 != 0 {
            return Err(DecodeError::Malformed(format!(
                "{len} bytes is not a whole number of {width}x{height} frames"
            )));
        }
        Ok(Self {
            payload,
            width,
            height,
            frame_len,
            frame_count: len / frame_len as u64,
            next_frame: 0,
        })
    }
}

impl FrameDecoder for RawFrameDecoder {
    type Unit = VideoFrame;

    fn read_units(&mut self, max: usize, out: &mut Vec<VideoFrame>) -> Result<ChunkRead, DecodeError> {
        let mut units = 0usize;
        while units < max && self.next_frame < self.frame_count {
            let mut pixels = vec![0u8; self.frame_len];
            self.payload.read_exact(&mut pixels).map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => {
                    DecodeError::Malformed(format!("frame {} truncated", self.next_frame))
                }
                _ => DecodeError::Io(e),
            })?;
            out.push(VideoFrame {
                width: self.width,
                height: self.height,
                pixels: pixels.into(),
            });
            self.next_frame += 1;
            units += 1;
        }
        Ok(ChunkRead {
            units,
            end_of_chunk: self.next_frame >= self.frame_count,
        })
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.payload.seek(SeekFrom::Start(0))?;
        self.next_frame = 0;
        Ok(())
    }
}
