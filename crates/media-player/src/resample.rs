//! Track-rate to device-rate conversion for [`crate::playback::CpalAudioSink`].
//!
//! Wraps Rubato's async sinc resampler with a fixed input chunk. Frames that do
//! not fill a whole chunk wait in `pending` until the next write.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::frame::StereoFrame;

const CHANNELS: usize = 2;

pub struct StreamResampler {
    resampler: Box<dyn Resampler<f32> + Send>,
    src_rate: u32,
    dst_rate: u32,
    chunk_frames: usize,
    pending: Vec<f32>,
    out: Vec<f32>,
}

impl StreamResampler {
    pub fn new(src_rate: u32, dst_rate: u32, chunk_frames: usize) -> Result<Self> {
        if src_rate == 0 || dst_rate == 0 {
            return Err(anyhow!("invalid resample rates {src_rate} -> {dst_rate}"));
        }
        let chunk_frames = chunk_frames.max(1);
        let resampler = build(src_rate, dst_rate, chunk_frames)?;
        let ratio = dst_rate as f64 / src_rate as f64;
        let out_frames = (chunk_frames as f64 * ratio * 1.1).ceil() as usize + 16;
        Ok(Self {
            resampler,
            src_rate,
            dst_rate,
            chunk_frames,
            pending: Vec::with_capacity(chunk_frames * CHANNELS),
            out: vec![0.0; out_frames * CHANNELS],
        })
    }

    /// Output frames per input frame.
    pub fn ratio(&self) -> f64 {
        self.dst_rate as f64 / self.src_rate as f64
    }

    /// Input frames accepted but not yet converted.
    pub fn pending_frames(&self) -> usize {
        self.pending.len() / CHANNELS
    }

    /// Convert `frames` and append every completed output frame to `dst`.
    pub fn process(&mut self, frames: &[StereoFrame], dst: &mut Vec<StereoFrame>) -> Result<()> {
        self.pending.extend(frames.iter().flatten());
        let chunk_samples = self.chunk_frames * CHANNELS;
        let mut consumed = 0usize;

        while self.pending.len() - consumed >= chunk_samples {
            let input = &self.pending[consumed..consumed + chunk_samples];
            let input_adapter = InterleavedSlice::new(input, CHANNELS, self.chunk_frames)
                .map_err(|e| anyhow!("interleaved slice (input) error: {e}"))?;
            let out_frames = self.out.len() / CHANNELS;
            let mut output_adapter = InterleavedSlice::new_mut(&mut self.out, CHANNELS, out_frames)
                .map_err(|e| anyhow!("interleaved slice (output) error: {e}"))?;

            let indexing = Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            };
            let (_nbr_in, nbr_out) = self
                .resampler
                .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
                .map_err(|e| anyhow!("resampler process error: {e}"))?;

            dst.extend(
                self.out[..nbr_out * CHANNELS]
                    .chunks_exact(CHANNELS)
                    .map(|s| [s[0], s[1]]),
            );
            consumed += chunk_samples;
        }
        self.pending.drain(..consumed);
        Ok(())
    }

    /// Drop pending input and the filter history.
    pub fn reset(&mut self) -> Result<()> {
        self.pending.clear();
        self.resampler = build(self.src_rate, self.dst_rate, self.chunk_frames)?;
        Ok(())
    }
}

fn build(src_rate: u32, dst_rate: u32, chunk_frames: usize) -> Result<Box<dyn Resampler<f32> + Send>> {
    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };
    let r = Async::<f32>::new_sinc(
        dst_rate as f64 / src_rate as f64,
        1.1,
        &params,
        chunk_frames,
        CHANNELS,
        FixedAsync::Input,
    )
    .map_err(|e| anyhow!("resampler init error: {e}"))?;
    Ok(Box::new(r))
}
