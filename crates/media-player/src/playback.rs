//! CPAL-backed [`AudioSink`].
//!
//! The output stream lives on its own thread (streams are not `Send` on every
//! host). The real-time callback:
//! - drains the shared frame queue under a short lock, never waiting on a condition variable
//! - outputs silence while paused, without draining
//! - maps stereo onto the device channel layout and converts to the device format
//!
//! A stream error flips `stopped`, which [`AudioSink::write`] reports as "no longer
//! accepting output".

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, bounded};

use crate::device::{OutputSelection, select_output};
use crate::frame::StereoFrame;
use crate::queue::lock;
use crate::resample::StreamResampler;
use crate::sink::AudioSink;

/// Input chunk used when the device rate differs from the track rate.
const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Frames handed to the device, shared with the output callback.
///
/// Bounded by the writer: the track only tops it up to its output target.
struct OutputQueue {
    frames: Mutex<VecDeque<StereoFrame>>,
    paused: AtomicBool,
    stopped: AtomicBool,
    /// Device frames played since the last clear; only touched under the `frames` lock.
    played_frames: AtomicU64,
    underrun_events: AtomicU64,
}

pub struct CpalAudioSink {
    queue: Arc<OutputQueue>,
    resampler: Option<Mutex<StreamResampler>>,
    device_name: String,
    device_rate: u32,
    stop_tx: Mutex<Option<crossbeam_channel::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CpalAudioSink {
    /// Open the device matching `needle` (or the default) for a track at `track_rate`.
    pub fn open(needle: Option<&str>, track_rate: u32) -> Result<Self> {
        let queue = Arc::new(OutputQueue {
            frames: Mutex::new(VecDeque::new()),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            played_frames: AtomicU64::new(0),
            underrun_events: AtomicU64::new(0),
        });

        let (ready_tx, ready_rx) = bounded::<Result<(String, u32)>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let needle = needle.map(str::to_string);
        let cb_queue = queue.clone();
        let thread = std::thread::spawn(move || {
            let host = cpal::default_host();
            let started = select_output(&host, needle.as_deref(), track_rate)
                .and_then(|sel| start_stream(&sel, cb_queue).map(|stream| (sel, stream)));
            match started {
                Ok((sel, stream)) => {
                    let _ = ready_tx.send(Ok((sel.name, sel.config.sample_rate)));
                    park_until_stopped(&stop_rx);
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        let (device_name, device_rate) = ready_rx
            .recv()
            .map_err(|_| anyhow!("audio output thread exited during setup"))??;

        let resampler = if device_rate != track_rate {
            tracing::info!(from_hz = track_rate, to_hz = device_rate, "resampling enabled");
            Some(Mutex::new(StreamResampler::new(
                track_rate,
                device_rate,
                RESAMPLE_CHUNK_FRAMES,
            )?))
        } else {
            None
        };

        Ok(Self {
            queue,
            resampler,
            device_name,
            device_rate,
            stop_tx: Mutex::new(Some(stop_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Callback invocations that ran out of queued audio.
    pub fn underrun_events(&self) -> u64 {
        self.queue.underrun_events.load(Ordering::Relaxed)
    }
}

impl AudioSink for CpalAudioSink {
    fn write(&self, frames: &[StereoFrame]) -> bool {
        if self.queue.stopped.load(Ordering::Relaxed) {
            return false;
        }
        match &self.resampler {
            None => lock(&self.queue.frames).extend(frames.iter().copied()),
            Some(rs) => {
                let mut converted = Vec::with_capacity(frames.len() * 2);
                if let Err(e) = lock(rs).process(frames, &mut converted) {
                    tracing::error!("{e:#}");
                    self.queue.stopped.store(true, Ordering::Relaxed);
                    return false;
                }
                lock(&self.queue.frames).extend(converted);
            }
        }
        true
    }

    fn buffered_frames(&self) -> usize {
        let queued = lock(&self.queue.frames).len();
        match &self.resampler {
            None => queued,
            Some(rs) => {
                let rs = lock(rs);
                (queued as f64 / rs.ratio()).round() as usize + rs.pending_frames()
            }
        }
    }

    fn consumed_frames(&self) -> u64 {
        let played = self.queue.played_frames.load(Ordering::Relaxed);
        match &self.resampler {
            None => played,
            Some(rs) => (played as f64 / lock(rs).ratio()).floor() as u64,
        }
    }

    fn set_paused(&self, paused: bool) {
        self.queue.paused.store(paused, Ordering::Relaxed);
    }

    fn clear(&self) {
        let mut frames = lock(&self.queue.frames);
        frames.clear();
        self.queue.played_frames.store(0, Ordering::Relaxed);
        drop(frames);
        if let Some(rs) = &self.resampler {
            if let Err(e) = lock(rs).reset() {
                tracing::warn!("resampler reset failed: {e:#}");
            }
        }
    }

    fn close(&self) {
        self.queue.stopped.store(true, Ordering::Relaxed);
        lock(&self.queue.frames).clear();
        drop(lock(&self.stop_tx).take());
        if let Some(handle) = lock(&self.thread).take() {
            if handle.join().is_err() {
                tracing::warn!("audio output thread panicked");
            }
        }
        tracing::debug!(device = %self.device_name, "audio output closed");
    }
}

impl Drop for CpalAudioSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn park_until_stopped(stop_rx: &Receiver<()>) {
    // Either an explicit stop or the sender being dropped ends the wait.
    let _ = stop_rx.recv();
}

fn start_stream(sel: &OutputSelection, queue: Arc<OutputQueue>) -> Result<cpal::Stream> {
    let stream = match sel.sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(sel, queue),
        cpal::SampleFormat::I16 => build_stream::<i16>(sel, queue),
        cpal::SampleFormat::I32 => build_stream::<i32>(sel, queue),
        cpal::SampleFormat::U16 => build_stream::<u16>(sel, queue),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }?;
    stream.play().context("start output stream")?;
    Ok(stream)
}

fn build_stream<T>(sel: &OutputSelection, queue: Arc<OutputQueue>) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = (sel.config.channels as usize).max(1);
    let err_queue = queue.clone();
    let err_fn = move |err: cpal::StreamError| {
        tracing::warn!("stream error: {err}");
        err_queue.stopped.store(true, Ordering::Relaxed);
    };

    let stream = sel.device.build_output_stream(
        &sel.config,
        move |data: &mut [T], _| {
            let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
            if queue.paused.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }

            let mut frames = lock(&queue.frames);
            let mut filled = 0u64;
            for out in data.chunks_exact_mut(channels_out) {
                let Some(frame) = frames.pop_front() else {
                    queue.underrun_events.fetch_add(1, Ordering::Relaxed);
                    break;
                };
                for (ch, sample) in out.iter_mut().enumerate() {
                    let value = map_channel(frame, channels_out, ch);
                    *sample = <T as cpal::Sample>::from_sample::<f32>(value);
                }
                filled += 1;
            }
            queue.played_frames.fetch_add(filled, Ordering::Relaxed);
            drop(frames);

            let written = filled as usize * channels_out;
            data[written..].fill(silence);
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Stereo onto `dst_channels`: mono averages, extra channels stay silent.
fn map_channel(frame: StereoFrame, dst_channels: usize, ch: usize) -> f32 {
    match (dst_channels, ch) {
        (1, _) => 0.5 * (frame[0] + frame[1]),
        (_, 0) => frame[0],
        (_, 1) => frame[1],
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_channel_handles_layouts() {
        assert_eq!(map_channel([0.25, 0.75], 1, 0), 0.5);
        assert_eq!(map_channel([0.2, 0.4], 2, 0), 0.2);
        assert_eq!(map_channel([0.2, 0.4], 2, 1), 0.4);
        assert_eq!(map_channel([0.2, 0.4], 6, 4), 0.0);
    }
}
