//! Output capabilities the tracks render into.
//!
//! Sinks are fire-and-forget: the only feedback into playback is the boolean
//! "still accepting output" returned by each write, used to detect a device stop.
//! All methods take `&self`; sinks are shared between a track's tick loop and
//! its lock-free clock reader.

use std::sync::Mutex;
use std::time::Instant;

use crate::frame::{StereoFrame, VideoFrame};
use crate::queue::lock;
use crate::status::format_clock;

/// Hardware (or simulated) audio output.
pub trait AudioSink: Send + Sync {
    /// Queue frames for playback. Returns `false` once the output stopped.
    fn write(&self, frames: &[StereoFrame]) -> bool;
    /// Frames accepted by `write` that have not been played yet, at the track rate.
    fn buffered_frames(&self) -> usize;
    /// Frames played since the last `clear`, at the track rate. Never decreases
    /// between two clears.
    fn consumed_frames(&self) -> u64;
    /// While paused the output plays silence and keeps its queue.
    fn set_paused(&self, paused: bool);
    /// Drop every queued frame.
    fn clear(&self);
    fn close(&self);
}

/// Display surface for decoded video frames.
pub trait FrameSink: Send + Sync {
    fn present(&self, frame: &VideoFrame) -> bool;
    /// Reset the surface to a blank frame.
    fn clear(&self);
}

/// Progress label/slider.
pub trait ProgressSink: Send + Sync {
    fn update(&self, elapsed_secs: u64, total_secs: u64) -> bool;
    fn clear(&self);
}

/// Audio sink without a device: drains at real-time rate while unpaused.
pub struct NullAudioSink {
    rate_hz: u32,
    state: Mutex<NullState>,
}

struct NullState {
    queued: f64,
    /// Frames written since the last clear.
    written: u64,
    paused: bool,
    closed: bool,
    last: Instant,
}

impl NullAudioSink {
    pub fn new(rate_hz: u32) -> Self {
        Self {
            rate_hz: rate_hz.max(1),
            state: Mutex::new(NullState {
                queued: 0.0,
                written: 0,
                paused: false,
                closed: false,
                last: Instant::now(),
            }),
        }
    }

    fn advance(&self, st: &mut NullState) {
        let now = Instant::now();
        if !st.paused {
            let drained = now.duration_since(st.last).as_secs_f64() * self.rate_hz as f64;
            st.queued -= drained.min(st.queued);
        }
        st.last = now;
    }
}

impl AudioSink for NullAudioSink {
    fn write(&self, frames: &[StereoFrame]) -> bool {
        let mut g = lock(&self.state);
        if g.closed {
            return false;
        }
        self.advance(&mut g);
        g.queued += frames.len() as f64;
        g.written += frames.len() as u64;
        true
    }

    fn buffered_frames(&self) -> usize {
        let mut g = lock(&self.state);
        self.advance(&mut g);
        g.queued.ceil() as usize
    }

    fn consumed_frames(&self) -> u64 {
        let mut g = lock(&self.state);
        self.advance(&mut g);
        g.written - g.queued.ceil() as u64
    }

    fn set_paused(&self, paused: bool) {
        let mut g = lock(&self.state);
        self.advance(&mut g);
        g.paused = paused;
    }

    fn clear(&self) {
        let mut g = lock(&self.state);
        self.advance(&mut g);
        g.queued = 0.0;
        g.written = 0;
    }

    fn close(&self) {
        let mut g = lock(&self.state);
        g.closed = true;
        g.queued = 0.0;
    }
}

/// Progress sink that logs a `mm:ss / mm:ss` label on every update.
#[derive(Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn update(&self, elapsed_secs: u64, total_secs: u64) -> bool {
        tracing::info!(
            "progress {} / {}",
            format_clock(elapsed_secs),
            format_clock(total_secs)
        );
        true
    }

    fn clear(&self) {
        tracing::debug!("progress cleared");
    }
}
