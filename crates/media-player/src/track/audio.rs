//! Audio track: keeps the output sink topped up from the chunked decoder.
//!
//! Played time is `seek origin + frames the sink has consumed since it was last
//! cleared`. The sink counts consumption on its own, so the clock never steps
//! back while a tick is between reading and writing, and pausing the sink
//! freezes it exactly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::{Tick, Track, TrackEngine, TrackKind, TrackMonitor};
use crate::chunked::{ChunkedStreamDecoder, ReadState, Whence};
use crate::config::AudioTrackConfig;
use crate::error::PlaybackError;
use crate::frame::{DecoderFactory, StereoFrame};
use crate::sink::AudioSink;
use crate::source::{ChunkList, ChunkSource};

/// Chunk layout of one audio stream.
#[derive(Clone, Debug)]
pub struct AudioStream {
    pub chunks: ChunkList,
    pub sample_rate: u32,
    /// Nominal length of every chunk but possibly the last.
    pub chunk_duration: Duration,
    pub duration: Duration,
}

pub type AudioTrack = Track<AudioEngine>;

impl Track<AudioEngine> {
    pub fn open(
        stream: AudioStream,
        source: Arc<dyn ChunkSource>,
        factory: Arc<dyn DecoderFactory<Unit = StereoFrame>>,
        sink: Arc<dyn AudioSink>,
        cfg: &AudioTrackConfig,
    ) -> Result<Self, PlaybackError> {
        if stream.sample_rate == 0 || stream.chunk_duration.is_zero() {
            return Err(PlaybackError::Config(format!(
                "audio stream needs a sample rate and chunk duration (got {} Hz, {:?})",
                stream.sample_rate, stream.chunk_duration
            )));
        }
        let rate = stream.sample_rate;
        let chunk_units = units_for(stream.chunk_duration, rate as f64);
        let decoder =
            ChunkedStreamDecoder::new(stream.chunks, source, factory, chunk_units, &cfg.prefetch)?;
        let monitor = Arc::new(AudioMonitor {
            origin: AtomicU64::new(0),
            interrupt: decoder.interrupt_handle(),
            sink: sink.clone(),
            rate_hz: rate,
        });
        tracing::info!(
            rate_hz = rate,
            chunks = decoder.chunk_count(),
            duration_ms = stream.duration.as_millis() as u64,
            "audio track opened"
        );
        Ok(Track::from_engine(AudioEngine {
            decoder,
            sink,
            monitor,
            rate_hz: rate,
            duration: stream.duration,
            tick: cfg.tick(),
            target_buffer: cfg.output_buffer_units(rate),
            max_read: cfg.max_read_units.max(1),
            scratch: Vec::new(),
            eof: false,
        }))
    }
}

pub struct AudioEngine {
    decoder: ChunkedStreamDecoder<StereoFrame>,
    sink: Arc<dyn AudioSink>,
    monitor: Arc<AudioMonitor>,
    rate_hz: u32,
    duration: Duration,
    tick: Duration,
    target_buffer: usize,
    max_read: usize,
    scratch: Vec<StereoFrame>,
    eof: bool,
}

impl TrackEngine for AudioEngine {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn monitor(&self) -> Arc<dyn TrackMonitor> {
        self.monitor.clone()
    }

    fn period(&self) -> Duration {
        self.tick
    }

    fn duration(&self) -> Duration {
        self.duration
    }

    fn tick(&mut self) -> Result<Tick, PlaybackError> {
        let buffered = self.sink.buffered_frames();
        if self.eof {
            return Ok(if buffered == 0 { Tick::End } else { Tick::Continue });
        }
        if buffered >= self.target_buffer {
            return Ok(Tick::Continue);
        }

        let want = (self.target_buffer - buffered).min(self.max_read);
        self.scratch.clear();
        let status = self.decoder.read(want, &mut self.scratch)?;
        if !self.scratch.is_empty() && !self.sink.write(&self.scratch) {
            return Err(PlaybackError::Output("audio output stopped accepting frames".into()));
        }
        if status.state == ReadState::Ended {
            tracing::debug!(position = self.decoder.position(), "audio decoder drained");
            self.eof = true;
        }
        Ok(Tick::Continue)
    }

    fn seek(&mut self, target: Duration) -> Result<(), PlaybackError> {
        let target_units = units_for(target, self.rate_hz as f64);
        let per_chunk = self.decoder.units_per_chunk();
        let last = self.decoder.chunk_count().saturating_sub(1) as u64;
        let chunk = (target_units / per_chunk).min(last);
        self.decoder.seek(chunk as i64, Whence::Start)?;
        self.decoder.skip(target_units - chunk * per_chunk);
        self.sink.clear();
        self.monitor.origin.store(target_units, Ordering::Relaxed);
        self.eof = false;
        Ok(())
    }

    fn clear_output(&mut self) {
        self.sink.clear();
    }

    fn release(&mut self) -> Result<(), PlaybackError> {
        self.decoder.close();
        self.sink.close();
        Ok(())
    }
}

struct AudioMonitor {
    /// Stream position, in frames, the sink's consumed count starts from.
    origin: AtomicU64,
    interrupt: Arc<AtomicBool>,
    sink: Arc<dyn AudioSink>,
    rate_hz: u32,
}

impl TrackMonitor for AudioMonitor {
    fn played_time(&self) -> Duration {
        let played = self.origin.load(Ordering::Relaxed) + self.sink.consumed_frames();
        units_to_duration(played, self.rate_hz as f64)
    }

    fn suspend_output(&self) {
        self.sink.set_paused(true);
    }

    fn resume_output(&self) {
        self.sink.set_paused(false);
    }

    fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
    }

    fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::Relaxed);
    }
}

pub(super) fn units_for(d: Duration, rate: f64) -> u64 {
    (d.as_nanos() as f64 * rate / 1e9).round() as u64
}

pub(super) fn units_to_duration(units: u64, rate: f64) -> Duration {
    Duration::from_nanos((units as f64 * 1e9 / rate).round() as u64)
}
