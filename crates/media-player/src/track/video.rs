//! Video track: presents one decoded frame per tick at the stream frame rate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::audio::{units_for, units_to_duration};
use super::{Tick, Track, TrackEngine, TrackKind, TrackMonitor};
use crate::chunked::{ChunkedStreamDecoder, ReadState, Whence};
use crate::config::VideoTrackConfig;
use crate::error::PlaybackError;
use crate::frame::{DecoderFactory, VideoFrame};
use crate::sink::FrameSink;
use crate::source::{ChunkList, ChunkSource};

/// Chunk layout of one video stream.
#[derive(Clone, Debug)]
pub struct VideoStream {
    pub chunks: ChunkList,
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    pub chunk_duration: Duration,
    pub duration: Duration,
}

pub type VideoTrack = Track<VideoEngine>;

impl Track<VideoEngine> {
    pub fn open(
        stream: VideoStream,
        source: Arc<dyn ChunkSource>,
        factory: Arc<dyn DecoderFactory<Unit = VideoFrame>>,
        sink: Arc<dyn FrameSink>,
        cfg: &VideoTrackConfig,
    ) -> Result<Self, PlaybackError> {
        if !(stream.frame_rate.is_finite() && stream.frame_rate > 0.0) {
            return Err(PlaybackError::Config(format!(
                "invalid video frame rate {}",
                stream.frame_rate
            )));
        }
        let chunk_units = units_for(stream.chunk_duration, stream.frame_rate);
        if chunk_units == 0 {
            return Err(PlaybackError::Config(
                "video chunk shorter than one frame".to_string(),
            ));
        }
        let decoder =
            ChunkedStreamDecoder::new(stream.chunks, source, factory, chunk_units, &cfg.prefetch)?;
        let monitor = Arc::new(VideoMonitor {
            position: decoder.position_handle(),
            interrupt: decoder.interrupt_handle(),
            frame_rate: stream.frame_rate,
        });
        tracing::info!(
            fps = stream.frame_rate,
            width = stream.width,
            height = stream.height,
            chunks = decoder.chunk_count(),
            "video track opened"
        );
        Ok(Track::from_engine(VideoEngine {
            decoder,
            sink,
            monitor,
            frame_rate: stream.frame_rate,
            duration: stream.duration,
            scratch: Vec::with_capacity(1),
        }))
    }
}

pub struct VideoEngine {
    decoder: ChunkedStreamDecoder<VideoFrame>,
    sink: Arc<dyn FrameSink>,
    monitor: Arc<VideoMonitor>,
    frame_rate: f64,
    duration: Duration,
    scratch: Vec<VideoFrame>,
}

impl TrackEngine for VideoEngine {
    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn monitor(&self) -> Arc<dyn TrackMonitor> {
        self.monitor.clone()
    }

    fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate)
    }

    fn duration(&self) -> Duration {
        self.duration
    }

    fn tick(&mut self) -> Result<Tick, PlaybackError> {
        self.scratch.clear();
        let status = self.decoder.read(1, &mut self.scratch)?;
        if let Some(frame) = self.scratch.first() {
            if !self.sink.present(frame) {
                return Err(PlaybackError::Output("display stopped accepting frames".into()));
            }
        }
        Ok(match status.state {
            ReadState::Ended => Tick::End,
            ReadState::Open | ReadState::Interrupted => Tick::Continue,
        })
    }

    fn seek(&mut self, target: Duration) -> Result<(), PlaybackError> {
        let target_frame = units_for(target, self.frame_rate);
        let per_chunk = self.decoder.units_per_chunk();
        let last = self.decoder.chunk_count().saturating_sub(1) as u64;
        let chunk = (target_frame / per_chunk).min(last);
        self.decoder.seek(chunk as i64, Whence::Start)?;
        self.decoder.skip(target_frame - chunk * per_chunk);
        Ok(())
    }

    fn clear_output(&mut self) {
        self.sink.clear();
    }

    fn release(&mut self) -> Result<(), PlaybackError> {
        self.decoder.close();
        Ok(())
    }
}

struct VideoMonitor {
    position: Arc<AtomicU64>,
    interrupt: Arc<AtomicBool>,
    frame_rate: f64,
}

impl TrackMonitor for VideoMonitor {
    fn played_time(&self) -> Duration {
        units_to_duration(self.position.load(Ordering::Relaxed), self.frame_rate)
    }

    fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
    }

    fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::Relaxed);
    }
}
