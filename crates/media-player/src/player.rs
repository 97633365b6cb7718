//! [`MediaPlayer`]: one audio track, an optional video track and a progress
//! track behind a single play/pause/seek/close surface.
//!
//! Control calls fan out in a fixed order (progress, video, audio). The drift
//! coordinator starts on the first `play` and lives until `close`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::chunked::Whence;
use crate::config::PlayerConfig;
use crate::decode::SymphoniaFactory;
use crate::error::PlaybackError;
use crate::queue::lock;
use crate::rawframe::RawFrameFactory;
use crate::sink::{AudioSink, FrameSink, ProgressSink};
use crate::source::ChunkSource;
use crate::status::{PlayerStatus, SyncStats};
use crate::sync::{SharedTrack, SyncCoordinator};
use crate::track::{AudioStream, AudioTrack, PlaybackTrack, ProgressTrack, VideoStream, VideoTrack};

/// Chunk layout of a document: its audio stream and optional video stream.
#[derive(Clone, Debug)]
pub struct Document {
    pub audio: AudioStream,
    pub video: Option<VideoStream>,
}

/// Output devices the player renders into.
pub struct Outputs {
    pub audio: Arc<dyn AudioSink>,
    pub video: Option<Arc<dyn FrameSink>>,
    pub progress: Arc<dyn ProgressSink>,
}

pub struct MediaPlayer {
    /// Fan-out order: progress, video, audio.
    tracks: Vec<SharedTrack>,
    audio: SharedTrack,
    duration: Duration,
    sync_interval: Duration,
    sync: Mutex<Option<SyncCoordinator>>,
    closed: AtomicBool,
}

impl MediaPlayer {
    /// Open every track of `doc` over `source`.
    ///
    /// Audio chunks are decoded with symphonia, video chunks as raw RGBA frames.
    pub fn open(
        doc: Document,
        source: Arc<dyn ChunkSource>,
        outputs: Outputs,
        cfg: &PlayerConfig,
    ) -> Result<Self, PlaybackError> {
        let progress: SharedTrack = Arc::new(ProgressTrack::new(doc.audio.duration, outputs.progress));

        let video: Option<SharedTrack> = match (doc.video, outputs.video) {
            (Some(stream), Some(sink)) => {
                let factory = Arc::new(RawFrameFactory::new(stream.width, stream.height));
                Some(Arc::new(VideoTrack::open(
                    stream,
                    source.clone(),
                    factory,
                    sink,
                    &cfg.video,
                )?))
            }
            (Some(_), None) => {
                return Err(PlaybackError::Config(
                    "document has a video stream but no display was given".into(),
                ));
            }
            (None, _) => None,
        };

        let factory = Arc::new(SymphoniaFactory::new(doc.audio.sample_rate));
        let audio: SharedTrack = Arc::new(AudioTrack::open(
            doc.audio,
            source,
            factory,
            outputs.audio,
            &cfg.audio,
        )?);

        Ok(Self::from_tracks(audio, video, progress, cfg.sync_interval()))
    }

    /// Assemble a player from already opened tracks.
    pub fn from_tracks(
        audio: SharedTrack,
        video: Option<SharedTrack>,
        progress: SharedTrack,
        sync_interval: Duration,
    ) -> Self {
        let mut tracks = vec![progress];
        tracks.extend(video);
        tracks.push(audio.clone());
        tracing::info!(
            tracks = tracks.len(),
            duration_ms = audio.duration().as_millis() as u64,
            "media player opened"
        );
        Self {
            duration: audio.duration(),
            tracks,
            audio,
            sync_interval,
            sync: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), PlaybackError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PlaybackError::Closed);
        }
        Ok(())
    }

    /// Run `op` on every track in fan-out order; every track is visited and the
    /// first error is returned.
    fn fan_out(
        &self,
        mut op: impl FnMut(&SharedTrack) -> Result<(), PlaybackError>,
    ) -> Result<(), PlaybackError> {
        let mut first = None;
        for track in &self.tracks {
            if let Err(e) = op(track) {
                tracing::warn!(track = %track.kind(), "{e}");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    pub fn play(&self) -> Result<(), PlaybackError> {
        self.ensure_open()?;
        self.fan_out(|t| t.play())?;
        let mut sync = lock(&self.sync);
        if sync.is_none() {
            *sync = Some(SyncCoordinator::start(self.tracks.clone(), self.sync_interval));
        }
        Ok(())
    }

    pub fn pause(&self) {
        for track in &self.tracks {
            track.pause();
        }
    }

    /// Move every track to `position_secs`. Tracks are left paused.
    pub fn seek(&self, position_secs: f64) -> Result<Duration, PlaybackError> {
        self.ensure_open()?;
        let requested_ms = (position_secs * 1000.0).round();
        let seekable = self
            .tracks
            .iter()
            .map(|t| t.duration())
            .min()
            .unwrap_or(self.duration);
        if !requested_ms.is_finite() || requested_ms < 0.0 || requested_ms >= seekable.as_millis() as f64 {
            return Err(PlaybackError::InvalidPosition {
                requested_ms: if requested_ms.is_finite() { requested_ms as i64 } else { i64::MAX },
                duration_ms: seekable.as_millis() as u64,
            });
        }
        let ms = requested_ms as i64;
        self.fan_out(|t| t.seek(ms, Whence::Start).map(|_| ()))?;
        tracing::info!(position_ms = ms, "player seeked");
        Ok(Duration::from_millis(ms as u64))
    }

    /// Pause, rewind to zero and blank every output.
    pub fn reset(&self) -> Result<(), PlaybackError> {
        self.ensure_open()?;
        self.fan_out(|t| t.reset())
    }

    /// Stop the coordinator and release every track.
    ///
    /// All tracks are closed even if some fail; the first error is returned.
    pub fn close(&self) -> Result<(), PlaybackError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(PlaybackError::AlreadyClosed);
        }
        if let Some(coordinator) = lock(&self.sync).as_mut() {
            coordinator.signal_stop();
        }
        // Closing the tracks also releases any hold the coordinator is waiting on.
        let result = self.fan_out(|t| t.close());
        if let Some(coordinator) = lock(&self.sync).as_mut() {
            coordinator.stop();
        }
        tracing::info!("media player closed");
        result
    }

    pub fn is_playing(&self) -> bool {
        self.tracks.iter().all(|t| t.is_playing())
    }

    pub fn is_pausing(&self) -> bool {
        self.tracks.iter().all(|t| t.is_pausing())
    }

    /// Played time of the audio track, the master clock.
    pub fn played_time(&self) -> Result<Duration, PlaybackError> {
        self.audio.played_time()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Some track stopped on an error while the player stays open.
    pub fn is_degraded(&self) -> bool {
        self.tracks.iter().any(|t| t.failure().is_some())
    }

    pub fn sync_stats(&self) -> SyncStats {
        lock(&self.sync)
            .as_ref()
            .map(SyncCoordinator::stats)
            .unwrap_or_default()
    }

    pub fn status(&self) -> PlayerStatus {
        let tracks: Vec<_> = self.tracks.iter().map(|t| t.status()).collect();
        PlayerStatus {
            playing: self.is_playing(),
            pausing: self.is_pausing(),
            played_ms: self.played_time().ok().map(|d| d.as_millis() as u64),
            duration_ms: self.duration.as_millis() as u64,
            degraded: tracks.iter().any(|t| t.error.is_some()),
            tracks,
            sync: self.sync_stats(),
        }
    }
}

impl Drop for MediaPlayer {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AudioTrackConfig, PrefetchConfig, VideoTrackConfig};
    use crate::sink::NullAudioSink;
    use crate::source::{ChunkList, MemoryChunkSource};
    use crate::status::TrackState;
    use crate::test_support::{
        PatternAudio, PatternVideo, RecordingFrameSink, RecordingProgressSink, ScriptedSource,
        pattern_chunks, wait_until, wav_bytes,
    };
    use crate::track::TrackKind;

    const RATE: u32 = 1_000;

    fn audio_cfg() -> AudioTrackConfig {
        AudioTrackConfig {
            tick_ms: 10,
            output_buffer_ms: 100,
            max_read_units: 512,
            prefetch: PrefetchConfig {
                window_chunks: 2,
                chunk_buffer_units: 4_096,
                spool_dir: None,
            },
        }
    }

    fn ids(n: usize) -> ChunkList {
        ChunkList::new((0..n).map(|i| format!("c{i}"))).unwrap()
    }

    fn audio_track(source: Arc<ScriptedSource>, chunks: usize, chunk: Duration) -> Arc<AudioTrack> {
        let stream = AudioStream {
            chunks: ids(chunks),
            sample_rate: RATE,
            chunk_duration: chunk,
            duration: chunk * chunks as u32,
        };
        let sink = Arc::new(NullAudioSink::new(RATE));
        Arc::new(AudioTrack::open(stream, source, Arc::new(PatternAudio), sink, &audio_cfg()).unwrap())
    }

    fn video_track(chunks: usize, chunk: Duration, fps: f64) -> Arc<VideoTrack> {
        let frames = (chunk.as_secs_f64() * fps).round() as usize;
        let stream = VideoStream {
            chunks: ids(chunks),
            frame_rate: fps,
            width: 1,
            height: 1,
            chunk_duration: chunk,
            duration: chunk * chunks as u32,
        };
        let cfg = VideoTrackConfig {
            prefetch: PrefetchConfig {
                window_chunks: 2,
                chunk_buffer_units: 64,
                spool_dir: None,
            },
        };
        Arc::new(
            VideoTrack::open(
                stream,
                Arc::new(pattern_chunks(chunks, frames)),
                Arc::new(PatternVideo),
                Arc::new(RecordingFrameSink::default()),
                &cfg,
            )
            .unwrap(),
        )
    }

    fn progress_track(duration: Duration) -> Arc<ProgressTrack> {
        Arc::new(ProgressTrack::new(duration, Arc::new(RecordingProgressSink::default())))
    }

    /// Three 10s audio chunks, matching video and progress.
    fn player(source: Arc<ScriptedSource>, sync_interval: Duration) -> MediaPlayer {
        let chunk = Duration::from_secs(10);
        MediaPlayer::from_tracks(
            audio_track(source, 3, chunk),
            Some(video_track(3, chunk, 25.0)),
            progress_track(chunk * 3),
            sync_interval,
        )
    }

    #[test]
    fn played_time_follows_wall_clock() {
        let p = player(Arc::new(pattern_chunks(3, 10 * RATE as usize)), Duration::from_secs(30));
        p.play().unwrap();
        assert!(p.is_playing() && !p.is_pausing());
        std::thread::sleep(Duration::from_millis(1_500));
        let played = p.played_time().unwrap();
        assert!(
            played >= Duration::from_millis(1_300) && played <= Duration::from_millis(1_700),
            "played={played:?}"
        );
        p.close().unwrap();
    }

    #[test]
    fn seek_positions_every_track_and_resumes_from_target_chunk() {
        let source = Arc::new(pattern_chunks(3, 10 * RATE as usize));
        let p = player(source.clone(), Duration::from_secs(30));
        p.seek(15.0).unwrap();

        assert!(p.played_time().unwrap().abs_diff(Duration::from_secs(15)) <= Duration::from_millis(10));
        for status in p.status().tracks {
            let played = status.played_ms.unwrap();
            assert!(played.abs_diff(15_000) <= 40, "{status:?}");
        }

        let c0 = source.fetch_count("c0");
        p.play().unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(source.fetch_count("c0"), c0);
        assert!(source.fetch_count("c1") >= 1);
        p.close().unwrap();
    }

    #[test]
    fn invalid_seek_changes_nothing() {
        let p = player(Arc::new(pattern_chunks(3, 10 * RATE as usize)), Duration::from_secs(30));
        p.seek(4.0).unwrap();
        for bad in [-1.0, 30.0, 45.5, f64::NAN] {
            assert!(p.seek(bad).unwrap_err().is_invalid_seek(), "{bad}");
        }
        assert!(p.played_time().unwrap().abs_diff(Duration::from_secs(4)) <= Duration::from_millis(10));
        p.close().unwrap();
    }

    #[test]
    fn pause_and_resume_fan_out() {
        let p = player(Arc::new(pattern_chunks(3, 10 * RATE as usize)), Duration::from_secs(30));
        p.play().unwrap();
        p.pause();
        assert!(p.is_pausing());
        assert!(p.status().tracks.iter().all(|t| t.state == TrackState::Paused));
        p.play().unwrap();
        assert!(!p.is_pausing());
        p.close().unwrap();
    }

    #[test]
    fn coordinator_pulls_an_ahead_track_back() {
        let chunk = Duration::from_secs(10);
        let audio = audio_track(Arc::new(pattern_chunks(3, 10 * RATE as usize)), 3, chunk);
        let video = video_track(3, chunk, 50.0);
        video.seek(400, Whence::Start).unwrap();
        let p = MediaPlayer::from_tracks(
            audio.clone(),
            Some(video.clone()),
            progress_track(chunk * 3),
            Duration::from_millis(300),
        );

        p.play().unwrap();
        assert!(wait_until(|| p.sync_stats().corrections >= 1));
        std::thread::sleep(Duration::from_millis(700));
        let drift = audio.played_time().unwrap().abs_diff(video.played_time().unwrap());
        assert!(drift <= Duration::from_millis(60), "drift={drift:?}");
        assert!(p.sync_stats().cycles >= 1);
        p.close().unwrap();
    }

    #[test]
    fn repeated_pause_keeps_progress_with_audio() {
        let unit = Duration::from_millis(100);
        let total = Duration::from_secs(30);
        let audio = audio_track(Arc::new(pattern_chunks(3, 10 * RATE as usize)), 3, Duration::from_secs(10));
        let progress = Arc::new(ProgressTrack::with_unit(
            total,
            unit,
            Arc::new(RecordingProgressSink::default()),
        ));
        let p = MediaPlayer::from_tracks(audio.clone(), None, progress.clone(), Duration::from_millis(50));

        // Every run is shorter than one progress unit.
        for _ in 0..10 {
            p.play().unwrap();
            std::thread::sleep(Duration::from_millis(90));
            p.pause();
        }
        let a = audio.played_time().unwrap();
        let g = progress.played_time().unwrap();
        assert!(a.abs_diff(g) <= unit + Duration::from_millis(20), "audio={a:?} progress={g:?}");
        assert!(g >= Duration::from_millis(600), "progress={g:?}");

        p.play().unwrap();
        std::thread::sleep(Duration::from_millis(400));
        let advanced = audio.played_time().unwrap() - a;
        assert!(advanced >= Duration::from_millis(330), "audio advanced {advanced:?} over 400ms");
        p.close().unwrap();
    }

    #[test]
    fn failing_track_degrades_without_stopping_others() {
        let source = Arc::new(pattern_chunks(3, 100));
        source.fail("c1");
        let chunk = Duration::from_millis(100);
        let audio = audio_track(source, 3, chunk);
        let video = video_track(3, Duration::from_secs(1), 50.0);
        let p = MediaPlayer::from_tracks(
            audio,
            Some(video.clone()),
            progress_track(Duration::from_secs(3)),
            Duration::from_millis(50),
        );

        p.play().unwrap();
        assert!(wait_until(|| p.is_degraded()));
        assert!(video.is_playing());
        assert!(!p.is_playing());
        let status = p.status();
        assert!(status.degraded);
        let audio_status = status.tracks.iter().find(|t| t.kind == TrackKind::Audio).unwrap();
        assert_eq!(audio_status.state, TrackState::Failed);
        assert!(status.played_ms.is_none());
        assert!(p.close().is_ok());
    }

    #[test]
    fn close_is_final_and_once_only() {
        let p = player(Arc::new(pattern_chunks(3, 10 * RATE as usize)), Duration::from_millis(20));
        p.play().unwrap();
        std::thread::sleep(Duration::from_millis(60));
        p.close().unwrap();
        assert!(!p.is_playing());
        assert!(matches!(p.close(), Err(PlaybackError::AlreadyClosed)));
        assert!(matches!(p.play(), Err(PlaybackError::Closed)));
        assert!(matches!(p.seek(1.0), Err(PlaybackError::Closed)));
        assert!(p.status().tracks.iter().all(|t| t.state == TrackState::Closed));
    }

    #[test]
    fn status_serialises_to_json() {
        let p = player(Arc::new(pattern_chunks(3, 10 * RATE as usize)), Duration::from_secs(30));
        let json = serde_json::to_value(p.status()).unwrap();
        assert_eq!(json["duration_ms"], 30_000);
        assert_eq!(json["tracks"][0]["kind"], "progress");
        assert_eq!(json["tracks"][2]["state"], "idle");
        p.close().unwrap();
    }

    #[test]
    fn open_decodes_wav_chunks_and_raw_frames() {
        let source = Arc::new(MemoryChunkSource::new());
        for i in 0..2 {
            source.insert(format!("a{i}"), wav_bytes(8_000, 1, 800));
            source.insert(format!("v{i}"), vec![7u8; 2 * 2 * 4 * 5]);
        }
        let doc = Document {
            audio: AudioStream {
                chunks: ChunkList::new(["a0", "a1"]).unwrap(),
                sample_rate: 8_000,
                chunk_duration: Duration::from_millis(100),
                duration: Duration::from_millis(200),
            },
            video: Some(VideoStream {
                chunks: ChunkList::new(["v0", "v1"]).unwrap(),
                frame_rate: 50.0,
                width: 2,
                height: 2,
                chunk_duration: Duration::from_millis(100),
                duration: Duration::from_millis(200),
            }),
        };
        let frames = Arc::new(RecordingFrameSink::default());
        let outputs = Outputs {
            audio: Arc::new(NullAudioSink::new(8_000)),
            video: Some(frames.clone()),
            progress: Arc::new(RecordingProgressSink::default()),
        };
        let p = MediaPlayer::open(doc, source, outputs, &PlayerConfig::default()).unwrap();
        p.play().unwrap();
        assert!(wait_until(|| frames.first_bytes().len() == 10));
        assert!(frames.first_bytes().iter().all(|b| *b == 7));
        assert!(wait_until(|| p.status().tracks[2].state == TrackState::Idle));
        assert_eq!(p.played_time().unwrap(), Duration::from_millis(200));
        p.close().unwrap();
    }

    #[test]
    fn open_requires_a_display_for_video() {
        let doc = Document {
            audio: AudioStream {
                chunks: ids(1),
                sample_rate: RATE,
                chunk_duration: Duration::from_secs(1),
                duration: Duration::from_secs(1),
            },
            video: Some(VideoStream {
                chunks: ids(1),
                frame_rate: 25.0,
                width: 1,
                height: 1,
                chunk_duration: Duration::from_secs(1),
                duration: Duration::from_secs(1),
            }),
        };
        let outputs = Outputs {
            audio: Arc::new(NullAudioSink::new(RATE)),
            video: None,
            progress: Arc::new(RecordingProgressSink::default()),
        };
        let err = MediaPlayer::open(doc, Arc::new(pattern_chunks(1, 1)), outputs, &PlayerConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, PlaybackError::Config(_)));
    }
}
