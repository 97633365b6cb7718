use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Prefetch window sizing for one chunked stream.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Max chunk buffers queued ahead of the one being drained.
    pub window_chunks: usize,
    /// Max decoded units held by a single chunk buffer before the worker blocks.
    pub chunk_buffer_units: usize,
    /// When set, fetched payloads are spooled to files here instead of memory.
    pub spool_dir: Option<PathBuf>,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            window_chunks: 3,
            chunk_buffer_units: 1 << 20,
            spool_dir: None,
        }
    }
}

/// Tuning for the audio track tick loop.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AudioTrackConfig {
    /// Tick period of the refill loop in milliseconds.
    pub tick_ms: u64,
    /// Amount of audio kept queued in the output sink.
    pub output_buffer_ms: u64,
    /// Max frames pulled from the decoder per tick.
    pub max_read_units: usize,
    pub prefetch: PrefetchConfig,
}

impl Default for AudioTrackConfig {
    fn default() -> Self {
        Self {
            tick_ms: 10,
            output_buffer_ms: 200,
            max_read_units: 8192,
            prefetch: PrefetchConfig::default(),
        }
    }
}

impl AudioTrackConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    /// Output queue target in frames for `rate_hz`.
    pub fn output_buffer_units(&self, rate_hz: u32) -> usize {
        let frames = (rate_hz as u64).saturating_mul(self.output_buffer_ms) / 1000;
        (frames as usize).max(1)
    }
}

/// Tuning for the video track.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct VideoTrackConfig {
    pub prefetch: PrefetchConfig,
}

impl Default for VideoTrackConfig {
    fn default() -> Self {
        Self {
            prefetch: PrefetchConfig {
                window_chunks: 3,
                chunk_buffer_units: 64,
                spool_dir: None,
            },
        }
    }
}

/// Top-level tuning for a [`crate::player::MediaPlayer`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Drift correction period in milliseconds.
    pub sync_interval_ms: u64,
    pub audio: AudioTrackConfig,
    pub video: VideoTrackConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: 30_000,
            audio: AudioTrackConfig::default(),
            video: VideoTrackConfig::default(),
        }
    }
}

impl PlayerConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }
}
