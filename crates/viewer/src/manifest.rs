//! Document manifest loading.
//!
//! A manifest names the chunk directory, the chunk identifiers of each stream
//! and their rates, plus optional player tuning:
//!
//! ```toml
//! chunk_dir = "chunks"
//!
//! [audio]
//! sample_rate = 44100
//! chunk_ms = 10000
//! chunks = ["a0", "a1", "a2"]
//!
//! [video]
//! frame_rate = 25.0
//! width = 320
//! height = 240
//! chunk_ms = 10000
//! chunks = ["v0", "v1", "v2"]
//!
//! [player]
//! sync_interval_ms = 30000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use media_player::config::PlayerConfig;
use media_player::source::ChunkList;
use media_player::track::{AudioStream, VideoStream};
use media_player::Document;

#[derive(Debug, Deserialize)]
pub struct Manifest {
    /// Chunk store root, relative to the manifest file.
    pub chunk_dir: PathBuf,
    pub audio: AudioSection,
    pub video: Option<VideoSection>,
    #[serde(default)]
    pub player: PlayerConfig,
}

#[derive(Debug, Deserialize)]
pub struct AudioSection {
    pub sample_rate: u32,
    pub chunk_ms: u64,
    /// Defaults to `chunks * chunk_ms`.
    pub duration_ms: Option<u64>,
    pub chunks: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct VideoSection {
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    pub chunk_ms: u64,
    pub duration_ms: Option<u64>,
    pub chunks: Vec<String>,
}

impl Manifest {
    /// Load a manifest from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("read manifest {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse manifest {:?}", path))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<Manifest>(raw)?)
    }

    /// Chunk directory resolved against the manifest location.
    pub fn chunk_root(&self, manifest_path: &Path) -> PathBuf {
        if self.chunk_dir.is_absolute() {
            return self.chunk_dir.clone();
        }
        manifest_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&self.chunk_dir)
    }

    /// Build the player-facing chunk layout.
    pub fn document(&self) -> Result<Document> {
        let a = &self.audio;
        let audio = AudioStream {
            chunks: ChunkList::new(a.chunks.iter().cloned()).context("audio chunks")?,
            sample_rate: a.sample_rate,
            chunk_duration: Duration::from_millis(a.chunk_ms),
            duration: total_duration(a.duration_ms, a.chunk_ms, a.chunks.len()),
        };
        let video = match &self.video {
            Some(v) => Some(VideoStream {
                chunks: ChunkList::new(v.chunks.iter().cloned()).context("video chunks")?,
                frame_rate: v.frame_rate,
                width: v.width,
                height: v.height,
                chunk_duration: Duration::from_millis(v.chunk_ms),
                duration: total_duration(v.duration_ms, v.chunk_ms, v.chunks.len()),
            }),
            None => None,
        };
        Ok(Document { audio, video })
    }
}

fn total_duration(explicit_ms: Option<u64>, chunk_ms: u64, chunks: usize) -> Duration {
    Duration::from_millis(explicit_ms.unwrap_or(chunk_ms.saturating_mul(chunks as u64)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
chunk_dir = "chunks"

[audio]
sample_rate = 48000
chunk_ms = 10000
duration_ms = 25000
chunks = ["a0", "a1", "a2"]

[video]
frame_rate = 25.0
width = 4
height = 2
chunk_ms = 10000
chunks = ["v0", "v1", "v2"]

[player]
sync_interval_ms = 5000

[player.audio]
output_buffer_ms = 300
"#;

    #[test]
    fn parses_streams_and_player_overrides() {
        let m = Manifest::parse(SAMPLE).unwrap();
        let doc = m.document().unwrap();
        assert_eq!(doc.audio.chunks.len(), 3);
        assert_eq!(doc.audio.duration, Duration::from_secs(25));
        let video = doc.video.unwrap();
        assert_eq!(video.duration, Duration::from_secs(30));
        assert_eq!((video.width, video.height), (4, 2));
        assert_eq!(m.player.sync_interval_ms, 5000);
        assert_eq!(m.player.audio.output_buffer_ms, 300);
        assert_eq!(m.player.audio.tick_ms, 10);
    }

    #[test]
    fn player_table_is_optional() {
        let m = Manifest::parse(
            "chunk_dir = \"c\"\n[audio]\nsample_rate = 8000\nchunk_ms = 1000\nchunks = [\"x\"]\n",
        )
        .unwrap();
        assert!(m.video.is_none());
        assert_eq!(m.player.sync_interval_ms, 30_000);
    }

    #[test]
    fn empty_chunk_list_is_rejected() {
        let m = Manifest::parse(
            "chunk_dir = \"c\"\n[audio]\nsample_rate = 8000\nchunk_ms = 1000\nchunks = []\n",
        )
        .unwrap();
        let err = m.document().unwrap_err();
        assert!(format!("{err:#}").contains("no data input"));
    }

    #[test]
    fn chunk_root_is_relative_to_manifest() {
        let m = Manifest::parse(SAMPLE).unwrap();
        assert_eq!(
            m.chunk_root(Path::new("/docs/talk/manifest.toml")),
            PathBuf::from("/docs/talk/chunks")
        );
    }
}
