//! Viewer runtime: device listing, manifest inspection and playback.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::select;

use media_player::config::PlayerConfig;
use media_player::frame::VideoFrame;
use media_player::playback::CpalAudioSink;
use media_player::sink::{AudioSink, FrameSink, NullAudioSink, TracingProgressSink};
use media_player::source::DirChunkSource;
use media_player::status::{TrackState, format_clock};
use media_player::{MediaPlayer, Outputs, device};

use crate::cli::Args;
use crate::manifest::Manifest;

const STATUS_INTERVAL: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Presented frames between two frame log lines.
const FRAME_LOG_EVERY: u64 = 250;

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    for name in device::list_devices(&host)? {
        println!("{name}");
    }
    Ok(())
}

/// Validate a manifest and print one line per stream.
pub fn run_inspect(path: &Path) -> Result<()> {
    let manifest = Manifest::load(path)?;
    let doc = manifest.document()?;
    println!("chunks: {}", manifest.chunk_root(path).display());
    let a = &doc.audio;
    println!(
        "audio: {} Hz, {} chunks of {} ms, {}",
        a.sample_rate,
        a.chunks.len(),
        a.chunk_duration.as_millis(),
        format_clock(a.duration.as_secs())
    );
    if let Some(v) = &doc.video {
        println!(
            "video: {}x{} @ {} fps, {} chunks of {} ms, {}",
            v.width,
            v.height,
            v.frame_rate,
            v.chunks.len(),
            v.chunk_duration.as_millis(),
            format_clock(v.duration.as_secs())
        );
    }
    Ok(())
}

/// Play a manifest until every track ends or Ctrl-C, then print the final status.
pub fn run_play(args: &Args, path: &Path) -> Result<()> {
    let manifest = Manifest::load(path)?;
    let cfg = apply_overrides(manifest.player.clone(), args);
    let doc = manifest.document()?;
    let source = Arc::new(DirChunkSource::new(manifest.chunk_root(path)));

    let rate = doc.audio.sample_rate;
    let audio: Arc<dyn AudioSink> = if args.null_output {
        tracing::info!(rate_hz = rate, "null audio output");
        Arc::new(NullAudioSink::new(rate))
    } else {
        let sink = CpalAudioSink::open(normalize_device_name(args.device.clone()).as_deref(), rate)?;
        tracing::info!(device = %sink.device_name(), rate_hz = sink.device_rate(), "output device");
        Arc::new(sink)
    };
    let video = doc
        .video
        .as_ref()
        .map(|_| Arc::new(LogFrameSink::default()) as Arc<dyn FrameSink>);
    let outputs = Outputs {
        audio,
        video,
        progress: Arc::new(TracingProgressSink),
    };

    let player = MediaPlayer::open(doc, source, outputs, &cfg).context("open player")?;
    if let Some(secs) = args.seek {
        player.seek(secs).with_context(|| format!("seek to {secs}s"))?;
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        let _ = ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed));
    }

    player.play().context("start playback")?;
    let status_tick = crossbeam_channel::tick(STATUS_INTERVAL);
    let poll = crossbeam_channel::tick(POLL_INTERVAL);
    loop {
        select! {
            recv(status_tick) -> _ => {
                let status = player.status();
                tracing::info!(
                    clock = %status.clock_label(),
                    degraded = status.degraded,
                    sync_cycles = status.sync.cycles,
                    corrections = status.sync.corrections,
                    "status"
                );
            }
            recv(poll) -> _ => {
                if stop.load(Ordering::Relaxed) {
                    tracing::info!("interrupted");
                    break;
                }
                if !any_track_active(&player) {
                    tracing::info!("playback finished");
                    break;
                }
            }
        }
    }

    let closed = player.close();
    let status = player.status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    closed.context("close player")?;
    Ok(())
}

fn any_track_active(player: &MediaPlayer) -> bool {
    player
        .status()
        .tracks
        .iter()
        .any(|t| matches!(t.state, TrackState::Playing | TrackState::Paused))
}

fn apply_overrides(mut cfg: PlayerConfig, args: &Args) -> PlayerConfig {
    if let Some(ms) = args.sync_interval_ms {
        cfg.sync_interval_ms = ms;
    }
    if let Some(n) = args.window_chunks {
        cfg.audio.prefetch.window_chunks = n;
        cfg.video.prefetch.window_chunks = n;
    }
    if let Some(dir) = args.spool_dir.clone() {
        cfg.audio.prefetch.spool_dir = Some(dir.clone());
        cfg.video.prefetch.spool_dir = Some(dir);
    }
    cfg
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Headless display: counts frames and logs one every [`FRAME_LOG_EVERY`].
#[derive(Default)]
struct LogFrameSink {
    presented: AtomicU64,
}

impl FrameSink for LogFrameSink {
    fn present(&self, frame: &VideoFrame) -> bool {
        let n = self.presented.fetch_add(1, Ordering::Relaxed);
        if n % FRAME_LOG_EVERY == 0 {
            tracing::debug!(frame = n, width = frame.width, height = frame.height, "video frame");
        }
        true
    }

    fn clear(&self) {
        tracing::debug!("display cleared");
    }
}
