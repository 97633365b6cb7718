//! Shared fixtures for unit tests: scripted chunk stores, a trivial pattern
//! decoder and recording sinks.

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{DecodeError, FetchError};
use crate::frame::{ChunkRead, DecoderFactory, FrameDecoder, StereoFrame, VideoFrame};
use crate::sink::{FrameSink, ProgressSink};
use crate::source::{ChunkPayload, ChunkSource};

/// Poll `cond` until it holds or five seconds pass.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// A 16-bit PCM WAV file with a deterministic, non-constant waveform.
pub fn wav_bytes(rate: u32, channels: u16, frames: usize) -> Vec<u8> {
    let data_len = (frames * channels as usize * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&(rate * channels as u32 * 2).to_le_bytes());
    out.extend_from_slice(&(channels * 2).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames {
        for ch in 0..channels as usize {
            let sample = (((i * 37 + ch * 11) % 200) as i16 - 100) * 150;
            out.extend_from_slice(&sample.to_le_bytes());
        }
    }
    out
}

/// Decodes payloads of the form `start=<s> units=<n>` into `s..s+n`.
pub struct PatternFactory;

impl PatternFactory {
    /// Parse a pattern payload and expose its units through `map`.
    pub fn open_mapped<U, F>(
        &self,
        _index: usize,
        mut payload: ChunkPayload,
        map: F,
    ) -> Result<Box<dyn FrameDecoder<Unit = U>>, DecodeError>
    where
        U: Send + 'static,
        F: Fn(u64) -> U + Send + 'static,
    {
        let mut text = String::new();
        payload.read_to_string(&mut text)?;
        let field = |name: &str| -> Result<u64, DecodeError> {
            text.split_whitespace()
                .find_map(|kv| kv.strip_prefix(name)?.strip_prefix('='))
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| DecodeError::Malformed(format!("missing {name} in {text:?}")))
        };
        Ok(Box::new(PatternDecoder {
            start: field("start")?,
            units: field("units")?,
            cursor: 0,
            map,
        }))
    }
}

impl DecoderFactory for PatternFactory {
    type Unit = u64;

    fn open(
        &self,
        index: usize,
        payload: ChunkPayload,
    ) -> Result<Box<dyn FrameDecoder<Unit = u64>>, DecodeError> {
        self.open_mapped(index, payload, |u| u)
    }
}

/// Pattern units as stereo frames carrying the unit value.
pub struct PatternAudio;

impl DecoderFactory for PatternAudio {
    type Unit = StereoFrame;

    fn open(
        &self,
        index: usize,
        payload: ChunkPayload,
    ) -> Result<Box<dyn FrameDecoder<Unit = StereoFrame>>, DecodeError> {
        PatternFactory.open_mapped(index, payload, |u| [u as f32, u as f32])
    }
}

/// Pattern units as 1x1 frames whose first byte is the unit value.
pub struct PatternVideo;

impl DecoderFactory for PatternVideo {
    type Unit = VideoFrame;

    fn open(
        &self,
        index: usize,
        payload: ChunkPayload,
    ) -> Result<Box<dyn FrameDecoder<Unit = VideoFrame>>, DecodeError> {
        PatternFactory.open_mapped(index, payload, |u| VideoFrame {
            width: 1,
            height: 1,
            pixels: vec![u as u8, 0, 0, 255].into(),
        })
    }
}

struct PatternDecoder<F> {
    start: u64,
    units: u64,
    cursor: u64,
    map: F,
}

impl<U, F> FrameDecoder for PatternDecoder<F>
where
    U: Send + 'static,
    F: Fn(u64) -> U + Send + 'static,
{
    type Unit = U;

    fn read_units(&mut self, max: usize, out: &mut Vec<U>) -> Result<ChunkRead, DecodeError> {
        let n = (max as u64).min(self.units - self.cursor);
        out.extend((self.cursor..self.cursor + n).map(|k| (self.map)(self.start + k)));
        self.cursor += n;
        Ok(ChunkRead {
            units: n as usize,
            end_of_chunk: self.cursor >= self.units,
        })
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.cursor = 0;
        Ok(())
    }
}

#[derive(Default)]
struct Script {
    chunks: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    fetches: HashMap<String, usize>,
    latency: Duration,
}

/// In-memory chunk store with injectable failures and latency.
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<Script>,
}

impl ScriptedSource {
    pub fn insert(&self, id: &str, data: impl Into<Vec<u8>>) {
        self.script.lock().unwrap().chunks.insert(id.to_string(), data.into());
    }

    /// Make every later fetch of `id` fail with not-found.
    pub fn fail(&self, id: &str) {
        self.script.lock().unwrap().failing.insert(id.to_string());
    }

    pub fn set_latency(&self, latency: Duration) {
        self.script.lock().unwrap().latency = latency;
    }

    pub fn fetch_count(&self, id: &str) -> usize {
        self.script.lock().unwrap().fetches.get(id).copied().unwrap_or(0)
    }
}

impl ChunkSource for ScriptedSource {
    fn fetch(&self, id: &str) -> Result<Box<dyn Read + Send>, FetchError> {
        let (latency, result) = {
            let mut script = self.script.lock().unwrap();
            *script.fetches.entry(id.to_string()).or_default() += 1;
            let result = if script.failing.contains(id) {
                None
            } else {
                script.chunks.get(id).cloned()
            };
            (script.latency, result)
        };
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        match result {
            Some(data) => Ok(Box::new(Cursor::new(data))),
            None => Err(FetchError::NotFound { id: id.to_string() }),
        }
    }
}

/// `n` pattern chunks `c0..c{n-1}` of `units` units each; unit values run
/// continuously across chunk boundaries.
pub fn pattern_chunks(n: usize, units: usize) -> ScriptedSource {
    let source = ScriptedSource::default();
    for i in 0..n {
        source.insert(&format!("c{i}"), format!("start={} units={units}", i * units));
    }
    source
}

/// Frame sink that records the first pixel byte of every presented frame.
#[derive(Default)]
pub struct RecordingFrameSink {
    firsts: Mutex<Vec<u8>>,
    cleared: Mutex<usize>,
}

impl RecordingFrameSink {
    pub fn first_bytes(&self) -> Vec<u8> {
        self.firsts.lock().unwrap().clone()
    }

    pub fn cleared(&self) -> usize {
        *self.cleared.lock().unwrap()
    }
}

impl FrameSink for RecordingFrameSink {
    fn present(&self, frame: &VideoFrame) -> bool {
        let first = frame.pixels.first().copied().unwrap_or(0);
        self.firsts.lock().unwrap().push(first);
        true
    }

    fn clear(&self) {
        *self.cleared.lock().unwrap() += 1;
    }
}

/// Progress sink that records every `(elapsed, total)` update.
#[derive(Default)]
pub struct RecordingProgressSink {
    updates: Mutex<Vec<(u64, u64)>>,
    clears: Mutex<usize>,
}

impl RecordingProgressSink {
    pub fn updates(&self) -> Vec<(u64, u64)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn clears(&self) -> usize {
        *self.clears.lock().unwrap()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn update(&self, elapsed_secs: u64, total_secs: u64) -> bool {
        self.updates.lock().unwrap().push((elapsed_secs, total_secs));
        true
    }

    fn clear(&self) {
        *self.clears.lock().unwrap() += 1;
    }
}
