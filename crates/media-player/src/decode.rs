//! Audio chunk decoding.
//!
//! Uses Symphonia to:
//! - probe one chunk payload (container/codec)
//! - decode packets into interleaved `f32`
//! - hand them out as [`StereoFrame`] units

use std::collections::VecDeque;
use std::io;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::error::DecodeError;
use crate::frame::{ChunkRead, DecoderFactory, FrameDecoder, StereoFrame, to_stereo};
use crate::source::ChunkPayload;

/// Metadata captured while probing a chunk.
#[derive(Clone, Debug, Default)]
pub struct ChunkInfo {
    /// Codec name (best-effort).
    pub codec: Option<String>,
    pub sample_rate: u32,
    pub channels: usize,
    /// Frames in the chunk when the container declares them.
    pub frames: Option<u64>,
}

/// Opens a [`SymphoniaDecoder`] for each audio chunk of a track.
#[derive(Clone, Debug, Default)]
pub struct SymphoniaFactory {
    /// Reject chunks whose sample rate differs from the track rate.
    pub expected_rate: Option<u32>,
    /// Container extension hint, e.g. `mp3`.
    pub extension: Option<String>,
}

impl SymphoniaFactory {
    pub fn new(expected_rate: u32) -> Self {
        Self {
            expected_rate: Some(expected_rate),
            extension: None,
        }
    }

    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.extension = Some(ext.into());
        self
    }
}

impl DecoderFactory for SymphoniaFactory {
    type Unit = StereoFrame;

    fn open(
        &self,
        index: usize,
        payload: ChunkPayload,
    ) -> Result<Box<dyn FrameDecoder<Unit = StereoFrame>>, DecodeError> {
        let mut hint = Hint::new();
        if let Some(ext) = self.extension.as_deref() {
            hint.with_extension(ext);
        }
        let dec = SymphoniaDecoder::open(payload, hint)?;
        let info = dec.info();
        if let Some(expected) = self.expected_rate {
            if info.sample_rate != expected {
                return Err(DecodeError::Unsupported(format!(
                    "chunk sample rate {} != track rate {expected}",
                    info.sample_rate
                )));
            }
        }
        tracing::debug!(
            chunk = index,
            codec = info.codec.as_deref().unwrap_or("?"),
            rate_hz = info.sample_rate,
            channels = info.channels,
            frames = ?info.frames,
            "audio chunk opened"
        );
        Ok(Box::new(dec))
    }
}

/// Decoder over one probed audio chunk.
pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: ChunkInfo,
    pending: VecDeque<StereoFrame>,
    eof: bool,
}

impl SymphoniaDecoder {
    pub fn open(payload: ChunkPayload, hint: Hint) -> Result<Self, DecodeError> {
        let mss = MediaSourceStream::new(Box::new(payload), Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(map_symphonia_error)?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| DecodeError::Malformed("no default audio track".to_string()))?;
        let codec_params: CodecParameters = track.codec_params.clone();
        let track_id = track.id;

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| DecodeError::Malformed("unknown sample rate".to_string()))?;
        let channels = codec_params
            .channels
            .ok_or_else(|| DecodeError::Malformed("unknown channels".to_string()))?
            .count();

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(map_symphonia_error)?;

        Ok(Self {
            format,
            decoder,
            track_id,
            info: ChunkInfo {
                codec: codec_name_from_params(&codec_params),
                sample_rate,
                channels,
                frames: codec_params.n_frames,
            },
            pending: VecDeque::new(),
            eof: false,
        })
    }

    pub fn info(&self) -> ChunkInfo {
        self.info.clone()
    }

    /// Decode the next packet into `pending`. Returns `false` at end of chunk.
    fn decode_next(&mut self) -> Result<bool, DecodeError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(e) if is_end_of_chunk(&e) => return Ok(false),
                Err(e) => return Err(map_symphonia_error(e)),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::warn!("skipping undecodable packet: {e}");
                    continue;
                }
                Err(e) if is_end_of_chunk(&e) => return Ok(false),
                Err(e) => return Err(map_symphonia_error(e)),
            };

            let channels = decoded.spec().channels.count().max(1);
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
            sample_buf.copy_interleaved_ref(decoded);
            self.pending
                .extend(sample_buf.samples().chunks_exact(channels).map(to_stereo));
            return Ok(true);
        }
    }
}

impl FrameDecoder for SymphoniaDecoder {
    type Unit = StereoFrame;

    fn read_units(&mut self, max: usize, out: &mut Vec<StereoFrame>) -> Result<ChunkRead, DecodeError> {
        let mut units = 0usize;
        while units < max {
            if let Some(frame) = self.pending.pop_front() {
                out.push(frame);
                units += 1;
                continue;
            }
            if self.eof {
                break;
            }
            if !self.decode_next()? {
                self.eof = true;
            }
        }
        Ok(ChunkRead {
            units,
            end_of_chunk: self.eof && self.pending.is_empty(),
        })
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::new(0, 0.0),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(map_symphonia_error)?;
        self.decoder.reset();
        self.pending.clear();
        self.eof = false;
        Ok(())
    }
}

fn is_end_of_chunk(e: &SymphoniaError) -> bool {
    match e {
        SymphoniaError::IoError(io) => io.kind() == io::ErrorKind::UnexpectedEof,
        SymphoniaError::ResetRequired => true,
        _ => false,
    }
}

fn map_symphonia_error(e: SymphoniaError) -> DecodeError {
    match e {
        SymphoniaError::IoError(io) => DecodeError::Io(io),
        SymphoniaError::Unsupported(what) => DecodeError::Unsupported(what.to_string()),
        other => DecodeError::Malformed(other.to_string()),
    }
}

/// Best-effort codec label used for logging.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::wav_bytes;

    #[test]
    fn codec_name_from_params_maps_known_codecs() {
        let mut params = CodecParameters::new();
        params.codec = symphonia::core::codecs::CODEC_TYPE_MP3;
        assert_eq!(codec_name_from_params(&params), Some("MP3".to_string()));
        params.codec = symphonia::core::codecs::CODEC_TYPE_PCM_S16LE;
        assert_eq!(codec_name_from_params(&params), Some("PCM_S16".to_string()));
    }

    #[test]
    fn codec_name_from_params_unknown_returns_none() {
        assert!(codec_name_from_params(&CodecParameters::new()).is_none());
    }

    #[test]
    fn decodes_mono_wav_into_stereo_units() {
        let payload = ChunkPayload::from_bytes(wav_bytes(8_000, 1, 800));
        let factory = SymphoniaFactory::new(8_000).with_extension("wav");
        let mut dec = factory.open(0, payload).unwrap();

        let mut out = Vec::new();
        let mut total = 0usize;
        loop {
            let read = dec.read_units(256, &mut out).unwrap();
            total += read.units;
            if read.end_of_chunk {
                break;
            }
        }
        assert_eq!(total, 800);
        assert!(out.iter().all(|f| f[0] == f[1]));
    }

    #[test]
    fn rewind_restarts_the_chunk() {
        let payload = ChunkPayload::from_bytes(wav_bytes(8_000, 2, 400));
        let mut dec = SymphoniaFactory::new(8_000).open(0, payload).unwrap();

        let mut first = Vec::new();
        dec.read_units(100, &mut first).unwrap();
        dec.rewind().unwrap();
        let mut again = Vec::new();
        dec.read_units(100, &mut again).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn rejects_rate_mismatch() {
        let payload = ChunkPayload::from_bytes(wav_bytes(22_050, 1, 10));
        let err = SymphoniaFactory::new(44_100).open(3, payload).err().unwrap();
        assert!(matches!(err, DecodeError::Unsupported(_)));
    }

    #[test]
    fn garbage_payload_is_a_decode_error() {
        let payload = ChunkPayload::from_bytes(vec![0x42; 64]);
        assert!(SymphoniaFactory::default().open(0, payload).is_err());
    }
}
