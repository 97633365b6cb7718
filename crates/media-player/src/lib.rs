//! Synchronized playback of chunked media.
//!
//! A document is split into per-stream lists of chunk identifiers. Each stream
//! plays through a [`track::PlaybackTrack`] that pulls decoded units from a
//! [`chunked::ChunkedStreamDecoder`]; a [`sync::SyncCoordinator`] periodically
//! holds back whichever tracks run ahead, and [`player::MediaPlayer`] puts one
//! control surface over all of it.

pub mod chunked;
pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod frame;
pub mod playback;
pub mod player;
pub mod queue;
pub mod rawframe;
pub mod resample;
pub mod sink;
pub mod source;
pub mod status;
pub mod sync;
pub mod track;

#[cfg(test)]
mod test_support;

pub use error::{DecodeError, FetchError, PlaybackError, StreamError};
pub use player::{Document, MediaPlayer, Outputs};
