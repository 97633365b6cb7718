//! Error taxonomy for the playback core.
//!
//! Fetch and decode failures travel from the prefetch worker to the reader as
//! [`StreamError`]; track-level operations report [`PlaybackError`].

use std::io;

use crate::track::TrackKind;

/// Failure to retrieve a chunk payload from a [`crate::source::ChunkSource`].
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("chunk {id} not found")]
    NotFound { id: String },
    #[error("transport error fetching chunk {id}: {source}")]
    Transport {
        id: String,
        #[source]
        source: io::Error,
    },
}

/// Failure to turn a chunk payload into units.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed chunk payload: {0}")]
    Malformed(String),
    #[error("unsupported chunk payload: {0}")]
    Unsupported(String),
    #[error("chunk i/o: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced by [`crate::chunked::ChunkedStreamDecoder`].
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("no data input")]
    NoDataInput,
    #[error("invalid offset {offset} (chunks: {len})")]
    InvalidOffset { offset: i64, len: usize },
    #[error("fetch chunk #{index}: {source}")]
    Fetch {
        index: usize,
        #[source]
        source: FetchError,
    },
    #[error("decode chunk #{index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: DecodeError,
    },
    #[error("stream closed")]
    Closed,
}

/// Errors reported by tracks and the [`crate::player::MediaPlayer`] facade.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("position {requested_ms}ms is outside 0..{duration_ms}ms")]
    InvalidPosition { requested_ms: i64, duration_ms: u64 },
    #[error("{track} track failed: {reason}")]
    TrackFailed { track: TrackKind, reason: String },
    #[error("already closed")]
    AlreadyClosed,
    #[error("closed")]
    Closed,
    #[error("output: {0}")]
    Output(String),
    #[error("config: {0}")]
    Config(String),
}

impl PlaybackError {
    /// Whether the error was caused by a bad caller-supplied position.
    pub fn is_invalid_seek(&self) -> bool {
        matches!(
            self,
            PlaybackError::InvalidPosition { .. }
                | PlaybackError::Stream(StreamError::InvalidOffset { .. })
        )
    }
}
