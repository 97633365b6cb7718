//! Chunked stream decoder.
//!
//! Presents an ordered list of independently encoded chunks as one continuous,
//! seekable unit stream. A dedicated prefetch worker keeps a bounded window of
//! per-chunk buffers filled ahead of the reader:
//!
//! ```text
//! ChunkSource -> fetch/spool -> DecoderFactory -> UnitBuffer -> PrefetchWindow -> read()
//! ```
//!
//! Seeking discards the whole window (any in-flight buffer becomes void) and
//! re-arms the worker at the target chunk.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::config::PrefetchConfig;
use crate::error::StreamError;
use crate::frame::{DecoderFactory, FrameDecoder};
use crate::queue::{Next, PrefetchWindow, Take, UnitBuffer};
use crate::source::{ChunkList, ChunkSource, Spool, fetch_payload};

/// Units decoded per batch before handing them to the chunk buffer.
const DECODE_BATCH: usize = 1024;
/// Units dropped per step while a lazy skip is pending.
const SKIP_BATCH: usize = 4096;

/// Reference point for a relative seek.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// Whether the stream can produce more units after a [`ChunkedStreamDecoder::read`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadState {
    /// More units may follow.
    Open,
    /// Last chunk drained.
    Ended,
    /// The interrupt flag was raised (seek/close in progress).
    Interrupted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadStatus {
    pub units: usize,
    pub state: ReadState,
}

enum Command<U> {
    Prefetch {
        window: Arc<PrefetchWindow<U>>,
        start: usize,
    },
    Shutdown,
}

type BoxedFactory<U> = Arc<dyn DecoderFactory<Unit = U>>;

pub struct ChunkedStreamDecoder<U: Send + 'static> {
    chunks: ChunkList,
    units_per_chunk: u64,
    window_chunks: usize,
    window: Arc<PrefetchWindow<U>>,
    current: Option<Arc<UnitBuffer<U>>>,
    play_index: usize,
    position: Arc<AtomicU64>,
    interrupt: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    pending_skip: u64,
    pending_error: Option<StreamError>,
    scratch: Vec<U>,
    cmd_tx: Sender<Command<U>>,
    worker: Option<JoinHandle<()>>,
    spool: Option<Spool>,
    closed: bool,
}

impl<U: Send + 'static> ChunkedStreamDecoder<U> {
    /// Build the decoder and start prefetching from chunk 0.
    ///
    /// `units_per_chunk` is the nominal chunk length; it maps chunk indices to
    /// absolute unit positions after a seek.
    pub fn new(
        chunks: ChunkList,
        source: Arc<dyn ChunkSource>,
        factory: BoxedFactory<U>,
        units_per_chunk: u64,
        cfg: &PrefetchConfig,
    ) -> Result<Self, StreamError> {
        if chunks.is_empty() {
            return Err(StreamError::NoDataInput);
        }

        let spool = cfg.spool_dir.as_ref().map(Spool::new);
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = PrefetchWorker {
            chunks: chunks.clone(),
            source,
            factory,
            spool: spool.clone(),
            chunk_buffer_units: cfg.chunk_buffer_units,
            cancel: cancel.clone(),
        };
        let handle = std::thread::spawn(move || worker.run(cmd_rx));

        let mut decoder = Self {
            chunks,
            units_per_chunk: units_per_chunk.max(1),
            window_chunks: cfg.window_chunks,
            window: Arc::new(PrefetchWindow::new(cfg.window_chunks)),
            current: None,
            play_index: 0,
            position: Arc::new(AtomicU64::new(0)),
            interrupt: Arc::new(AtomicBool::new(false)),
            cancel,
            pending_skip: 0,
            pending_error: None,
            scratch: Vec::new(),
            cmd_tx,
            worker: Some(handle),
            spool,
            closed: false,
        };
        decoder.restart_at(0)?;
        Ok(decoder)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn units_per_chunk(&self) -> u64 {
        self.units_per_chunk
    }

    /// Chunk currently being drained.
    pub fn play_index(&self) -> usize {
        self.play_index
    }

    /// Next chunk the prefetch worker will load.
    ///
    /// Read from the live window, so a fill still running on a window that a
    /// seek discarded cannot move it.
    pub fn load_index(&self) -> usize {
        self.window.loaded_until()
    }

    /// Absolute position in units (units read plus skipped since the last seek origin).
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    /// Shared read position, readable without borrowing the decoder.
    pub fn position_handle(&self) -> Arc<AtomicU64> {
        self.position.clone()
    }

    /// Raising this flag makes a blocked [`read`](Self::read) return `Interrupted`.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Decoded units waiting in the window and the buffer being drained.
    pub fn buffered_units(&self) -> usize {
        let current = self.current.as_ref().map_or(0, |c| c.len_units());
        current + self.window.buffered_units()
    }

    /// Append up to `count` units to `out`, blocking while the next chunk is not ready.
    ///
    /// A prefetch failure is returned only after every unit decoded before it was
    /// delivered; a read that already produced units returns them and the error
    /// follows on the next call.
    pub fn read(&mut self, count: usize, out: &mut Vec<U>) -> Result<ReadStatus, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }

        let start = out.len();
        let mut state = ReadState::Open;
        while out.len() - start < count {
            if self.pending_skip > 0 {
                match self.drain_skip()? {
                    ReadState::Open => continue,
                    other => {
                        state = other;
                        break;
                    }
                }
            }
            let want = count - (out.len() - start);
            match self.take_into(want, out) {
                Ok(ReadState::Open) => {}
                Ok(other) => {
                    state = other;
                    break;
                }
                Err(err) if out.len() > start => {
                    self.pending_error = Some(err);
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        let units = out.len() - start;
        self.position.fetch_add(units as u64, Ordering::Relaxed);
        Ok(ReadStatus { units, state })
    }

    /// Drop the next `units` units. The skip is applied lazily by later reads.
    pub fn skip(&mut self, units: u64) {
        self.pending_skip = self.pending_skip.saturating_add(units);
        self.position.fetch_add(units, Ordering::Relaxed);
    }

    /// Reposition to a chunk boundary and re-prime the prefetch window.
    ///
    /// Returns the absolute chunk index. An out-of-range target fails with
    /// [`StreamError::InvalidOffset`] and leaves the decoder untouched.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<usize, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        let len = self.chunks.len();
        let base = match whence {
            Whence::Start => 0i64,
            Whence::Current => self.play_index as i64,
            Whence::End => len as i64,
        };
        let target = base
            .checked_add(offset)
            .filter(|t| (0..len as i64).contains(t))
            .ok_or(StreamError::InvalidOffset {
                offset: base.saturating_add(offset),
                len,
            })?;
        let target = target as usize;
        self.restart_at(target)?;
        tracing::debug!(chunk = target, chunks = len, "chunked stream repositioned");
        Ok(target)
    }

    /// Stop the prefetch worker and release every buffer and spool file. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.store(true, Ordering::Relaxed);
        self.discard_buffers();
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::warn!("prefetch worker panicked");
            }
        }
        if let Some(spool) = &self.spool {
            match spool.cleanup() {
                Ok(0) => {}
                Ok(n) => tracing::debug!(files = n, "spool files removed"),
                Err(e) => tracing::warn!("spool cleanup failed: {e}"),
            }
        }
    }

    fn restart_at(&mut self, index: usize) -> Result<(), StreamError> {
        self.discard_buffers();
        self.window = Arc::new(PrefetchWindow::starting_at(self.window_chunks, index));
        self.pending_skip = 0;
        self.pending_error = None;
        self.play_index = index;
        self.position
            .store(index as u64 * self.units_per_chunk, Ordering::Relaxed);
        self.cmd_tx
            .send(Command::Prefetch {
                window: self.window.clone(),
                start: index,
            })
            .map_err(|_| StreamError::Closed)
    }

    fn discard_buffers(&mut self) {
        self.window.discard();
        if let Some(current) = self.current.take() {
            current.discard();
        }
    }

    fn drain_skip(&mut self) -> Result<ReadState, StreamError> {
        let want = self.pending_skip.min(SKIP_BATCH as u64) as usize;
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        let res = self.take_into(want, &mut scratch);
        self.pending_skip -= scratch.len() as u64;
        scratch.clear();
        self.scratch = scratch;
        res
    }

    /// Take units from the buffer being drained, moving to the next chunk as needed.
    fn take_into(&mut self, want: usize, out: &mut Vec<U>) -> Result<ReadState, StreamError> {
        let slot = match &self.current {
            Some(slot) => slot.clone(),
            None => match self.window.pop(&self.interrupt) {
                Next::Ready(slot) => {
                    self.play_index = slot.index();
                    self.current = Some(slot.clone());
                    slot
                }
                Next::Ended => {
                    // Past the last chunk this window loaded, which is the
                    // final chunk unless a prefetch failure ended it early.
                    self.play_index = self.window.loaded_until();
                    return Ok(ReadState::Ended);
                }
                Next::Interrupted | Next::Discarded => return Ok(ReadState::Interrupted),
            },
        };

        match slot.take(want, out, &self.interrupt) {
            Take::Units(_) => Ok(ReadState::Open),
            Take::Drained => {
                self.current = None;
                Ok(ReadState::Open)
            }
            Take::Failed(err) => {
                self.current = None;
                Err(err)
            }
            Take::Interrupted | Take::Discarded => Ok(ReadState::Interrupted),
        }
    }
}

impl<U: Send + 'static> Drop for ChunkedStreamDecoder<U> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Background task that fills prefetch windows in chunk order.
struct PrefetchWorker<U> {
    chunks: ChunkList,
    source: Arc<dyn ChunkSource>,
    factory: BoxedFactory<U>,
    spool: Option<Spool>,
    chunk_buffer_units: usize,
    cancel: Arc<AtomicBool>,
}

/// Decoder of the last fully loaded chunk, kept so a seek back to it can rewind.
type Cached<U> = Option<(usize, Box<dyn FrameDecoder<Unit = U>>)>;

impl<U: Send + 'static> PrefetchWorker<U> {
    fn run(self, rx: Receiver<Command<U>>) {
        let mut cached: Cached<U> = None;
        while let Ok(cmd) = rx.recv() {
            match cmd {
                Command::Shutdown => break,
                Command::Prefetch { window, start } => {
                    self.fill(&window, start, &mut cached);
                }
            }
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
        }
        tracing::debug!("prefetch worker stopped");
    }

    fn fill(&self, window: &PrefetchWindow<U>, start: usize, cached: &mut Cached<U>) {
        for index in start..self.chunks.len() {
            if self.cancel.load(Ordering::Relaxed) || window.is_discarded() {
                return;
            }
            let slot = Arc::new(UnitBuffer::new(index, self.chunk_buffer_units));
            if !window.push_blocking(slot.clone()) {
                return;
            }

            let mut decoder = match self.decoder_for(index, cached) {
                Ok(dec) => dec,
                Err(err) => {
                    tracing::warn!(chunk = index, "prefetch failed: {err}");
                    slot.fail(err);
                    window.finish();
                    return;
                }
            };

            tracing::debug!(chunk = index, "prefetch started");
            let mut batch = Vec::with_capacity(DECODE_BATCH);
            loop {
                batch.clear();
                match decoder.read_units(DECODE_BATCH, &mut batch) {
                    Ok(read) => {
                        if !slot.push_blocking(batch.drain(..)) {
                            return;
                        }
                        if read.end_of_chunk || read.units == 0 {
                            break;
                        }
                    }
                    Err(source) => {
                        tracing::warn!(chunk = index, "decode failed: {source}");
                        slot.fail(StreamError::Decode { index, source });
                        window.finish();
                        return;
                    }
                }
            }
            slot.finish();
            tracing::debug!(chunk = index, "prefetch finished");
            *cached = Some((index, decoder));
        }
        window.finish();
    }

    fn decoder_for(
        &self,
        index: usize,
        cached: &mut Cached<U>,
    ) -> Result<Box<dyn FrameDecoder<Unit = U>>, StreamError> {
        if let Some((cached_index, mut dec)) = cached.take() {
            if cached_index == index {
                match dec.rewind() {
                    Ok(()) => {
                        tracing::debug!(chunk = index, "reusing decoder");
                        return Ok(dec);
                    }
                    Err(e) => tracing::debug!(chunk = index, "rewind failed, refetching: {e}"),
                }
            }
        }

        let id = self
            .chunks
            .get(index)
            .ok_or(StreamError::InvalidOffset {
                offset: index as i64,
                len: self.chunks.len(),
            })?;
        let payload = fetch_payload(self.source.as_ref(), id, self.spool.as_ref())
            .map_err(|source| StreamError::Fetch { index, source })?;
        self.factory
            .open(index, payload)
            .map_err(|source| StreamError::Decode { index, source })
    }
}
