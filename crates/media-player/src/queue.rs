//! Thread-safe bounded queues for the prefetch window.
//!
//! Two levels, both guarded by a mutex + a single "state changed" [`Condvar`]:
//! - [`UnitBuffer`]: decoded units of one chunk, filled by the prefetch worker and
//!   drained by the track's tick loop
//! - [`PrefetchWindow`]: the ordered queue of chunk buffers ahead of playback
//!
//! Blocking waits poll an interrupt flag every [`INTERRUPT_POLL`] so a seek or close
//! issued from another thread can pull the reader out of a stalled fetch.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::StreamError;

pub(crate) const INTERRUPT_POLL: Duration = Duration::from_millis(50);

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of draining a [`UnitBuffer`].
#[derive(Debug)]
pub enum Take {
    /// This many units were appended to the output.
    Units(usize),
    /// Producer finished and every unit has been taken.
    Drained,
    /// Producer failed; units before the failure were already taken.
    Failed(StreamError),
    /// The interrupt flag was raised while waiting.
    Interrupted,
    /// The buffer was discarded by a seek or close.
    Discarded,
}

/// Decoded units of a single chunk.
pub struct UnitBuffer<U> {
    index: usize,
    max_units: usize,
    inner: Mutex<BufferInner<U>>,
    cv: Condvar,
}

struct BufferInner<U> {
    queue: VecDeque<U>,
    done: bool,
    error: Option<StreamError>,
    discarded: bool,
}

impl<U> UnitBuffer<U> {
    pub fn new(index: usize, max_units: usize) -> Self {
        Self {
            index,
            max_units: max_units.max(1),
            inner: Mutex::new(BufferInner {
                queue: VecDeque::new(),
                done: false,
                error: None,
                discarded: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Chunk index this buffer holds.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Units currently waiting to be drained (best-effort snapshot).
    pub fn len_units(&self) -> usize {
        lock(&self.inner).queue.len()
    }

    /// Push units, blocking while the buffer is full.
    ///
    /// Returns `false` (dropping the rest) once the buffer is discarded.
    pub fn push_blocking(&self, units: impl IntoIterator<Item = U>) -> bool {
        let mut units = units.into_iter().peekable();
        while units.peek().is_some() {
            let mut g = lock(&self.inner);
            while g.queue.len() >= self.max_units && !g.discarded {
                g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
            }
            if g.discarded {
                return false;
            }
            while g.queue.len() < self.max_units {
                match units.next() {
                    Some(u) => g.queue.push_back(u),
                    None => break,
                }
            }
            drop(g);
            self.cv.notify_all();
        }
        !lock(&self.inner).discarded
    }

    /// Mark the chunk as fully decoded.
    pub fn finish(&self) {
        let mut g = lock(&self.inner);
        g.done = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Mark the chunk as failed; the error is reported after buffered units drain.
    pub fn fail(&self, err: StreamError) {
        let mut g = lock(&self.inner);
        g.done = true;
        g.error = Some(err);
        drop(g);
        self.cv.notify_all();
    }

    /// Drop every buffered unit and wake all waiters. Idempotent.
    pub fn discard(&self) {
        let mut g = lock(&self.inner);
        g.discarded = true;
        g.queue.clear();
        drop(g);
        self.cv.notify_all();
    }

    /// Block until at least one unit is available, then append up to `max` to `out`.
    pub fn take(&self, max: usize, out: &mut Vec<U>, interrupt: &AtomicBool) -> Take {
        let mut g = lock(&self.inner);
        loop {
            if g.discarded {
                return Take::Discarded;
            }
            if !g.queue.is_empty() {
                break;
            }
            if g.done {
                return match g.error.take() {
                    Some(e) => Take::Failed(e),
                    None => Take::Drained,
                };
            }
            if interrupt.load(Ordering::Relaxed) {
                return Take::Interrupted;
            }
            let (ng, _timeout) = self
                .cv
                .wait_timeout(g, INTERRUPT_POLL)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }

        let n = g.queue.len().min(max);
        out.extend(g.queue.drain(..n));
        drop(g);
        self.cv.notify_all();
        Take::Units(n)
    }
}

/// Outcome of waiting on the [`PrefetchWindow`].
pub enum Next<T> {
    Ready(T),
    /// The window is terminal and empty.
    Ended,
    Interrupted,
    Discarded,
}

/// Bounded queue of chunk buffers prefetched ahead of playback.
///
/// Once [`PrefetchWindow::finish`] is called the window is terminal: closed for
/// writes, still drainable for reads.
pub struct PrefetchWindow<U> {
    capacity: usize,
    inner: Mutex<WindowInner<U>>,
    cv: Condvar,
    low_watermark_ms: AtomicU64,
}

struct WindowInner<U> {
    slots: VecDeque<Arc<UnitBuffer<U>>>,
    /// One past the highest chunk index pushed into this window.
    loaded_until: usize,
    finished: bool,
    discarded: bool,
}

impl<U> PrefetchWindow<U> {
    pub fn new(capacity: usize) -> Self {
        Self::starting_at(capacity, 0)
    }

    /// Window whose first chunk will be `first`.
    pub fn starting_at(capacity: usize, first: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(WindowInner {
                slots: VecDeque::new(),
                loaded_until: first,
                finished: false,
                discarded: false,
            }),
            cv: Condvar::new(),
            low_watermark_ms: AtomicU64::new(0),
        }
    }

    /// Chunk buffers currently queued (best-effort snapshot).
    pub fn len_slots(&self) -> usize {
        lock(&self.inner).slots.len()
    }

    /// Decoded units sitting in queued chunk buffers.
    pub fn buffered_units(&self) -> usize {
        lock(&self.inner).slots.iter().map(|s| s.len_units()).sum()
    }

    /// Next chunk index this window expects. Frozen once the window is
    /// discarded or finished.
    pub fn loaded_until(&self) -> usize {
        lock(&self.inner).loaded_until
    }

    pub fn is_discarded(&self) -> bool {
        lock(&self.inner).discarded
    }

    /// Queue a chunk buffer, blocking while the window is at capacity.
    ///
    /// Returns `false` if the window was discarded or finished.
    pub fn push_blocking(&self, slot: Arc<UnitBuffer<U>>) -> bool {
        let mut g = lock(&self.inner);
        while g.slots.len() >= self.capacity && !g.discarded {
            g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
        if g.discarded || g.finished {
            drop(g);
            slot.discard();
            return false;
        }
        g.loaded_until = g.loaded_until.max(slot.index() + 1);
        g.slots.push_back(slot);
        drop(g);
        self.cv.notify_all();
        true
    }

    /// Mark the window terminal: no more chunk buffers will be pushed.
    pub fn finish(&self) {
        let mut g = lock(&self.inner);
        g.finished = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Discard the window and every buffer in it; readers and the producer wake up.
    pub fn discard(&self) {
        let mut g = lock(&self.inner);
        g.discarded = true;
        let slots: Vec<_> = g.slots.drain(..).collect();
        drop(g);
        for slot in slots {
            slot.discard();
        }
        self.cv.notify_all();
    }

    /// Block until the next chunk buffer is queued or the window ends.
    pub fn pop(&self, interrupt: &AtomicBool) -> Next<Arc<UnitBuffer<U>>> {
        let mut g = lock(&self.inner);
        loop {
            if g.discarded {
                return Next::Discarded;
            }
            if let Some(slot) = g.slots.pop_front() {
                let remaining = g.slots.len();
                let finished = g.finished;
                drop(g);
                self.cv.notify_all();
                if remaining == 0 && !finished {
                    self.log_low_watermark(slot.index());
                }
                return Next::Ready(slot);
            }
            if g.finished {
                return Next::Ended;
            }
            if interrupt.load(Ordering::Relaxed) {
                return Next::Interrupted;
            }
            let (ng, _timeout) = self
                .cv
                .wait_timeout(g, INTERRUPT_POLL)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
    }

    fn log_low_watermark(&self, index: usize) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let last = self.low_watermark_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) > 1000 {
            self.low_watermark_ms.store(now, Ordering::Relaxed);
            tracing::debug!(chunk = index, "prefetch window empty behind current chunk");
        }
    }
}
