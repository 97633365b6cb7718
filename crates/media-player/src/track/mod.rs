//! Playback tracks.
//!
//! Every track variant shares one state machine, [`Track`], driven by a dedicated
//! tick loop thread:
//!
//! ```text
//! Idle --play--> Playing --pause--> Paused --play--> Playing
//!   ^               |                  |
//!   +---- end of stream / failure -----+        close: any state -> Closed
//! ```
//!
//! What a tick does (refill an audio sink, present one video frame, advance a
//! progress counter) lives in a [`TrackEngine`]. Lock-free reads of the played
//! time go through the engine's [`TrackMonitor`], so callers never contend with
//! a tick that is blocked on a slow chunk.

mod audio;
mod progress;
mod video;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;

pub use audio::{AudioEngine, AudioStream, AudioTrack};
pub use progress::{ProgressEngine, ProgressTrack};
pub use video::{VideoEngine, VideoStream, VideoTrack};

use crate::chunked::Whence;
use crate::error::PlaybackError;
use crate::queue::lock;
use crate::status::{TrackState, TrackStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
    Progress,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
            TrackKind::Progress => "progress",
        })
    }
}

/// Uniform control surface of every track.
///
/// All methods are safe to call concurrently with the track's own tick loop.
pub trait PlaybackTrack: Send + Sync {
    fn kind(&self) -> TrackKind;
    /// Start or resume. No-op while playing or after a failure (seek to recover).
    fn play(&self) -> Result<(), PlaybackError>;
    /// No-op unless playing.
    fn pause(&self);
    /// Hold output for `d`, then continue. Zero is a no-op.
    fn wait(&self, d: Duration);
    fn is_playing(&self) -> bool;
    fn is_pausing(&self) -> bool;
    fn played_time(&self) -> Result<Duration, PlaybackError>;
    fn duration(&self) -> Duration;
    /// Smallest step `played_time` moves by.
    fn resolution(&self) -> Duration;
    /// Reposition to `offset_ms` relative to `whence`; leaves the track paused.
    fn seek(&self, offset_ms: i64, whence: Whence) -> Result<Duration, PlaybackError>;
    /// Pause, seek to zero and blank the output.
    fn reset(&self) -> Result<(), PlaybackError>;
    /// Stop the loop and release resources. A second call fails with
    /// [`PlaybackError::AlreadyClosed`].
    fn close(&self) -> Result<(), PlaybackError>;
    fn is_closed(&self) -> bool;
    fn failure(&self) -> Option<String>;
    fn status(&self) -> TrackStatus;
}

/// Outcome of one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    Continue,
    End,
}

/// Per-variant behaviour driven by [`Track`].
pub trait TrackEngine: Send + 'static {
    fn kind(&self) -> TrackKind;
    fn monitor(&self) -> Arc<dyn TrackMonitor>;
    /// Wall-clock period between ticks.
    fn period(&self) -> Duration;
    fn duration(&self) -> Duration;
    fn tick(&mut self) -> Result<Tick, PlaybackError>;
    /// Reposition so the played time reads `target`.
    fn seek(&mut self, target: Duration) -> Result<(), PlaybackError>;
    fn clear_output(&mut self);
    fn release(&mut self) -> Result<(), PlaybackError>;
}

/// Lock-free view into a running engine.
pub trait TrackMonitor: Send + Sync {
    fn played_time(&self) -> Duration;
    fn suspend_output(&self) {}
    fn resume_output(&self) {}
    /// Pull a blocked tick out of its read.
    fn interrupt(&self) {}
    fn clear_interrupt(&self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Closed,
}

struct Control {
    state: RunState,
    /// Explicit pause.
    paused: bool,
    /// Temporary hold issued by `wait`.
    held: bool,
    failure: Option<String>,
}

struct Shared<E> {
    kind: TrackKind,
    duration: Duration,
    period: Duration,
    control: Mutex<Control>,
    cv: Condvar,
    engine: Mutex<E>,
    monitor: Arc<dyn TrackMonitor>,
}

/// Track state machine around a [`TrackEngine`].
pub struct Track<E: TrackEngine> {
    shared: Arc<Shared<E>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<E: TrackEngine> Track<E> {
    pub fn from_engine(engine: E) -> Self {
        let shared = Shared {
            kind: engine.kind(),
            duration: engine.duration(),
            period: engine.period().max(Duration::from_micros(100)),
            monitor: engine.monitor(),
            control: Mutex::new(Control {
                state: RunState::Idle,
                paused: false,
                held: false,
                failure: None,
            }),
            cv: Condvar::new(),
            engine: Mutex::new(engine),
        };
        Self {
            shared: Arc::new(shared),
            thread: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn position_ms(&self) -> i64 {
        self.shared.monitor.played_time().as_millis() as i64
    }
}

impl<E: TrackEngine> PlaybackTrack for Track<E> {
    fn kind(&self) -> TrackKind {
        self.shared.kind
    }

    fn play(&self) -> Result<(), PlaybackError> {
        let shared = &self.shared;
        let mut c = lock(&shared.control);
        match c.state {
            RunState::Closed => return Err(PlaybackError::Closed),
            RunState::Running => {
                if c.paused || c.held {
                    c.paused = false;
                    c.held = false;
                    shared.monitor.resume_output();
                    drop(c);
                    shared.cv.notify_all();
                    tracing::debug!(track = %shared.kind, "resumed");
                }
                return Ok(());
            }
            RunState::Idle => {
                if c.failure.is_some() {
                    tracing::debug!(track = %shared.kind, "play ignored on failed track");
                    return Ok(());
                }
                c.state = RunState::Running;
                c.paused = false;
                c.held = false;
            }
        }
        drop(c);
        shared.monitor.resume_output();

        let mut slot = lock(&self.thread);
        if let Some(previous) = slot.take() {
            let _ = previous.join();
        }
        let loop_shared = shared.clone();
        *slot = Some(std::thread::spawn(move || run_loop(loop_shared)));
        tracing::debug!(track = %shared.kind, "started");
        Ok(())
    }

    fn pause(&self) {
        let mut c = lock(&self.shared.control);
        if c.state != RunState::Running || c.paused {
            return;
        }
        c.paused = true;
        self.shared.monitor.suspend_output();
        drop(c);
        self.shared.cv.notify_all();
        tracing::debug!(track = %self.shared.kind, "paused");
    }

    fn wait(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        let shared = &self.shared;
        let mut c = lock(&shared.control);
        if c.state != RunState::Running || c.paused {
            return;
        }
        c.held = true;
        shared.monitor.suspend_output();
        shared.cv.notify_all();

        let deadline = Instant::now() + d;
        loop {
            if c.state != RunState::Running || !c.held {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (g, _) = shared
                .cv
                .wait_timeout(c, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            c = g;
        }

        if c.held {
            c.held = false;
            if c.state == RunState::Running && !c.paused {
                shared.monitor.resume_output();
            }
        }
        drop(c);
        shared.cv.notify_all();
    }

    fn is_playing(&self) -> bool {
        lock(&self.shared.control).state == RunState::Running
    }

    fn is_pausing(&self) -> bool {
        let c = lock(&self.shared.control);
        c.state == RunState::Running && (c.paused || c.held)
    }

    fn played_time(&self) -> Result<Duration, PlaybackError> {
        let c = lock(&self.shared.control);
        if c.state == RunState::Closed {
            return Err(PlaybackError::Closed);
        }
        if let Some(reason) = &c.failure {
            return Err(PlaybackError::TrackFailed {
                track: self.shared.kind,
                reason: reason.clone(),
            });
        }
        drop(c);
        Ok(self.shared.monitor.played_time())
    }

    fn duration(&self) -> Duration {
        self.shared.duration
    }

    fn resolution(&self) -> Duration {
        self.shared.period
    }

    fn seek(&self, offset_ms: i64, whence: Whence) -> Result<Duration, PlaybackError> {
        if self.is_closed() {
            return Err(PlaybackError::Closed);
        }
        let duration_ms = self.shared.duration.as_millis() as u64;
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => self.position_ms(),
            Whence::End => duration_ms as i64,
        };
        let requested_ms = base.saturating_add(offset_ms);
        if requested_ms < 0 || requested_ms as u64 >= duration_ms {
            return Err(PlaybackError::InvalidPosition {
                requested_ms,
                duration_ms,
            });
        }
        let target = Duration::from_millis(requested_ms as u64);

        self.pause();
        let monitor = &self.shared.monitor;
        monitor.interrupt();
        let result = {
            let mut engine = lock(&self.shared.engine);
            monitor.clear_interrupt();
            engine.seek(target)
        };
        result?;

        lock(&self.shared.control).failure = None;
        tracing::debug!(track = %self.shared.kind, target_ms = requested_ms, "seeked");
        Ok(target)
    }

    fn reset(&self) -> Result<(), PlaybackError> {
        self.seek(0, Whence::Start)?;
        lock(&self.shared.engine).clear_output();
        Ok(())
    }

    fn close(&self) -> Result<(), PlaybackError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(PlaybackError::AlreadyClosed);
        }
        let shared = &self.shared;
        {
            let mut c = lock(&shared.control);
            c.state = RunState::Closed;
            c.paused = false;
            c.held = false;
        }
        shared.cv.notify_all();
        shared.monitor.interrupt();

        if let Some(handle) = lock(&self.thread).take() {
            if handle.join().is_err() {
                tracing::warn!(track = %shared.kind, "tick loop panicked");
            }
        }
        let released = lock(&shared.engine).release();
        tracing::debug!(track = %shared.kind, "closed");
        released
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn failure(&self) -> Option<String> {
        lock(&self.shared.control).failure.clone()
    }

    fn status(&self) -> TrackStatus {
        let c = lock(&self.shared.control);
        let state = match c.state {
            RunState::Closed => TrackState::Closed,
            RunState::Idle if c.failure.is_some() => TrackState::Failed,
            RunState::Idle => TrackState::Idle,
            RunState::Running if c.paused || c.held => TrackState::Paused,
            RunState::Running => TrackState::Playing,
        };
        let error = c.failure.clone();
        drop(c);
        let played_ms = match state {
            TrackState::Closed | TrackState::Failed => None,
            _ => Some(self.shared.monitor.played_time().as_millis() as u64),
        };
        TrackStatus {
            kind: self.shared.kind,
            state,
            played_ms,
            duration_ms: self.shared.duration.as_millis() as u64,
            error,
        }
    }
}

impl<E: TrackEngine> Drop for Track<E> {
    fn drop(&mut self) {
        if !self.is_closed() {
            let _ = self.close();
        }
    }
}

/// Tick loop: sleep until the next scheduled tick, park while paused or held,
/// run one engine tick, repeat until the stream ends, fails or the track closes.
fn run_loop<E: TrackEngine>(shared: Arc<Shared<E>>) {
    let kind = shared.kind;
    let period = shared.period;
    let mut next = Instant::now() + period;

    loop {
        {
            let mut c = lock(&shared.control);
            // Part of the current tick still owed when the loop parked.
            let mut owed: Option<Duration> = None;
            loop {
                if c.state != RunState::Running {
                    return;
                }
                if c.paused || c.held {
                    if owed.is_none() {
                        owed = Some(next.saturating_duration_since(Instant::now()));
                    }
                    c = shared.cv.wait(c).unwrap_or_else(PoisonError::into_inner);
                    continue;
                }
                if let Some(left) = owed.take() {
                    // Parked time does not count toward the tick; time already
                    // spent on it before the park does.
                    next = Instant::now() + left;
                }
                let now = Instant::now();
                if now >= next {
                    break;
                }
                let (g, _) = shared
                    .cv
                    .wait_timeout(c, next - now)
                    .unwrap_or_else(PoisonError::into_inner);
                c = g;
            }
        }

        let outcome = {
            let mut engine = lock(&shared.engine);
            // A seek or hold may have landed while this loop waited for the engine.
            let c = lock(&shared.control);
            if c.state != RunState::Running {
                return;
            }
            if c.paused || c.held {
                continue;
            }
            drop(c);
            engine.tick()
        };
        match outcome {
            Ok(Tick::Continue) => {
                next = (next + period).max(Instant::now());
            }
            Ok(Tick::End) => {
                stop(&shared, None);
                tracing::info!(track = %kind, "track reached end of stream");
                return;
            }
            Err(e) => {
                tracing::error!(track = %kind, "track failed: {e}");
                stop(&shared, Some(e.to_string()));
                return;
            }
        }
    }
}

fn stop<E>(shared: &Shared<E>, failure: Option<String>) {
    let mut c = lock(&shared.control);
    if c.state == RunState::Running {
        c.state = RunState::Idle;
        c.paused = false;
        c.held = false;
    }
    if failure.is_some() {
        c.failure = failure;
    }
    drop(c);
    shared.cv.notify_all();
}
