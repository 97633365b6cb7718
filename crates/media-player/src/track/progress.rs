//! Progress track: a wall-clock counter feeding the progress label/slider.
//!
//! Its unit is one second by default; played time is the counter itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{Tick, Track, TrackEngine, TrackKind, TrackMonitor};
use crate::error::PlaybackError;
use crate::sink::ProgressSink;

pub type ProgressTrack = Track<ProgressEngine>;

impl Track<ProgressEngine> {
    /// Progress over `duration`, one step per second.
    pub fn new(duration: Duration, sink: Arc<dyn ProgressSink>) -> Self {
        Self::with_unit(duration, Duration::from_secs(1), sink)
    }

    /// Progress over `duration`, one step per `unit`.
    pub fn with_unit(duration: Duration, unit: Duration, sink: Arc<dyn ProgressSink>) -> Self {
        let unit = unit.max(Duration::from_millis(1));
        let total = duration.as_nanos().div_ceil(unit.as_nanos()) as u64;
        let counter = Arc::new(AtomicU64::new(0));
        Track::from_engine(ProgressEngine {
            monitor: Arc::new(ProgressMonitor {
                counter: counter.clone(),
                unit,
            }),
            counter,
            total,
            unit,
            duration,
            sink,
        })
    }
}

pub struct ProgressEngine {
    counter: Arc<AtomicU64>,
    monitor: Arc<ProgressMonitor>,
    total: u64,
    unit: Duration,
    duration: Duration,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressEngine {
    fn publish(&self, value: u64) -> bool {
        let secs = |steps: u64| (self.unit * steps as u32).as_secs();
        self.sink.update(secs(value), secs(self.total))
    }
}

impl TrackEngine for ProgressEngine {
    fn kind(&self) -> TrackKind {
        TrackKind::Progress
    }

    fn monitor(&self) -> Arc<dyn TrackMonitor> {
        self.monitor.clone()
    }

    fn period(&self) -> Duration {
        self.unit
    }

    fn duration(&self) -> Duration {
        self.duration
    }

    fn tick(&mut self) -> Result<Tick, PlaybackError> {
        let value = (self.counter.load(Ordering::Relaxed) + 1).min(self.total);
        self.counter.store(value, Ordering::Relaxed);
        if !self.publish(value) {
            return Err(PlaybackError::Output("progress display closed".into()));
        }
        Ok(if value >= self.total { Tick::End } else { Tick::Continue })
    }

    fn seek(&mut self, target: Duration) -> Result<(), PlaybackError> {
        let value = (target.as_nanos() / self.unit.as_nanos()) as u64;
        self.counter.store(value, Ordering::Relaxed);
        self.publish(value);
        Ok(())
    }

    fn clear_output(&mut self) {
        self.sink.clear();
    }

    fn release(&mut self) -> Result<(), PlaybackError> {
        Ok(())
    }
}

struct ProgressMonitor {
    counter: Arc<AtomicU64>,
    unit: Duration,
}

impl TrackMonitor for ProgressMonitor {
    fn played_time(&self) -> Duration {
        self.unit * self.counter.load(Ordering::Relaxed) as u32
    }
}
