//! Periodic drift correction across tracks.
//!
//! Every interval, when all healthy tracks are playing and unpaused, the
//! coordinator reads their played times and holds each track that is ahead of
//! the slowest one for its lead. No track's output position is ever
//! rewound; the slowest track simply catches up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Sender, select};

use crate::error::PlaybackError;
use crate::status::SyncStats;
use crate::track::PlaybackTrack;

pub type SharedTrack = Arc<dyn PlaybackTrack>;

/// Result of one reconciliation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconcile {
    /// Some track was not playing; nothing compared.
    Skipped,
    /// Times were compared and this many tracks were held back.
    Aligned { corrections: usize },
}

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    corrections: AtomicU64,
    aborted: AtomicBool,
}

pub struct SyncCoordinator {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl SyncCoordinator {
    /// Spawn the coordinator thread over `tracks`.
    pub fn start(tracks: Vec<SharedTrack>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let counters = Arc::new(Counters::default());
        let thread_counters = counters.clone();
        let handle = std::thread::spawn(move || {
            let ticker = crossbeam_channel::tick(interval);
            tracing::debug!(interval_ms = interval.as_millis() as u64, "sync coordinator started");
            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => match reconcile_once(&tracks) {
                        Ok(Reconcile::Skipped) => {}
                        Ok(Reconcile::Aligned { corrections }) => {
                            thread_counters.cycles.fetch_add(1, Ordering::Relaxed);
                            thread_counters
                                .corrections
                                .fetch_add(corrections as u64, Ordering::Relaxed);
                        }
                        Err(e) => {
                            tracing::warn!("sync coordinator stopped: {e}");
                            thread_counters.aborted.store(true, Ordering::Relaxed);
                            break;
                        }
                    },
                }
            }
            tracing::debug!("sync coordinator exited");
        });
        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            counters,
        }
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            corrections: self.counters.corrections.load(Ordering::Relaxed),
            aborted: self.counters.aborted.load(Ordering::Relaxed),
        }
    }

    /// Whether the coordinator thread is still alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the coordinator to exit after its current pass, without waiting.
    pub fn signal_stop(&mut self) {
        self.stop_tx.take();
    }

    /// Stop and join the coordinator.
    pub fn stop(&mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("sync coordinator panicked");
            }
        }
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One drift-correction pass.
///
/// Closed and failed tracks are left out. A played-time read that fails for any
/// other reason is returned and ends the coordinator.
pub fn reconcile_once(tracks: &[SharedTrack]) -> Result<Reconcile, PlaybackError> {
    let healthy: Vec<&SharedTrack> = tracks
        .iter()
        .filter(|t| !t.is_closed() && t.failure().is_none())
        .collect();
    if healthy.iter().any(|t| !t.is_playing() || t.is_pausing()) {
        return Ok(Reconcile::Skipped);
    }

    let mut samples: Vec<(&SharedTrack, Duration)> = Vec::with_capacity(healthy.len());
    for track in healthy {
        match track.played_time() {
            Ok(t) => samples.push((track, t)),
            Err(PlaybackError::TrackFailed { track, reason }) => {
                tracing::debug!(%track, "excluded from sync: {reason}");
            }
            Err(e) => return Err(e),
        }
    }
    if samples.len() < 2 {
        return Ok(Reconcile::Skipped);
    }

    // A reading may trail the true position by up to one resolution step, so
    // the reference is the earliest point any track can actually be at.
    let Some((slowest, reference)) = samples
        .iter()
        .map(|&(track, t)| (track, t + track.resolution()))
        .min_by_key(|&(_, upper)| upper)
    else {
        return Ok(Reconcile::Skipped);
    };
    let holds: Vec<(&SharedTrack, Duration)> = samples
        .iter()
        .filter_map(|&(track, t)| {
            let lead = t.checked_sub(reference)?;
            (lead > track.resolution()).then_some((track, lead))
        })
        .collect();

    for (track, lead) in &holds {
        tracing::info!(
            track = %track.kind(),
            lead_ms = lead.as_millis() as u64,
            behind = %slowest.kind(),
            "correcting drift"
        );
    }
    std::thread::scope(|s| {
        for &(track, lead) in &holds {
            s.spawn(move || track.wait(lead));
        }
    });
    Ok(Reconcile::Aligned {
        corrections: holds.len(),
    })
}
