//! Status snapshots for callers and the CLI.

use serde::Serialize;

use crate::track::TrackKind;

/// Coarse lifecycle state of one track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    Idle,
    Playing,
    Paused,
    Failed,
    Closed,
}

#[derive(Clone, Debug, Serialize)]
pub struct TrackStatus {
    pub kind: TrackKind,
    pub state: TrackState,
    pub played_ms: Option<u64>,
    pub duration_ms: u64,
    /// Failure that stopped the track, if any.
    pub error: Option<String>,
}

/// Drift-correction counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Ticks where every track was playing and times were compared.
    pub cycles: u64,
    /// Individual `wait` corrections issued.
    pub corrections: u64,
    /// The coordinator stopped after a played-time read failed.
    pub aborted: bool,
}

/// Snapshot returned by [`crate::player::MediaPlayer::status`].
#[derive(Clone, Debug, Serialize)]
pub struct PlayerStatus {
    pub playing: bool,
    pub pausing: bool,
    pub played_ms: Option<u64>,
    pub duration_ms: u64,
    /// At least one track stopped on an error while others may still run.
    pub degraded: bool,
    pub tracks: Vec<TrackStatus>,
    pub sync: SyncStats,
}

impl PlayerStatus {
    /// `elapsed / total` label, e.g. `01:05 / 03:00`.
    pub fn clock_label(&self) -> String {
        format!(
            "{} / {}",
            format_clock(self.played_ms.unwrap_or(0) / 1000),
            format_clock(self.duration_ms / 1000)
        )
    }
}

/// Render whole seconds as `mm:ss`, or `h:mm:ss` from one hour up.
pub fn format_clock(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs / 60) % 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_clock_switches_to_hours() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(65), "01:05");
        assert_eq!(format_clock(3599), "59:59");
        assert_eq!(format_clock(3600), "1:00:00");
        assert_eq!(format_clock(36_061), "10:01:01");
    }

    #[test]
    fn status_serializes_with_snake_case_states() {
        let status = PlayerStatus {
            playing: true,
            pausing: false,
            played_ms: Some(65_500),
            duration_ms: 180_000,
            degraded: true,
            tracks: vec![TrackStatus {
                kind: TrackKind::Video,
                state: TrackState::Failed,
                played_ms: None,
                duration_ms: 180_000,
                error: Some("chunk v2 not found".to_string()),
            }],
            sync: SyncStats::default(),
        };
        assert_eq!(status.clock_label(), "01:05 / 03:00");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["tracks"][0]["state"], "failed");
        assert_eq!(json["tracks"][0]["kind"], "video");
        assert_eq!(json["degraded"], true);
    }
}
