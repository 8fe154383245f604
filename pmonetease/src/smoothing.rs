//! Play/pause inference from coarse progress samples.
//!
//! The page offers no paused flag and updates the position at its own
//! refresh rate, so "playing" means the position moved recently. The cache
//! outlives sessions, which keeps a reconnect from looking like a pause.

use std::time::{Duration, Instant};

use crate::probes::ProgressSample;
use crate::state::PlaybackSnapshot;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingParams {
    /// How long an unchanged position still counts as playing.
    pub playing_threshold: Duration,
    /// Durations at or below this are treated as unreadable.
    pub duration_epsilon: f64,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            playing_threshold: Duration::from_millis(400),
            duration_epsilon: 0.1,
        }
    }
}

/// Last observed values, kept across polls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmoothingCache {
    pub last_time: f64,
    pub last_duration: f64,
    /// Instant of the last position change; `None` until one is seen.
    pub last_change: Option<Instant>,
    pub last_track_id: String,
}

impl SmoothingCache {
    /// Folds a successful poll taken at `now` into the cache and returns the
    /// resulting snapshot.
    pub fn observe(
        &mut self,
        sample: &ProgressSample,
        now: Instant,
        params: &SmoothingParams,
    ) -> PlaybackSnapshot {
        let is_playing = if sample.current_time != self.last_time {
            self.last_time = sample.current_time;
            self.last_change = Some(now);
            true
        } else {
            self.last_change
                .is_some_and(|at| now.saturating_duration_since(at) < params.playing_threshold)
        };

        if let Some(duration) = sample.total_duration {
            if duration > params.duration_epsilon {
                self.last_duration = duration;
            }
        }

        if let Some(id) = &sample.track_id {
            self.last_track_id.clone_from(id);
        }

        PlaybackSnapshot::new(
            self.last_time,
            self.last_duration,
            &self.last_track_id,
            is_playing,
        )
    }

    /// Snapshot published after a failed poll or a disconnect.
    pub fn fallback(&self) -> PlaybackSnapshot {
        PlaybackSnapshot::new(self.last_time, self.last_duration, &self.last_track_id, false)
    }
}
