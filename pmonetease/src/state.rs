//! Published playback state.

use std::fmt;

use pmocdp::extract::truncate_utf8;
use serde::Serialize;

/// Size of the track id field of [`RawPlaybackState`], terminator included.
pub const TRACK_ID_CAPACITY: usize = 64;

/// Playback state as seen by callers of the driver.
///
/// Always replaced as a whole, so a reader never observes fields from two
/// different polls.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaybackSnapshot {
    pub current_progress: f64,
    pub total_duration: f64,
    /// At most 63 bytes, cut on a char boundary.
    pub track_id: String,
    pub is_playing: bool,
}

impl PlaybackSnapshot {
    pub fn new(current_progress: f64, total_duration: f64, track_id: &str, is_playing: bool) -> Self {
        Self {
            current_progress,
            total_duration,
            track_id: truncate_utf8(track_id, TRACK_ID_CAPACITY - 1).to_string(),
            is_playing,
        }
    }

    pub fn to_raw(&self) -> RawPlaybackState {
        RawPlaybackState::from(self)
    }
}

/// Fixed-size record handed across the C boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPlaybackState {
    pub current_progress: f64,
    pub total_duration: f64,
    /// NUL-terminated UTF-8.
    pub track_id: [u8; TRACK_ID_CAPACITY],
    pub is_playing: bool,
}

impl Default for RawPlaybackState {
    fn default() -> Self {
        Self {
            current_progress: 0.0,
            total_duration: 0.0,
            track_id: [0; TRACK_ID_CAPACITY],
            is_playing: false,
        }
    }
}

impl RawPlaybackState {
    /// Track id up to the first NUL byte.
    pub fn track_id(&self) -> &str {
        let end = self
            .track_id
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(TRACK_ID_CAPACITY);
        std::str::from_utf8(&self.track_id[..end]).unwrap_or("")
    }
}

impl From<&PlaybackSnapshot> for RawPlaybackState {
    fn from(snapshot: &PlaybackSnapshot) -> Self {
        let mut raw = RawPlaybackState {
            current_progress: snapshot.current_progress,
            total_duration: snapshot.total_duration,
            is_playing: snapshot.is_playing,
            ..Default::default()
        };
        let id = truncate_utf8(&snapshot.track_id, TRACK_ID_CAPACITY - 1).as_bytes();
        raw.track_id[..id.len()].copy_from_slice(id);
        raw
    }
}

/// Whether the driver currently holds an open session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}
