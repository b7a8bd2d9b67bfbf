use serde::{Deserialize, Serialize};

/// Sentinel stored in [`TrackState::seek_percent`] when no seek is pending.
pub const SEEK_NONE: i32 = -1;

/// Lifecycle phase of a playback or recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackPhase {
    /// No active track. Initial and terminal phase.
    #[default]
    None,
    /// The engine is preparing the source; moves to `Playing` once ready.
    Opening,
    Playing,
    /// Paused by the caller; moves to `Unpause` when resumed.
    Paused,
    /// Resume requested; the engine adapter moves it back to `Playing`.
    Unpause,
}

impl TrackPhase {
    /// Returns true while a track is open (any phase but `None`).
    pub fn is_active(self) -> bool {
        self != TrackPhase::None
    }

    /// Phases in which a seek request may be queued.
    pub fn accepts_seek(self) -> bool {
        matches!(self, TrackPhase::Playing | TrackPhase::Paused)
    }
}

/// Mutable record describing one playback or one recording session.
///
/// The orchestrator owns the only instance per session kind. Filters borrow
/// it for the duration of a single callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackState {
    pub url: String,
    /// Display name derived from `url`.
    pub name: String,
    pub phase: TrackPhase,
    /// Closed by an explicit stop rather than completion or a fault.
    pub stopped: bool,
    /// The engine reported an error. Only meaningful during the close that follows.
    pub error: bool,
    pub pos_ms: u64,
    pub time_total_ms: u64,
    /// Pending seek as a percentage of the duration, or [`SEEK_NONE`].
    pub seek_percent: i32,
}

impl Default for TrackState {
    fn default() -> Self {
        Self {
            url: String::new(),
            name: String::new(),
            phase: TrackPhase::None,
            stopped: false,
            error: false,
            pos_ms: 0,
            time_total_ms: 0,
            seek_percent: SEEK_NONE,
        }
    }
}

impl TrackState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the record for a new session on `url`.
    pub fn begin(&mut self, url: &str) {
        *self = Self {
            url: url.to_string(),
            name: display_name(url),
            ..Self::default()
        };
    }

    /// Returns the record to its initial, inactive value.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    pub fn has_pending_seek(&self) -> bool {
        self.seek_percent != SEEK_NONE
    }
}

/// Derives the display name of a source: its last non-empty path segment.
///
/// Both `/` and `\` separate segments, so local Windows paths and URLs are
/// handled alike. Falls back to the whole string when there is no segment.
pub fn display_name(url: &str) -> String {
    url.rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .unwrap_or(url)
        .to_string()
}
