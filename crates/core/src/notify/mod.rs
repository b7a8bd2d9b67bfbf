//! Filters that observe the lifecycle on behalf of outside consumers.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::{Filter, Result, TrackPhase, TrackState};

/// Lifecycle notification published by [`EventFilter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackEvent {
    Opened {
        url: String,
        name: String,
    },
    Progress {
        phase: TrackPhase,
        pos_ms: u64,
        total_ms: u64,
    },
    Closed {
        url: String,
        stopped: bool,
        error: bool,
    },
}

/// Forwards every lifecycle callback to a channel as a [`TrackEvent`].
///
/// A disconnected receiver is not an error: the filter keeps running and
/// simply stops publishing.
#[derive(Debug)]
pub struct EventFilter {
    tx: Sender<TrackEvent>,
}

impl EventFilter {
    pub fn new() -> (Self, Receiver<TrackEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    fn publish(&self, event: TrackEvent) {
        let _ = self.tx.send(event);
    }
}

impl Filter for EventFilter {
    fn name(&self) -> &str {
        "events"
    }

    fn open(&mut self, track: &mut TrackState) -> Result<()> {
        self.publish(TrackEvent::Opened {
            url: track.url.clone(),
            name: track.name.clone(),
        });
        Ok(())
    }

    fn close(&mut self, track: &mut TrackState) {
        self.publish(TrackEvent::Closed {
            url: track.url.clone(),
            stopped: track.stopped,
            error: track.error,
        });
    }

    fn process(&mut self, track: &mut TrackState) -> Result<()> {
        self.publish(TrackEvent::Progress {
            phase: track.phase,
            pos_ms: track.pos_ms,
            total_ms: track.time_total_ms,
        });
        Ok(())
    }
}

/// Logs the lifecycle through `tracing` at info level.
#[derive(Debug, Default)]
pub struct TraceFilter {
    last_second: Option<u64>,
}

impl TraceFilter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Filter for TraceFilter {
    fn name(&self) -> &str {
        "trace"
    }

    fn open(&mut self, track: &mut TrackState) -> Result<()> {
        self.last_second = None;
        tracing::info!(name = %track.name, url = %track.url, "opening");
        Ok(())
    }

    fn close(&mut self, track: &mut TrackState) {
        let cause = match (track.stopped, track.error) {
            (_, true) => "error",
            (true, false) => "stopped",
            (false, false) => "finished",
        };
        tracing::info!(name = %track.name, cause, "closed");
    }

    fn process(&mut self, track: &mut TrackState) -> Result<()> {
        // One line per second of progress is plenty.
        let second = track.pos_ms / 1000;
        if self.last_second != Some(second) {
            self.last_second = Some(second);
            tracing::info!(
                phase = ?track.phase,
                pos = %format_ms(track.pos_ms),
                total = %format_ms(track.time_total_ms),
                "progress"
            );
        }
        Ok(())
    }
}

/// Formats milliseconds as `m:ss`.
pub fn format_ms(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}
