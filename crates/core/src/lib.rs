//! Core library for the Trackline playback and recording orchestrator.
//!
//! A single playback track moves through a small state machine while an
//! ordered chain of [`Filter`]s observes it: filters open in registration
//! order, are processed on every position poll and close in reverse. The
//! media engine and the capture device stay behind traits; their callbacks
//! are marshaled onto one owner thread before they touch any state.

pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod media;
pub mod notify;
pub mod orchestrator;
pub mod owner;
pub mod poller;
pub mod record;
pub mod track;

pub use config::{AppConfig, PlayerConfig, RecordConfig};
pub use engine::{
    EngineAdapter, EngineCallbacks, EngineEvent, EngineSignal, PlaybackEngine, SessionToken,
    SimulatedEngine,
};
pub use error::{Error, Result};
pub use filter::{Filter, FilterChain, FilterId};
pub use media::{is_supported, is_supported_url};
pub use notify::{EventFilter, TraceFilter, TrackEvent};
pub use orchestrator::Orchestrator;
pub use owner::{Command, Player, Snapshot};
pub use poller::Poller;
pub use record::{CaptureDevice, FileCapture, RecordProfile, RecordSession, RecorderFactory};
pub use track::{TrackPhase, TrackState, SEEK_NONE};
