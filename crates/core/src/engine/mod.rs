//! Playback engine contract and the filter that adapts it to the chain.
//!
//! The engine itself (decoding, rendering) lives outside this crate. It is
//! only ever called from the owner context. Its asynchronous notifications
//! travel back through [`EngineCallbacks`] as [`EngineSignal`] messages, which
//! the owner drains and hands to the orchestrator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::{Filter, Result, TrackPhase, TrackState};

pub mod sim;

pub use sim::SimulatedEngine;

/// Platform media engine driven by [`EngineAdapter`].
pub trait PlaybackEngine {
    /// Begins asynchronous preparation of `url`. Readiness, completion and
    /// faults are reported later through `callbacks`. Fails synchronously on
    /// a malformed source.
    fn open_source(&mut self, url: &str, callbacks: EngineCallbacks) -> Result<()>;

    /// Starts rendering a prepared source.
    fn start(&mut self);

    fn pause(&mut self);

    fn resume(&mut self);

    fn seek_to(&mut self, position_ms: u64);

    fn position_ms(&self) -> u64;

    fn stop(&mut self) -> Result<()>;

    /// Returns the engine to its idle state, ready for another `open_source`.
    fn reset(&mut self);
}

/// Liveness flag shared between one engine session and the signals it emits.
///
/// The adapter revokes it when the track closes so that callbacks still in
/// flight are dropped instead of touching the next track.
#[derive(Debug, Clone)]
pub struct SessionToken(Arc<AtomicBool>);

impl SessionToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn revoke(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for SessionToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    Ready { duration_ms: u64 },
    Completed,
    Error { code: i32 },
}

/// Engine notification waiting to be handled on the owner context.
#[derive(Debug, Clone)]
pub struct EngineSignal {
    pub token: SessionToken,
    pub event: EngineEvent,
}

impl EngineSignal {
    pub fn is_live(&self) -> bool {
        self.token.is_live()
    }
}

/// Callback sink handed to the engine for one session. Safe to call from
/// any thread.
#[derive(Debug, Clone)]
pub struct EngineCallbacks {
    tx: Sender<EngineSignal>,
    token: SessionToken,
}

impl EngineCallbacks {
    pub fn new(tx: Sender<EngineSignal>, token: SessionToken) -> Self {
        Self { tx, token }
    }

    pub fn ready(&self, duration_ms: u64) {
        self.post(EngineEvent::Ready { duration_ms });
    }

    pub fn completed(&self) {
        self.post(EngineEvent::Completed);
    }

    pub fn error(&self, code: i32) {
        self.post(EngineEvent::Error { code });
    }

    fn post(&self, event: EngineEvent) {
        if !self.token.is_live() {
            tracing::trace!(?event, "suppressing callback from closed session");
            return;
        }
        if self
            .tx
            .send(EngineSignal {
                token: self.token.clone(),
                event,
            })
            .is_err()
        {
            tracing::debug!(?event, "owner context gone, dropping engine callback");
        }
    }
}

/// Converts a pending seek percentage into an absolute position.
pub fn seek_target_ms(percent: i32, duration_ms: u64) -> u64 {
    let percent = percent.clamp(0, 100) as u128;
    (percent * duration_ms as u128 / 100) as u64
}

/// Filter wrapping the playback engine. It is the only component that calls
/// into the engine.
pub struct EngineAdapter {
    engine: Box<dyn PlaybackEngine>,
    signals: Sender<EngineSignal>,
    session: Option<SessionToken>,
    paused: bool,
}

impl EngineAdapter {
    pub fn new(engine: Box<dyn PlaybackEngine>, signals: Sender<EngineSignal>) -> Self {
        Self {
            engine,
            signals,
            session: None,
            paused: false,
        }
    }

    /// Handles the engine's readiness: `Opening` becomes `Playing` and the
    /// engine starts rendering.
    pub fn on_ready(&mut self, track: &mut TrackState, duration_ms: u64) {
        if track.phase != TrackPhase::Opening {
            return;
        }
        tracing::debug!(url = %track.url, duration_ms, "prepared");
        track.phase = TrackPhase::Playing;
        track.time_total_ms = duration_ms;
        self.paused = false;
        self.engine.start();
    }

    pub fn position_ms(&self) -> u64 {
        self.engine.position_ms()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }
}

impl Filter for EngineAdapter {
    fn name(&self) -> &str {
        "engine"
    }

    fn open(&mut self, track: &mut TrackState) -> Result<()> {
        if let Some(stale) = self.session.take() {
            stale.revoke();
        }
        let token = SessionToken::new();
        let callbacks = EngineCallbacks::new(self.signals.clone(), token.clone());
        self.paused = false;
        if let Err(err) = self.engine.open_source(&track.url, callbacks) {
            token.revoke();
            return Err(err);
        }
        self.session = Some(token);
        Ok(())
    }

    fn close(&mut self, _track: &mut TrackState) {
        if let Some(token) = self.session.take() {
            token.revoke();
        }
        if let Err(err) = self.engine.stop() {
            tracing::debug!(error = %err, "engine stop on close");
        }
        self.engine.reset();
        self.paused = false;
    }

    fn process(&mut self, track: &mut TrackState) -> Result<()> {
        if track.has_pending_seek() {
            let target = seek_target_ms(track.seek_percent, track.time_total_ms);
            track.seek_percent = crate::SEEK_NONE;
            tracing::debug!(target_ms = target, "applying seek");
            self.engine.seek_to(target);
        }

        match track.phase {
            TrackPhase::Paused if !self.paused => {
                self.engine.pause();
                self.paused = true;
            }
            TrackPhase::Unpause => {
                track.phase = TrackPhase::Playing;
                self.engine.resume();
                self.paused = false;
            }
            _ => {}
        }
        Ok(())
    }
}
