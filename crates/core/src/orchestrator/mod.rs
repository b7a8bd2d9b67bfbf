//! Single-track playback state machine plus the independent recording slot.
//!
//! ```text
//! None --start--> Opening --ready--> Playing --pause--> Paused
//!                                       ^                 |
//!                                       +-- Unpause <-unpause
//! any active --stop / completion / engine error--> None
//! ```
//!
//! Every method must run on the owner context. Nothing here blocks.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use crossbeam_channel::Sender;

use crate::engine::{EngineAdapter, EngineEvent, EngineSignal, PlaybackEngine};
use crate::record::{RecordProfile, RecordSession, RecorderFactory};
use crate::{Error, Filter, FilterChain, FilterId, RecordConfig, Result, TrackPhase, TrackState};

/// Chain entry forwarding to the engine adapter the orchestrator also holds.
struct SharedEngine(Rc<RefCell<EngineAdapter>>);

impl Filter for SharedEngine {
    fn name(&self) -> &str {
        "engine"
    }

    fn open(&mut self, track: &mut TrackState) -> Result<()> {
        self.0.borrow_mut().open(track)
    }

    fn close(&mut self, track: &mut TrackState) {
        self.0.borrow_mut().close(track);
    }

    fn process(&mut self, track: &mut TrackState) -> Result<()> {
        self.0.borrow_mut().process(track)
    }
}

pub struct Orchestrator {
    play: TrackState,
    chain: FilterChain,
    engine: Rc<RefCell<EngineAdapter>>,
    recording: Option<RecordSession>,
    recorders: Box<dyn RecorderFactory>,
    record_config: RecordConfig,
    last_fault: Option<i32>,
}

impl Orchestrator {
    /// Builds the orchestrator around `engine`. The engine adapter becomes the
    /// first filter of the chain; its callbacks are delivered on `signals`.
    pub fn new(
        engine: Box<dyn PlaybackEngine>,
        signals: Sender<EngineSignal>,
        recorders: Box<dyn RecorderFactory>,
        record_config: RecordConfig,
    ) -> Self {
        let engine = Rc::new(RefCell::new(EngineAdapter::new(engine, signals)));
        let mut chain = FilterChain::new();
        chain.add(Box::new(SharedEngine(engine.clone())));
        tracing::debug!("orchestrator initialised");
        Self {
            play: TrackState::new(),
            chain,
            engine,
            recording: None,
            recorders,
            record_config,
            last_fault: None,
        }
    }

    pub fn state(&self) -> TrackPhase {
        self.play.phase
    }

    pub fn track(&self) -> &TrackState {
        &self.play
    }

    pub fn snapshot(&self) -> TrackState {
        self.play.clone()
    }

    pub fn filters(&self) -> &FilterChain {
        &self.chain
    }

    /// Code of the engine fault that ended the most recent track, if any.
    /// Cleared when the next track starts.
    pub fn last_fault(&self) -> Option<i32> {
        self.last_fault
    }

    /// Registers `filter` at the end of the chain. If a track is already
    /// active the filter immediately receives one `open` and one `process`.
    /// A filter that fails that late `open` is removed again.
    pub fn attach(&mut self, filter: Box<dyn Filter>) -> FilterId {
        let id = self.chain.add(filter);
        match self.chain.notify_late(id, &mut self.play) {
            Ok(()) => {}
            Err(err @ Error::OpenFailure { .. }) => {
                // Never opened, so it must not see this track's close.
                tracing::warn!(%id, error = %err, "late-joining filter dropped");
                self.chain.remove(id);
            }
            Err(err) => {
                tracing::warn!(%id, error = %err, "filter requested termination");
                self.stop();
            }
        }
        id
    }

    pub fn detach(&mut self, id: FilterId) -> bool {
        self.chain.remove(id).is_some()
    }

    /// Starts playing `url`. A no-op while another track is active.
    ///
    /// Returns once every filter has opened; the engine reports readiness
    /// later. If a filter refuses to open, the filters opened before it are
    /// closed again and the track stays inactive.
    pub fn start(&mut self, url: &str) -> Result<()> {
        tracing::debug!(url, "play");
        if self.play.is_active() {
            tracing::debug!(url, phase = ?self.play.phase, "track already active, ignoring start");
            return Ok(());
        }

        self.last_fault = None;
        self.play.begin(url);
        self.play.phase = TrackPhase::Opening;
        if let Err(err) = self.chain.open_all(&mut self.play) {
            tracing::error!(url, error = %err, "track open failed");
            self.play.clear();
            return Err(err);
        }
        Ok(())
    }

    /// Stops the track on user request. A no-op when nothing is playing.
    pub fn stop(&mut self) {
        tracing::debug!("stop");
        if !self.play.is_active() {
            return;
        }
        self.play.stopped = true;
        self.close_track();
    }

    pub fn pause(&mut self) {
        tracing::debug!("pause");
        if self.play.phase != TrackPhase::Playing {
            return;
        }
        self.play.phase = TrackPhase::Paused;
        self.process();
    }

    pub fn unpause(&mut self) {
        tracing::debug!("unpause");
        if self.play.phase != TrackPhase::Paused {
            return;
        }
        self.play.phase = TrackPhase::Unpause;
        self.process();
    }

    /// Queues a seek to `percent` of the duration, clamped to `0..=100`.
    /// Only honoured while playing or paused.
    pub fn seek(&mut self, percent: i32) {
        tracing::debug!(percent, "seek");
        if !self.play.phase.accepts_seek() {
            return;
        }
        self.play.seek_percent = percent.clamp(0, 100);
        self.process();
    }

    /// Records a new playback position and notifies the chain. Positions
    /// arriving outside `Playing` are stale and dropped.
    pub fn update(&mut self, pos_ms: u64) {
        if self.play.phase != TrackPhase::Playing {
            tracing::trace!(pos_ms, phase = ?self.play.phase, "discarding stale position");
            return;
        }
        self.play.pos_ms = pos_ms;
        self.process();
    }

    /// Poller tick: samples the engine position while playing.
    pub fn poll(&mut self) {
        if self.play.phase != TrackPhase::Playing {
            return;
        }
        let pos_ms = self.engine.borrow().position_ms();
        self.update(pos_ms);
    }

    /// Applies an engine notification that has been marshaled onto the owner.
    pub fn on_engine_signal(&mut self, signal: EngineSignal) {
        if !signal.is_live() {
            tracing::debug!(event = ?signal.event, "dropping signal from closed session");
            return;
        }
        match signal.event {
            EngineEvent::Ready { duration_ms } => {
                self.engine.borrow_mut().on_ready(&mut self.play, duration_ms);
            }
            EngineEvent::Completed => {
                tracing::debug!("completed");
                if !self.play.is_active() {
                    return;
                }
                self.play.stopped = false;
                self.close_track();
            }
            EngineEvent::Error { code } => {
                tracing::warn!(code, url = %self.play.url, "engine fault");
                if !self.play.is_active() {
                    return;
                }
                self.last_fault = Some(code);
                self.play.error = true;
                self.play.stopped = false;
                self.close_track();
            }
        }
    }

    /// Starts recording the microphone into `output`.
    pub fn record(&mut self, output: impl Into<PathBuf>) -> Result<TrackState> {
        let output = output.into();
        tracing::debug!(output = %output.display(), "record");
        if self.recording.is_some() {
            return Err(Error::RecordSetupFailure(
                "a recording is already in progress".into(),
            ));
        }
        let profile = RecordProfile::new(&self.record_config, output);
        let session = RecordSession::begin(self.recorders.as_ref(), &profile).map_err(|err| {
            tracing::error!(error = %err, "record setup failed");
            err
        })?;
        let track = session.track().clone();
        self.recording = Some(session);
        Ok(track)
    }

    /// Stops the active recording. Returns false if none was running.
    pub fn record_stop(&mut self) -> bool {
        let Some(session) = self.recording.take() else {
            return false;
        };
        tracing::debug!(output = %session.track().url, "record stop");
        if let Err(err) = session.finish() {
            tracing::error!(error = %err, "stopping capture device failed");
        }
        true
    }

    pub fn recording(&self) -> Option<&TrackState> {
        self.recording.as_ref().map(RecordSession::track)
    }

    /// Stops playback and recording ahead of owner shutdown.
    pub fn shutdown(&mut self) {
        self.stop();
        self.record_stop();
    }

    fn process(&mut self) {
        if let Err(err) = self.chain.process_all(&mut self.play) {
            tracing::warn!(error = %err, "filter requested termination");
            self.stop();
        }
    }

    fn close_track(&mut self) {
        tracing::debug!(
            url = %self.play.url,
            stopped = self.play.stopped,
            error = self.play.error,
            "close"
        );
        self.play.phase = TrackPhase::None;
        self.chain.close_all(&mut self.play);
        self.play.clear();
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("play", &self.play)
            .field("chain", &self.chain)
            .field("recording", &self.recording.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::{unbounded, Receiver};

    use super::*;
    use crate::engine::tests::{ScriptHandle, ScriptedEngine};
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::filter::tests::{log, CallLog, PhaseSpy, Probe};
    use crate::record::{CaptureDevice, FileCapture};
    use crate::SEEK_NONE;

    struct Harness {
        orch: Orchestrator,
        script: ScriptHandle,
        signals: Receiver<EngineSignal>,
    }

    impl Harness {
        fn new() -> Self {
            let (engine, script) = ScriptedEngine::new();
            let (tx, signals) = unbounded();
            let recorders = || -> Result<Box<dyn CaptureDevice>> { Ok(Box::new(FileCapture::new())) };
            let orch = Orchestrator::new(
                Box::new(engine),
                tx,
                Box::new(recorders),
                RecordConfig::default(),
            );
            Self {
                orch,
                script,
                signals,
            }
        }

        fn with_probe(log: &CallLog) -> Self {
            let mut harness = Self::new();
            harness.orch.attach(Box::new(Probe::new("p", log)));
            log.borrow_mut().clear();
            harness
        }

        /// Drains engine callbacks the way the owner loop does.
        fn pump(&mut self) {
            while let Ok(signal) = self.signals.try_recv() {
                self.orch.on_engine_signal(signal);
            }
        }

        fn fire_ready(&mut self, duration_ms: u64) {
            self.callbacks().ready(duration_ms);
            self.pump();
        }

        fn callbacks(&self) -> crate::EngineCallbacks {
            self.script.borrow().callbacks.clone().unwrap()
        }

        fn engine_calls(&self) -> Vec<String> {
            std::mem::take(&mut self.script.borrow_mut().calls)
        }

        fn playing(url: &str, duration_ms: u64) -> Self {
            let mut harness = Self::new();
            harness.orch.start(url).unwrap();
            harness.fire_ready(duration_ms);
            harness.engine_calls();
            harness
        }
    }

    fn taken(log: &CallLog) -> Vec<String> {
        std::mem::take(&mut *log.borrow_mut())
    }

    #[test]
    fn full_playback_session() {
        let mut h = Harness::new();
        h.orch.start("/music/song.mp3").unwrap();
        assert_eq!(h.orch.state(), TrackPhase::Opening);
        assert_eq!(h.orch.track().name, "song.mp3");

        h.fire_ready(180_000);
        assert_eq!(h.orch.state(), TrackPhase::Playing);
        assert_eq!(h.orch.track().time_total_ms, 180_000);

        h.orch.pause();
        assert_eq!(h.orch.state(), TrackPhase::Paused);

        h.orch.unpause();
        assert_eq!(h.orch.state(), TrackPhase::Playing);

        h.orch.seek(50);
        assert_eq!(h.orch.track().seek_percent, SEEK_NONE);
        assert_eq!(
            h.engine_calls(),
            [
                "open_source(/music/song.mp3)",
                "start",
                "pause",
                "resume",
                "seek_to(90000)"
            ]
        );
    }

    #[test]
    fn start_while_active_is_ignored() {
        let log = log();
        let mut h = Harness::with_probe(&log);
        h.orch.start("a.mp3").unwrap();
        taken(&log);

        h.orch.start("b.mp3").unwrap();
        assert!(taken(&log).is_empty());
        assert_eq!(h.orch.track().url, "a.mp3");
    }

    #[test]
    fn guarded_transitions_are_no_ops() {
        let log = log();
        let mut h = Harness::with_probe(&log);

        h.orch.pause();
        h.orch.unpause();
        h.orch.seek(10);
        assert!(taken(&log).is_empty());

        h.orch.start("a.mp3").unwrap();
        taken(&log);
        h.orch.unpause();
        h.orch.seek(10);
        h.orch.pause();
        assert!(taken(&log).is_empty());
        assert_eq!(h.orch.state(), TrackPhase::Opening);
        assert_eq!(h.orch.track().seek_percent, SEEK_NONE);
    }

    #[test]
    fn seek_is_clamped() {
        let mut h = Harness::playing("a.mp3", 10_000);
        h.orch.seek(150);
        h.orch.seek(-20);
        assert_eq!(h.engine_calls(), ["seek_to(10000)", "seek_to(0)"]);
    }

    #[test]
    fn stale_position_is_discarded() {
        let mut h = Harness::playing("a.mp3", 10_000);
        h.orch.update(1_000);
        assert_eq!(h.orch.track().pos_ms, 1_000);

        h.orch.pause();
        h.orch.update(2_000);
        assert_eq!(h.orch.track().pos_ms, 1_000);
    }

    #[test]
    fn poll_reads_engine_position() {
        let mut h = Harness::playing("a.mp3", 10_000);
        h.script.borrow_mut().position_ms = 4_200;
        h.orch.poll();
        assert_eq!(h.orch.track().pos_ms, 4_200);
    }

    #[test]
    fn stop_when_idle_does_nothing() {
        let log = log();
        let mut h = Harness::with_probe(&log);
        h.orch.stop();
        assert!(taken(&log).is_empty());
        assert_eq!(h.orch.state(), TrackPhase::None);
    }

    #[test]
    fn stop_marks_user_termination() {
        let log = log();
        let mut h = Harness::with_probe(&log);
        h.orch.start("a.mp3").unwrap();
        h.fire_ready(1_000);
        taken(&log);

        h.orch.stop();
        assert_eq!(taken(&log), ["p.close(stopped=true,error=false)"]);
        assert_eq!(*h.orch.track(), TrackState::default());
    }

    #[test]
    fn stop_before_ready_drops_late_ready() {
        let mut h = Harness::new();
        h.orch.start("track.mp3").unwrap();
        let callbacks = h.callbacks();

        h.orch.stop();
        assert_eq!(
            h.engine_calls(),
            ["open_source(track.mp3)", "stop", "reset"]
        );

        callbacks.ready(5_000);
        h.pump();
        assert_eq!(h.orch.state(), TrackPhase::None);
        assert_eq!(h.orch.track().time_total_ms, 0);
    }

    #[test]
    fn ready_queued_before_stop_is_dropped() {
        let mut h = Harness::new();
        h.orch.start("track.mp3").unwrap();
        h.callbacks().ready(5_000);
        h.orch.stop();
        h.pump();
        assert_eq!(h.orch.state(), TrackPhase::None);
    }

    #[test]
    fn engine_error_closes_with_error_flag() {
        let log = log();
        let mut h = Harness::with_probe(&log);
        h.orch.start("a.mp3").unwrap();
        h.fire_ready(1_000);
        taken(&log);

        h.callbacks().error(1);
        h.pump();

        assert_eq!(taken(&log), ["p.close(stopped=false,error=true)"]);
        assert!(!h.orch.track().error);
        assert_eq!(h.orch.state(), TrackPhase::None);
        assert_eq!(h.orch.last_fault(), Some(1));

        h.orch.start("b.mp3").unwrap();
        assert_eq!(h.orch.last_fault(), None);
    }

    #[test]
    fn completion_closes_as_natural_end() {
        let log = log();
        let mut h = Harness::with_probe(&log);
        h.orch.start("a.mp3").unwrap();
        h.fire_ready(1_000);
        taken(&log);

        h.callbacks().completed();
        h.callbacks().completed();
        h.pump();
        assert_eq!(taken(&log), ["p.close(stopped=false,error=false)"]);
    }

    #[test]
    fn failed_open_reports_and_rolls_back() {
        let log = log();
        let mut h = Harness::new();
        h.orch.attach(Box::new(Probe::new("a", &log)));
        h.orch.attach(Box::new(Probe::new("b", &log).failing_open()));
        h.orch.attach(Box::new(Probe::new("c", &log)));
        taken(&log);

        let err = h.orch.start("a.mp3").unwrap_err();
        assert!(matches!(err, Error::OpenFailure { .. }));
        assert_eq!(
            taken(&log),
            ["a.open", "b.open", "a.close(stopped=false,error=false)"]
        );
        assert_eq!(
            h.engine_calls(),
            ["open_source(a.mp3)", "stop", "reset"]
        );
        assert_eq!(h.orch.state(), TrackPhase::None);

        // Nothing stays open, so the next start runs the whole chain again.
        assert!(h.orch.start("a.mp3").is_err());
        assert_eq!(
            taken(&log),
            ["a.open", "b.open", "a.close(stopped=false,error=false)"]
        );
    }

    #[test]
    fn engine_rejecting_source_fails_start() {
        let log = log();
        let mut h = Harness::with_probe(&log);
        h.script.borrow_mut().reject_open = true;

        let err = h.orch.start("bad").unwrap_err();
        assert!(matches!(err, Error::OpenFailure { ref filter, .. } if filter == "engine"));
        assert!(taken(&log).is_empty());
    }

    #[test]
    fn process_failure_stops_track() {
        let log = log();
        let mut h = Harness::playing("a.mp3", 10_000);
        h.orch.attach(Box::new(Probe::new("p", &log).failing_process()));
        assert_eq!(h.orch.state(), TrackPhase::None);
        assert_eq!(
            taken(&log),
            [
                "p.init",
                "p.open",
                "p.process",
                "p.close(stopped=true,error=false)"
            ]
        );
    }

    #[test]
    fn late_filter_catches_up_once() {
        let log = log();
        let mut h = Harness::playing("a.mp3", 10_000);
        h.orch.attach(Box::new(Probe::new("late", &log)));
        assert_eq!(taken(&log), ["late.init", "late.open", "late.process"]);

        h.orch.update(500);
        assert_eq!(taken(&log), ["late.process"]);
    }

    #[test]
    fn late_filter_failing_open_is_dropped() {
        let log = log();
        let mut h = Harness::playing("a.mp3", 10_000);
        let before = h.orch.filters().len();

        let id = h.orch.attach(Box::new(Probe::new("late", &log).failing_open()));
        assert!(!h.orch.filters().contains(id));
        assert_eq!(h.orch.filters().len(), before);
        assert_eq!(h.orch.state(), TrackPhase::Playing);

        h.orch.stop();
        assert_eq!(taken(&log), ["late.init", "late.open"]);
    }

    #[test]
    fn filters_see_inactive_track_on_every_close() {
        let phases = Rc::new(RefCell::new(Vec::new()));
        let log = log();
        let mut h = Harness::new();
        h.orch.attach(Box::new(PhaseSpy(phases.clone())));

        h.orch.start("a.mp3").unwrap();
        h.orch.stop();

        let failing = h.orch.attach(Box::new(Probe::new("b", &log).failing_open()));
        assert!(h.orch.start("a.mp3").is_err());
        h.orch.detach(failing);

        h.orch.start("a.mp3").unwrap();
        h.fire_ready(1_000);
        h.callbacks().error(3);
        h.pump();

        assert_eq!(
            *phases.borrow(),
            [TrackPhase::None, TrackPhase::None, TrackPhase::None]
        );
    }

    #[test]
    fn detached_filter_misses_close() {
        let log = log();
        let mut h = Harness::playing("a.mp3", 10_000);
        let id = h.orch.attach(Box::new(Probe::new("gone", &log)));
        taken(&log);

        assert!(h.orch.detach(id));
        h.orch.stop();
        assert!(taken(&log).is_empty());
    }

    #[test]
    fn recording_is_independent_of_playback() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("memo.m4a");
        let mut h = Harness::playing("a.mp3", 10_000);

        let rec = h.orch.record(&output).unwrap();
        assert_eq!(rec.name, "memo.m4a");
        assert_eq!(rec.phase, TrackPhase::Playing);
        assert!(output.exists());
        assert!(matches!(
            h.orch.record(&output),
            Err(Error::RecordSetupFailure(_))
        ));

        h.orch.stop();
        assert!(h.orch.recording().is_some());
        assert!(h.orch.record_stop());
        assert!(!h.orch.record_stop());
    }

    #[test]
    fn record_setup_failure_leaves_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = Harness::new();
        let err = h
            .orch
            .record(dir.path().join("no-such-dir").join("memo.m4a"))
            .unwrap_err();
        assert!(matches!(err, Error::RecordSetupFailure(_)));
        assert!(h.orch.recording().is_none());
    }
}
