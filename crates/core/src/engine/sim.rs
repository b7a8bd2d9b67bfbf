//! Clock-driven stand-in for a platform media engine.
//!
//! Nothing is decoded. Preparation completes on a worker thread after a
//! fixed delay, the position follows the wall clock, and the worker reports
//! completion once the configured duration has been played.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use super::{EngineCallbacks, PlaybackEngine};
use crate::{media, Error, Result};

const DEFAULT_PREPARE_DELAY: Duration = Duration::from_millis(20);

enum Control {
    /// Playing: complete after `remaining` unless told otherwise.
    Run { remaining: Duration },
    /// Paused: no completion deadline.
    Hold,
    Quit,
}

#[derive(Debug, Default)]
struct Clock {
    offset_ms: u64,
    resumed_at: Option<Instant>,
}

impl Clock {
    fn position_ms(&self, duration_ms: u64) -> u64 {
        let running = self
            .resumed_at
            .map(|at| at.elapsed().as_millis() as u64)
            .unwrap_or(0);
        (self.offset_ms + running).min(duration_ms)
    }
}

struct Session {
    ctl: Sender<Control>,
    clock: Clock,
    _worker: JoinHandle<()>,
}

/// Engine simulating a source of fixed duration.
pub struct SimulatedEngine {
    duration_ms: u64,
    prepare_delay: Duration,
    session: Option<Session>,
}

impl SimulatedEngine {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            prepare_delay: DEFAULT_PREPARE_DELAY,
            session: None,
        }
    }

    pub fn with_prepare_delay(mut self, delay: Duration) -> Self {
        self.prepare_delay = delay;
        self
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    fn send(&self, control: Control) {
        if let Some(session) = &self.session {
            // The worker exits after completing; nothing to tell it then.
            let _ = session.ctl.send(control);
        }
    }

    fn run_from_clock(&mut self) {
        let duration_ms = self.duration_ms;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let position = session.clock.position_ms(duration_ms);
        session.clock.offset_ms = position;
        session.clock.resumed_at = Some(Instant::now());
        let remaining = Duration::from_millis(duration_ms - position);
        self.send(Control::Run { remaining });
    }

    fn end_session(&mut self) -> bool {
        match self.session.take() {
            Some(session) => {
                let _ = session.ctl.send(Control::Quit);
                true
            }
            None => false,
        }
    }
}

impl PlaybackEngine for SimulatedEngine {
    fn open_source(&mut self, url: &str, callbacks: EngineCallbacks) -> Result<()> {
        if !media::is_supported(url) {
            return Err(Error::Engine(format!("unsupported source `{url}`")));
        }
        self.end_session();

        let (ctl, ctl_rx) = unbounded();
        let delay = self.prepare_delay;
        let duration_ms = self.duration_ms;
        let worker = thread::Builder::new()
            .name("sim-engine".to_string())
            .spawn(move || run_worker(ctl_rx, callbacks, delay, duration_ms))?;

        self.session = Some(Session {
            ctl,
            clock: Clock::default(),
            _worker: worker,
        });
        Ok(())
    }

    fn start(&mut self) {
        self.run_from_clock();
    }

    fn pause(&mut self) {
        let duration_ms = self.duration_ms;
        if let Some(session) = self.session.as_mut() {
            session.clock.offset_ms = session.clock.position_ms(duration_ms);
            session.clock.resumed_at = None;
        }
        self.send(Control::Hold);
    }

    fn resume(&mut self) {
        self.run_from_clock();
    }

    fn seek_to(&mut self, position_ms: u64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.clock.offset_ms = position_ms.min(self.duration_ms);
        if session.clock.resumed_at.is_some() {
            session.clock.resumed_at = None;
            self.run_from_clock();
        }
    }

    fn position_ms(&self) -> u64 {
        self.session
            .as_ref()
            .map(|session| session.clock.position_ms(self.duration_ms))
            .unwrap_or(0)
    }

    fn stop(&mut self) -> Result<()> {
        if self.end_session() {
            Ok(())
        } else {
            Err(Error::engine("stop called without an open source"))
        }
    }

    fn reset(&mut self) {
        self.end_session();
    }
}

fn run_worker(
    ctl: Receiver<Control>,
    callbacks: EngineCallbacks,
    prepare_delay: Duration,
    duration_ms: u64,
) {
    let ready_at = Instant::now() + prepare_delay;
    loop {
        match ctl.recv_deadline(ready_at) {
            Err(RecvTimeoutError::Timeout) => break,
            Ok(Control::Quit) | Err(RecvTimeoutError::Disconnected) => return,
            Ok(_) => continue,
        }
    }
    callbacks.ready(duration_ms);

    let mut deadline: Option<Instant> = None;
    loop {
        let msg = match deadline {
            Some(at) => ctl.recv_deadline(at),
            None => ctl.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match msg {
            Ok(Control::Run { remaining }) => deadline = Some(Instant::now() + remaining),
            Ok(Control::Hold) => deadline = None,
            Ok(Control::Quit) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {
                callbacks.completed();
                return;
            }
        }
    }
}
