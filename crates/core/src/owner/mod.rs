//! The owner context: one thread that owns the orchestrator.
//!
//! Callers talk to it through [`Player`], engine callbacks arrive as
//! [`EngineSignal`]s and the [`Poller`] contributes position ticks. All three
//! are multiplexed by a single `select!` loop, so every state mutation and
//! filter callback happens sequentially on that thread.

use std::path::PathBuf;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};

use crate::engine::{EngineSignal, PlaybackEngine};
use crate::poller::Poller;
use crate::record::RecorderFactory;
use crate::{AppConfig, Error, Filter, FilterId, Orchestrator, Result, TrackState};

/// Requests accepted by the owner context.
pub enum Command {
    Start {
        url: String,
        reply: Sender<Result<()>>,
    },
    Stop,
    Pause,
    Unpause,
    Seek(i32),
    Record {
        output: PathBuf,
        reply: Sender<Result<TrackState>>,
    },
    RecordStop,
    Attach {
        filter: Box<dyn Filter + Send>,
        reply: Sender<FilterId>,
    },
    Detach(FilterId),
    Snapshot(Sender<Snapshot>),
    Shutdown,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Start { url, .. } => write!(f, "Start({url})"),
            Command::Stop => f.write_str("Stop"),
            Command::Pause => f.write_str("Pause"),
            Command::Unpause => f.write_str("Unpause"),
            Command::Seek(percent) => write!(f, "Seek({percent})"),
            Command::Record { output, .. } => write!(f, "Record({})", output.display()),
            Command::RecordStop => f.write_str("RecordStop"),
            Command::Attach { filter, .. } => write!(f, "Attach({})", filter.name()),
            Command::Detach(id) => write!(f, "Detach({id})"),
            Command::Snapshot(_) => f.write_str("Snapshot"),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Copy of the playback and recording records at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub play: TrackState,
    pub recording: Option<TrackState>,
    /// Engine fault code that ended the last track, if it ended that way.
    pub fault: Option<i32>,
}

/// Handle to the owner context. Cheap to share by reference across threads.
pub struct Player {
    cmd_tx: Sender<Command>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    /// Spawns the owner thread.
    ///
    /// `engine_factory` runs on the owner thread, so the engine it returns
    /// never has to cross threads.
    pub fn spawn<F>(
        config: &AppConfig,
        engine_factory: F,
        recorders: Box<dyn RecorderFactory + Send>,
    ) -> Result<Self>
    where
        F: FnOnce() -> Box<dyn PlaybackEngine> + Send + 'static,
    {
        config.validate()?;
        let (poller, ticks) = Poller::spawn(config.player.poll_interval())?;
        let (cmd_tx, cmd_rx) = unbounded();
        let record_config = config.record.clone();

        let thread = thread::Builder::new()
            .name("track-owner".to_string())
            .spawn(move || {
                let (signal_tx, signal_rx) = unbounded();
                let orchestrator =
                    Orchestrator::new(engine_factory(), signal_tx, recorders, record_config);
                run(orchestrator, cmd_rx, signal_rx, ticks, poller);
            })?;

        Ok(Self {
            cmd_tx,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Opens `url` and returns once every filter has accepted it.
    pub fn start(&self, url: impl Into<String>) -> Result<()> {
        let (reply, rx) = bounded(1);
        self.send(Command::Start {
            url: url.into(),
            reply,
        })?;
        rx.recv()?
    }

    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn unpause(&self) -> Result<()> {
        self.send(Command::Unpause)
    }

    pub fn seek(&self, percent: i32) -> Result<()> {
        self.send(Command::Seek(percent))
    }

    pub fn record(&self, output: impl Into<PathBuf>) -> Result<TrackState> {
        let (reply, rx) = bounded(1);
        self.send(Command::Record {
            output: output.into(),
            reply,
        })?;
        rx.recv()?
    }

    pub fn record_stop(&self) -> Result<()> {
        self.send(Command::RecordStop)
    }

    /// Adds `filter` to the chain, synchronising it with any active track.
    pub fn attach(&self, filter: Box<dyn Filter + Send>) -> Result<FilterId> {
        let (reply, rx) = bounded(1);
        self.send(Command::Attach { filter, reply })?;
        Ok(rx.recv()?)
    }

    pub fn detach(&self, id: FilterId) -> Result<()> {
        self.send(Command::Detach(id))
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        let (reply, rx) = bounded(1);
        self.send(Command::Snapshot(reply))?;
        Ok(rx.recv()?)
    }

    /// Stops playback and recording, then waits for the owner thread to exit.
    pub fn shutdown(&self) -> Result<()> {
        // Already gone is fine: the join below still reaps the thread.
        let _ = self.send(Command::Shutdown);
        let handle = self
            .thread
            .lock()
            .map_err(|_| Error::msg("owner thread handle has been poisoned"))?
            .take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| Error::msg("owner thread panicked"))?;
        }
        Ok(())
    }

    fn send(&self, cmd: Command) -> Result<()> {
        tracing::trace!(?cmd, "posting to owner");
        Ok(self.cmd_tx.send(cmd)?)
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(error = %err, "owner shutdown failed");
        }
    }
}

fn run(
    mut orchestrator: Orchestrator,
    commands: Receiver<Command>,
    signals: Receiver<EngineSignal>,
    ticks: Receiver<std::time::Instant>,
    mut poller: Poller,
) {
    tracing::debug!("owner context started");
    loop {
        select! {
            recv(commands) -> msg => {
                let Ok(cmd) = msg else { break };
                if !dispatch(&mut orchestrator, cmd) {
                    break;
                }
            }
            recv(signals) -> msg => {
                // The orchestrator holds a sender, so this never disconnects.
                if let Ok(signal) = msg {
                    orchestrator.on_engine_signal(signal);
                }
            }
            recv(ticks) -> msg => {
                if msg.is_err() {
                    break;
                }
                orchestrator.poll();
            }
        }
    }
    orchestrator.shutdown();
    poller.stop();
    tracing::debug!("owner context exited");
}

/// Applies one command. Returns false when the loop should exit.
fn dispatch(orchestrator: &mut Orchestrator, cmd: Command) -> bool {
    match cmd {
        Command::Start { url, reply } => {
            let _ = reply.send(orchestrator.start(&url));
        }
        Command::Stop => orchestrator.stop(),
        Command::Pause => orchestrator.pause(),
        Command::Unpause => orchestrator.unpause(),
        Command::Seek(percent) => orchestrator.seek(percent),
        Command::Record { output, reply } => {
            let _ = reply.send(orchestrator.record(output));
        }
        Command::RecordStop => {
            orchestrator.record_stop();
        }
        Command::Attach { filter, reply } => {
            let _ = reply.send(orchestrator.attach(filter));
        }
        Command::Detach(id) => {
            orchestrator.detach(id);
        }
        Command::Snapshot(reply) => {
            let _ = reply.send(Snapshot {
                play: orchestrator.snapshot(),
                recording: orchestrator.recording().cloned(),
                fault: orchestrator.last_fault(),
            });
        }
        Command::Shutdown => return false,
    }
    true
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::SimulatedEngine;
    use crate::notify::{EventFilter, TrackEvent};
    use crate::record::{CaptureDevice, FileCapture};
    use crate::TrackPhase;

    const WAIT: Duration = Duration::from_secs(2);

    fn player(duration_ms: u64) -> Player {
        let mut config = AppConfig::default();
        config.player.poll_interval_ms = 10;
        let recorders =
            || -> Result<Box<dyn CaptureDevice>> { Ok(Box::new(FileCapture::new())) };
        Player::spawn(
            &config,
            move || {
                Box::new(
                    SimulatedEngine::new(duration_ms).with_prepare_delay(Duration::from_millis(5)),
                ) as Box<dyn PlaybackEngine>
            },
            Box::new(recorders),
        )
        .unwrap()
    }

    fn wait_for<F>(events: &Receiver<TrackEvent>, mut pred: F) -> TrackEvent
    where
        F: FnMut(&TrackEvent) -> bool,
    {
        loop {
            let event = events.recv_timeout(WAIT).expect("timed out waiting for event");
            if pred(&event) {
                return event;
            }
        }
    }

    #[test]
    fn plays_to_natural_end() {
        let player = player(200);
        let (filter, events) = EventFilter::new();
        player.attach(Box::new(filter)).unwrap();

        player.start("/music/song.mp3").unwrap();
        wait_for(&events, |e| matches!(e, TrackEvent::Opened { .. }));
        let progress = wait_for(&events, |e| matches!(e, TrackEvent::Progress { .. }));
        assert!(matches!(progress, TrackEvent::Progress { total_ms: 200, .. }));

        let closed = wait_for(&events, |e| matches!(e, TrackEvent::Closed { .. }));
        assert!(matches!(
            closed,
            TrackEvent::Closed {
                stopped: false,
                error: false,
                ..
            }
        ));
        let snapshot = player.snapshot().unwrap();
        assert_eq!(snapshot.play.phase, TrackPhase::None);
        assert_eq!(snapshot.fault, None);
        player.shutdown().unwrap();
    }

    #[test]
    fn stop_while_opening_is_clean() {
        let player = player(10_000);
        let (filter, events) = EventFilter::new();
        player.attach(Box::new(filter)).unwrap();

        player.start("track.mp3").unwrap();
        player.stop().unwrap();
        let closed = wait_for(&events, |e| matches!(e, TrackEvent::Closed { .. }));
        assert!(matches!(closed, TrackEvent::Closed { stopped: true, .. }));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(player.snapshot().unwrap().play, TrackState::default());
    }

    #[test]
    fn unsupported_source_fails_start() {
        let player = player(1_000);
        let err = player.start("notes.txt").unwrap_err();
        assert!(matches!(err, Error::OpenFailure { .. }));
        assert_eq!(player.snapshot().unwrap().play.phase, TrackPhase::None);
    }

    #[test]
    fn pause_and_seek_through_handle() {
        let player = player(60_000);
        player.start("long.flac").unwrap();
        let deadline = std::time::Instant::now() + WAIT;
        while player.snapshot().unwrap().play.phase != TrackPhase::Playing {
            assert!(std::time::Instant::now() < deadline, "never became ready");
            std::thread::sleep(Duration::from_millis(5));
        }

        player.pause().unwrap();
        player.seek(50).unwrap();
        let snap = player.snapshot().unwrap();
        assert_eq!(snap.play.phase, TrackPhase::Paused);
        assert_eq!(snap.play.seek_percent, crate::SEEK_NONE);

        player.unpause().unwrap();
        assert_eq!(player.snapshot().unwrap().play.phase, TrackPhase::Playing);
    }

    #[test]
    fn records_alongside_playback() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("memo.m4a");
        let player = player(60_000);

        let rec = player.record(&output).unwrap();
        assert_eq!(rec.name, "memo.m4a");
        assert!(player.snapshot().unwrap().recording.is_some());

        player.record_stop().unwrap();
        assert!(player.snapshot().unwrap().recording.is_none());
    }

    #[test]
    fn commands_after_shutdown_report_disconnect() {
        let player = player(1_000);
        player.shutdown().unwrap();
        assert!(matches!(player.pause(), Err(Error::Disconnected)));
        assert!(matches!(player.start("a.mp3"), Err(Error::Disconnected)));
    }
}
