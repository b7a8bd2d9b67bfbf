use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};

use crate::config::MAX_POLL_INTERVAL_MS;
use crate::{Error, Result};

/// Timer thread that asks the owner context to sample the playback position.
///
/// Ticks travel through a single-slot channel: while the owner is busy,
/// further ticks are dropped instead of queueing up.
pub struct Poller {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Poller {
    /// Spawns the timer. Returns the poller and the receiver the owner
    /// should select on.
    pub fn spawn(interval: Duration) -> Result<(Self, Receiver<Instant>)> {
        if interval.is_zero() || interval > Duration::from_millis(MAX_POLL_INTERVAL_MS) {
            return Err(Error::Config(format!(
                "poll interval {interval:?} outside 1..={MAX_POLL_INTERVAL_MS} ms"
            )));
        }
        let (tick_tx, tick_rx) = bounded(1);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let thread = thread::Builder::new()
            .name("track-poller".to_string())
            .spawn(move || run(interval, tick_tx, stop_rx))?;

        Ok((
            Self {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            },
            tick_rx,
        ))
    }

    /// Stops the timer thread and waits for it to exit.
    pub fn stop(&mut self) {
        // Dropping the sender disconnects `stop_rx` and wakes the thread.
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(interval: Duration, ticks: Sender<Instant>, stop: Receiver<()>) {
    let timer = tick(interval);
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(timer) -> at => {
                let Ok(at) = at else { break };
                match ticks.try_send(at) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        }
    }
    tracing::debug!("poller stopped");
}
