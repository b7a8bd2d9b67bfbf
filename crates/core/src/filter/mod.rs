use std::fmt;

use crate::{Error, Result, TrackPhase, TrackState};

/// Observer taking part in a track's open/process/close lifecycle.
///
/// Every hook defaults to a no-op so implementations only override what they
/// care about. Hooks run on the owner context and receive the track only for
/// the duration of the call.
pub trait Filter {
    /// Name used in logs and in [`Error::OpenFailure`].
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// One-time setup. Called exactly once, when the filter joins a chain.
    fn init(&mut self) {}

    /// Called once per track start. An error aborts the track.
    fn open(&mut self, _track: &mut TrackState) -> Result<()> {
        Ok(())
    }

    /// Called once per track end, always after a successful `open`.
    fn close(&mut self, _track: &mut TrackState) {}

    /// Periodic reconciliation. An error asks the orchestrator to stop the track.
    fn process(&mut self, _track: &mut TrackState) -> Result<()> {
        Ok(())
    }
}

/// Handle returned by [`FilterChain::add`], used to remove the filter later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterId(u64);

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "filter#{}", self.0)
    }
}

struct Entry {
    id: FilterId,
    filter: Box<dyn Filter>,
}

/// Ordered registry of filters driving the open/process/close protocol.
///
/// Opening and processing walk the chain in registration order; closing
/// always walks it in reverse.
#[derive(Default)]
pub struct FilterChain {
    entries: Vec<Entry>,
    next_id: u64,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `filter` to the chain and runs its `init` hook.
    pub fn add(&mut self, mut filter: Box<dyn Filter>) -> FilterId {
        let id = FilterId(self.next_id);
        self.next_id += 1;
        filter.init();
        tracing::debug!(%id, filter = filter.name(), "filter added");
        self.entries.push(Entry { id, filter });
        id
    }

    /// Removes the filter registered under `id`, if any.
    ///
    /// No `close` is delivered: removing a filter mid-track leaves its `open`
    /// unmatched.
    pub fn remove(&mut self, id: FilterId) -> Option<Box<dyn Filter>> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        let entry = self.entries.remove(index);
        tracing::debug!(%id, filter = entry.filter.name(), "filter removed");
        Some(entry.filter)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: FilterId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    /// Opens every filter in registration order.
    ///
    /// On the first failure the track drops back to [`TrackPhase::None`] and
    /// the filters opened so far are closed in reverse order, just as on any
    /// other close. Filters after the failing one are never touched.
    pub fn open_all(&mut self, track: &mut TrackState) -> Result<()> {
        for index in 0..self.entries.len() {
            let entry = &mut self.entries[index];
            tracing::debug!(filter = entry.filter.name(), "opening filter");
            if let Err(err) = entry.filter.open(track) {
                let filter = entry.filter.name().to_string();
                tracing::error!(%filter, error = %err, "filter open failed");
                track.phase = TrackPhase::None;
                for opened in self.entries[..index].iter_mut().rev() {
                    tracing::debug!(filter = opened.filter.name(), "rolling back filter");
                    opened.filter.close(track);
                }
                return Err(Error::OpenFailure {
                    filter,
                    source: Box::new(err),
                });
            }
        }
        Ok(())
    }

    /// Closes every filter in reverse registration order.
    pub fn close_all(&mut self, track: &mut TrackState) {
        for entry in self.entries.iter_mut().rev() {
            tracing::debug!(filter = entry.filter.name(), "closing filter");
            entry.filter.close(track);
        }
    }

    /// Calls `process` on every filter in registration order.
    ///
    /// All filters run even if one fails; the first failure is returned.
    pub fn process_all(&mut self, track: &mut TrackState) -> Result<()> {
        let mut first_err = None;
        for entry in &mut self.entries {
            if let Err(err) = entry.filter.process(track) {
                tracing::warn!(filter = entry.filter.name(), error = %err, "filter process failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Lets a filter that joined mid-track catch up: one `open` and one
    /// `process`, only while a track is active.
    pub fn notify_late(&mut self, id: FilterId, track: &mut TrackState) -> Result<()> {
        if !track.is_active() {
            return Ok(());
        }
        let Some(entry) = self.entries.iter_mut().find(|entry| entry.id == id) else {
            return Ok(());
        };
        tracing::debug!(filter = entry.filter.name(), "late join");
        if let Err(err) = entry.filter.open(track) {
            return Err(Error::OpenFailure {
                filter: entry.filter.name().to_string(),
                source: Box::new(err),
            });
        }
        entry.filter.process(track)
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| entry.filter.name()))
            .finish()
    }
}
