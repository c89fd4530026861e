//! The reconciliation core.
//!
//! Tracks the server-confirmed state, changes sent but not yet answered,
//! the delta still being batched, and spec sources queued before the first
//! baseline. It performs no I/O: every operation records the notifications
//! and callbacks it causes in [`Effects`], which the caller performs once the
//! state is consistent again.

use crate::context::Context;
use crate::id::IdAllocator;
use crate::reduce::{reduce, Reduction};
use crate::spec::{SpecSource, SyncMarker};
use shared_reducer_protocol::{ClientMessage, CorrelationId, ServerMessage};
use std::mem;
use std::sync::Arc;
use tracing::debug;

/// Reason given to sync markers of changes dropped by a fresh baseline.
pub(crate) const SUPERSEDED: &str = "superseded by a new baseline";

/// Snapshot of the reconciliation queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReducerStats {
    /// Whether a baseline has been received.
    pub initialised: bool,
    /// Changes sent and awaiting a server response.
    pub outstanding: usize,
    /// Whether a delta is waiting for the next flush.
    pub batching: bool,
    /// Spec sources queued before the first baseline.
    pub queued_before_init: usize,
    /// Most recently allocated correlation id.
    pub last_id: CorrelationId,
}

struct States<T> {
    server: Arc<T>,
    local: Arc<T>,
}

struct LocalChange<T, D> {
    delta: D,
    id: CorrelationId,
    markers: Vec<SyncMarker<T>>,
}

/// Work to perform after an operation, outside the lock.
pub(crate) struct Effects<T> {
    pub(crate) changed: Option<Arc<T>>,
    pub(crate) resolved: Vec<(SyncMarker<T>, Arc<T>)>,
    pub(crate) rejected: Vec<(SyncMarker<T>, String)>,
    pub(crate) warnings: Vec<String>,
    pub(crate) errors: Vec<String>,
    pub(crate) flush: bool,
}

impl<T> Default for Effects<T> {
    fn default() -> Self {
        Self {
            changed: None,
            resolved: Vec::new(),
            rejected: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            flush: false,
        }
    }
}

type Source<C> = SpecSource<<C as Context>::State, <C as Context>::Delta>;

pub(crate) struct Reconciler<C: Context> {
    context: Arc<C>,
    states: Option<States<C::State>>,
    batching: Option<C::Delta>,
    batching_markers: Vec<SyncMarker<C::State>>,
    outstanding: Vec<LocalChange<C::State, C::Delta>>,
    queued: Vec<Source<C>>,
    ids: IdAllocator,
}

impl<C: Context> Reconciler<C> {
    pub(crate) fn new(context: Arc<C>) -> Self {
        Self {
            context,
            states: None,
            batching: None,
            batching_markers: Vec::new(),
            outstanding: Vec::new(),
            queued: Vec::new(),
            ids: IdAllocator::new(),
        }
    }

    /// Current local state, if a baseline has arrived.
    pub(crate) fn state(&self) -> Option<Arc<C::State>> {
        self.states.as_ref().map(|states| Arc::clone(&states.local))
    }

    pub(crate) fn stats(&self) -> ReducerStats {
        ReducerStats {
            initialised: self.states.is_some(),
            outstanding: self.outstanding.len(),
            batching: self.batching.is_some(),
            queued_before_init: self.queued.len(),
            last_id: self.ids.last_id(),
        }
    }

    pub(crate) fn dispatch(&mut self, sources: Vec<Source<C>>, effects: &mut Effects<C::State>) {
        if sources.is_empty() {
            return;
        }
        if self.states.is_none() {
            self.queued.extend(sources);
            return;
        }
        if let Some(local) = self.apply(sources, effects) {
            effects.changed = Some(local);
        }
    }

    /// Moves the batching delta into a new outstanding record.
    pub(crate) fn flush(&mut self) -> Option<ClientMessage<C::Delta>> {
        let delta = self.batching.take()?;
        let id = self.ids.next_id();
        let markers = mem::take(&mut self.batching_markers);
        self.outstanding.push(LocalChange {
            delta: delta.clone(),
            id,
            markers,
        });
        Some(ClientMessage::new(delta, id))
    }

    /// Interprets one inbound message.
    ///
    /// `raw` is the message text, rendered only when it may be needed for a
    /// warning.
    pub(crate) fn receive(
        &mut self,
        message: ServerMessage<C::State, C::Delta>,
        raw: Option<&str>,
        effects: &mut Effects<C::State>,
    ) {
        match message {
            ServerMessage::Init(state) => self.handle_init(Arc::new(state), effects),
            ServerMessage::Change { delta, id } => self.handle_change(delta, id, raw, effects),
            ServerMessage::Error { error, id } => self.handle_error(error, id, effects),
        }
    }

    /// Drops all state. Unresolved sync markers are discarded without firing.
    pub(crate) fn close(&mut self) {
        self.states = None;
        self.batching = None;
        self.batching_markers.clear();
        self.outstanding.clear();
        self.queued.clear();
    }

    /// Runs a reduction against the local state; returns the new local
    /// state if it changed.
    fn apply(
        &mut self,
        sources: Vec<Source<C>>,
        effects: &mut Effects<C::State>,
    ) -> Option<Arc<C::State>> {
        let old_local = Arc::clone(&self.states.as_ref()?.local);
        let context = Arc::clone(&self.context);

        let Self {
            batching,
            batching_markers,
            outstanding,
            ..
        } = &mut *self;
        let resolved = &mut effects.resolved;

        let Reduction { state, delta } = reduce(
            context.as_ref(),
            Arc::clone(&old_local),
            sources,
            |marker, running| {
                if Arc::ptr_eq(running, &old_local) && batching.is_none() {
                    match outstanding.last_mut() {
                        Some(change) => change.markers.push(marker),
                        // Fully settled: nothing precedes the marker.
                        None => resolved.push((marker, Arc::clone(running))),
                    }
                } else {
                    batching_markers.push(marker);
                }
            },
        );

        if Arc::ptr_eq(&state, &old_local) {
            self.park_orphaned_markers(effects);
            return None;
        }

        self.batching = Some(match self.batching.take() {
            Some(current) => self.context.combine(&[current, delta]),
            None => {
                effects.flush = true;
                delta
            }
        });

        if let Some(states) = self.states.as_mut() {
            states.local = Arc::clone(&state);
        }
        Some(state)
    }

    /// Markers waiting on a batch that never materialised (the reduction
    /// ended where it started) wait on the newest outstanding change instead.
    fn park_orphaned_markers(&mut self, effects: &mut Effects<C::State>) {
        if self.batching.is_some() || self.batching_markers.is_empty() {
            return;
        }
        let markers = mem::take(&mut self.batching_markers);
        match self.outstanding.last_mut() {
            Some(change) => change.markers.extend(markers),
            None => {
                if let Some(local) = self.state() {
                    effects
                        .resolved
                        .extend(markers.into_iter().map(|marker| (marker, Arc::clone(&local))));
                }
            }
        }
    }

    fn handle_init(&mut self, server: Arc<C::State>, effects: &mut Effects<C::State>) {
        let superseded = mem::take(&mut self.outstanding);
        if !superseded.is_empty() {
            debug!(dropped = superseded.len(), "baseline replaced outstanding changes");
        }
        for change in superseded {
            for marker in change.markers {
                effects.rejected.push((marker, SUPERSEDED.to_string()));
            }
        }

        self.states = Some(self.rebase(server));

        let queued = mem::take(&mut self.queued);
        debug!(queued = queued.len(), "received baseline");
        if !queued.is_empty() {
            self.apply(queued, effects);
        }
        effects.changed = self.state();
    }

    fn handle_change(
        &mut self,
        delta: C::Delta,
        id: Option<CorrelationId>,
        raw: Option<&str>,
        effects: &mut Effects<C::State>,
    ) {
        let Some(server) = self.states.as_ref().map(|states| Arc::clone(&states.server)) else {
            effects.warnings.push(format!(
                "Ignoring change before init: {}",
                raw.unwrap_or("<change>")
            ));
            return;
        };

        let popped = self.pop_local_change(id);
        let server = self.context.update(&server, &delta);

        match (&popped, self.states.as_mut()) {
            // The oldest change was already reflected locally.
            (Some((0, _)), Some(states)) => states.server = server,
            _ => {
                self.states = Some(self.rebase(server));
                effects.changed = self.state();
            }
        }

        if let (Some((index, change)), Some(local)) = (popped, self.state()) {
            debug!(id = change.id, index, "change acknowledged");
            for marker in change.markers {
                effects.resolved.push((marker, Arc::clone(&local)));
            }
        }
    }

    fn handle_error(
        &mut self,
        error: String,
        id: Option<CorrelationId>,
        effects: &mut Effects<C::State>,
    ) {
        let Some((_, change)) = self.pop_local_change(id) else {
            effects.warnings.push(format!("API sent error: {error}"));
            return;
        };
        effects.warnings.push(format!("API rejected update: {error}"));

        if let Some(server) = self.states.as_ref().map(|states| Arc::clone(&states.server)) {
            self.states = Some(self.rebase(server));
            effects.changed = self.state();
        }

        for marker in change.markers {
            effects.rejected.push((marker, error.clone()));
        }
    }

    fn pop_local_change(
        &mut self,
        id: Option<CorrelationId>,
    ) -> Option<(usize, LocalChange<C::State, C::Delta>)> {
        let id = id?;
        let index = self.outstanding.iter().position(|change| change.id == id)?;
        Some((index, self.outstanding.remove(index)))
    }

    /// Local state is always the server state plus every outstanding delta
    /// in send order plus the batching delta.
    fn rebase(&self, server: Arc<C::State>) -> States<C::State> {
        let mut local = Arc::clone(&server);
        if !self.outstanding.is_empty() {
            let deltas: Vec<C::Delta> = self
                .outstanding
                .iter()
                .map(|change| change.delta.clone())
                .collect();
            local = self.context.update(&local, &self.context.combine(&deltas));
        }
        if let Some(batching) = &self.batching {
            local = self.context.update(&local, batching);
        }
        States { server, local }
    }
}
