//! Folding a list of spec sources into one state and one delta.

use crate::context::Context;
use crate::spec::{SpecSource, SyncMarker};
use std::sync::Arc;
use std::vec::IntoIter;

/// Result of a reduction.
#[derive(Debug)]
pub struct Reduction<T, D> {
    /// Final state; the input `Arc` itself if nothing changed.
    pub state: Arc<T>,
    /// Combination of every delta applied, in order.
    pub delta: D,
}

/// Applies `sources` to `state` depth-first.
///
/// Consecutive deltas are gathered and applied with a single `combine` +
/// `update` when a generator or sync marker is reached, or at the end.
/// Generators see the running state, including the effect of every source
/// before them. Sync markers are handed to `register` together with the
/// running state at their position.
///
/// Generator output is resolved on an explicit stack of frames, so nesting
/// depth is bounded by memory rather than by the call stack.
pub fn reduce<C, F>(
    context: &C,
    state: Arc<C::State>,
    sources: Vec<SpecSource<C::State, C::Delta>>,
    mut register: F,
) -> Reduction<C::State, C::Delta>
where
    C: Context + ?Sized,
    F: FnMut(SyncMarker<C::State>, &Arc<C::State>),
{
    let mut running = Running {
        context,
        state,
        applied: Vec::new(),
        pending: Vec::new(),
    };

    // Each frame is a sequence plus its cursor; the frame below is its parent.
    let mut stack: Vec<IntoIter<SpecSource<C::State, C::Delta>>> = vec![sources.into_iter()];

    while let Some(frame) = stack.last_mut() {
        let Some(source) = frame.next() else {
            stack.pop();
            continue;
        };

        match source {
            SpecSource::Delta(delta) => running.pending.push(delta),
            SpecSource::Generator(generate) => {
                running.apply_pending();
                let produced = generate(&running.state);
                if !produced.is_empty() {
                    stack.push(produced.into_iter());
                }
            }
            SpecSource::Sync(marker) => {
                running.apply_pending();
                register(marker, &running.state);
            }
            SpecSource::Empty => {}
        }
    }

    running.apply_pending();
    let delta = context.combine(&running.applied);
    Reduction {
        state: running.state,
        delta,
    }
}

struct Running<'a, C: Context + ?Sized> {
    context: &'a C,
    state: Arc<C::State>,
    applied: Vec<C::Delta>,
    pending: Vec<C::Delta>,
}

impl<C: Context + ?Sized> Running<'_, C> {
    fn apply_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let combined = self.context.combine(&self.pending);
        self.pending.clear();
        self.state = self.context.update(&self.state, &combined);
        self.applied.push(combined);
    }
}
