//! The change algebra supplied by the embedding application.

use std::sync::Arc;

/// Interprets deltas against states.
///
/// Implementations must satisfy the monoid laws:
///
/// - `combine(&[])` is the identity delta
/// - `combine(&[d])` is equivalent to `d`
/// - `update(s, combine(&[d1, d2]))` equals `update(update(s, d1), d2)`
///
/// `update` must never mutate its input. When a delta leaves the state
/// unchanged it should return a clone of the same `Arc`: pointer identity is
/// the "did anything change" signal used throughout the engine.
pub trait Context: Send + Sync + 'static {
    /// The shared state.
    type State: Send + Sync + 'static;

    /// One or more composed edits.
    type Delta: Clone + Send + Sync + 'static;

    /// Applies `delta` to `state`.
    fn update(&self, state: &Arc<Self::State>, delta: &Self::Delta) -> Arc<Self::State>;

    /// Composes `deltas` in order into one equivalent delta.
    fn combine(&self, deltas: &[Self::Delta]) -> Self::Delta;
}
